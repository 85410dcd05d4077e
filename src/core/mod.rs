//! Core constants, error types, and traits.
//!
//! Everything here is transport- and filesystem-agnostic: the protocol
//! constants fixed by XMODEM, the error kinds surfaced by the engine,
//! and the two seams ([`Transport`], [`BlockSink`]) the engine drives.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
