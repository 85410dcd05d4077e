//! # XMODEM Protocol Engine
//!
//! A full-duplex implementation of the XMODEM file-transfer protocol
//! (both the original 8-bit-checksum variant and XMODEM/CRC) over a
//! generic byte-oriented serial transport. It provides:
//!
//! - **Framing**: 128-byte data blocks with block-number complement and
//!   checksum or CRC-16/XMODEM trailers
//! - **State machine**: sender and receiver halves with initiation
//!   handshake (NAK vs `'C'`), acknowledgement, retransmission, EOT
//!   handshake, and cancellation
//! - **Timeouts**: a single-deadline timer service driving retries with
//!   per-phase retry caps
//! - **Transport independence**: bytes in, bytes out; the engine never
//!   touches a port directly
//!
//! ## Feature Flags
//!
//! - `serial`: serial port transport adapter built on the `serialport`
//!   crate
//!
//! ## Modules
//!
//! - [`core`]: constants, error types, and the transport/sink traits
//! - [`wire`]: block framing and integrity codecs
//! - [`engine`]: the protocol state machine and timer service
//! - [`io`]: file-backed sink and source helpers
//!
//! ## Example Usage
//!
//! ```no_run
//! use xmodem_protocol::prelude::*;
//! use xmodem_protocol::io::FileSink;
//!
//! # fn transport() -> Box<dyn Transport> { unimplemented!() }
//! // Receive a file in CRC mode. Inbound bytes from the port are pushed
//! // into the engine by whatever thread the serial library delivers on.
//! let engine = XmodemEngine::new(transport());
//! let sink = FileSink::create("received.bin")?;
//! engine.start_receive(true, Box::new(sink))?;
//!
//! // ... feed_bytes(..) as data arrives, then poll for completion:
//! while !engine.current_state().is_terminal() {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! engine.shutdown();
//! # Ok::<(), xmodem_protocol::TransferError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod engine;
pub mod io;
pub mod wire;

// Serial transport adapter (feature-gated)
#[cfg(feature = "serial")]
pub mod serial;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{BlockSink, Transport, TransferError};
    pub use crate::engine::{Config, TransferState, XmodemEngine};
}

// Re-export commonly used items at crate root
pub use crate::core::{BlockSink, Transport, TransferError};
pub use crate::engine::{Config, TransferState, XmodemEngine};
