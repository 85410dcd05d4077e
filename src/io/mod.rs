//! File-backed sink and source helpers.

mod file;

pub use file::*;
