//! Block framing and integrity codecs.
//!
//! A data block on the wire:
//!
//! ```text
//! SOH | blk | ~blk | payload[128] | checksum(1)        (checksum mode)
//! SOH | blk | ~blk | payload[128] | crc_hi | crc_lo    (CRC mode)
//! ```
//!
//! The first data block carries number 1; numbers wrap 255 -> 0 -> 1.

mod block;
mod integrity;

pub use block::*;
pub use integrity::*;
