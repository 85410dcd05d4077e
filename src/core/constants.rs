//! Protocol constants fixed by XMODEM.
//!
//! These values are part of the wire protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CONTROL BYTES
// =============================================================================

/// Start of header - introduces a 128-byte data block.
pub const SOH: u8 = 0x01;

/// End of transmission - sender signals no more blocks.
pub const EOT: u8 = 0x04;

/// Acknowledge - block (or EOT) accepted.
pub const ACK: u8 = 0x06;

/// Negative acknowledge - block rejected, retransmit. Also the
/// receiver's init signal in checksum mode.
pub const NAK: u8 = 0x15;

/// Cancel - abort the transfer.
pub const CAN: u8 = 0x18;

/// Substitute (Ctrl-Z) - pads an incomplete final payload to 128 bytes.
pub const SUB: u8 = 0x1A;

/// `'C'` - the receiver's init signal requesting CRC mode.
pub const CHAR_C: u8 = 0x43;

// =============================================================================
// FRAMING
// =============================================================================

/// Payload size of every data block.
pub const BLOCK_SIZE: usize = 128;

/// Bytes preceding the payload: SOH, block number, complement.
pub const BLOCK_HEADER_SIZE: usize = 3;

// =============================================================================
// TIMING
// =============================================================================

/// Receiver: wait for the first SOH after emitting NAK/'C'.
/// Sender: wait for NAK/'C' from the receiver.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sender: wait for ACK/NAK after a block.
/// Receiver: wait for the next SOH/EOT after sending ACK.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Sender: wait for the final ACK after EOT.
pub const EOT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// RETRY CAPS
// =============================================================================

/// Initial-phase retry cap (both sides).
pub const MAX_INIT_RETRIES: u32 = 6;

/// Per-block and per-EOT retry cap.
pub const MAX_RETRIES: u32 = 10;
