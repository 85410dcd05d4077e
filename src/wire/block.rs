//! Data block construction and parsing.

use crate::core::constants::{BLOCK_HEADER_SIZE, BLOCK_SIZE, SOH, SUB};

use super::integrity::{checksum8, crc16_xmodem};

/// Total on-wire length of a data block for the given mode.
pub fn frame_len(use_crc: bool) -> usize {
    BLOCK_HEADER_SIZE + BLOCK_SIZE + if use_crc { 2 } else { 1 }
}

/// Check a block number against its complement: `number + !number == 0xFF`.
pub fn complement_valid(number: u8, complement: u8) -> bool {
    number.wrapping_add(complement) == 0xFF
}

/// Build a complete on-wire block from up to 128 bytes of file data.
///
/// `chunk` shorter than 128 bytes is padded with SUB. `block_number` is
/// the wire number (already reduced modulo 256).
///
/// # Panics
///
/// Panics if `chunk` is longer than [`BLOCK_SIZE`].
pub fn build_block(block_number: u8, chunk: &[u8], use_crc: bool) -> Vec<u8> {
    assert!(chunk.len() <= BLOCK_SIZE, "chunk exceeds block size");

    let mut frame = Vec::with_capacity(frame_len(use_crc));
    frame.push(SOH);
    frame.push(block_number);
    frame.push(!block_number);

    let payload_start = frame.len();
    frame.extend_from_slice(chunk);
    frame.resize(payload_start + BLOCK_SIZE, SUB);

    if use_crc {
        let crc = crc16_xmodem(&frame[payload_start..]);
        frame.push((crc >> 8) as u8);
        frame.push((crc & 0xFF) as u8);
    } else {
        let checksum = checksum8(&frame[payload_start..]);
        frame.push(checksum);
    }

    frame
}

/// A parsed view over one complete on-wire block.
#[derive(Debug)]
pub struct ReceivedBlock<'a> {
    /// Wire block number.
    pub number: u8,
    /// Complement byte as received.
    pub complement: u8,
    /// The 128-byte payload.
    pub payload: &'a [u8],
    trailer: &'a [u8],
    use_crc: bool,
}

impl<'a> ReceivedBlock<'a> {
    /// Parse a frame of exactly [`frame_len`] bytes starting with SOH.
    ///
    /// Returns `None` when the length or leading byte does not match;
    /// integrity is checked separately so callers can distinguish a
    /// framing error from a corrupt payload.
    pub fn parse(frame: &'a [u8], use_crc: bool) -> Option<Self> {
        if frame.len() != frame_len(use_crc) || frame[0] != SOH {
            return None;
        }
        let payload_end = BLOCK_HEADER_SIZE + BLOCK_SIZE;
        Some(ReceivedBlock {
            number: frame[1],
            complement: frame[2],
            payload: &frame[BLOCK_HEADER_SIZE..payload_end],
            trailer: &frame[payload_end..],
            use_crc,
        })
    }

    /// Whether the block number matches its complement.
    pub fn complement_valid(&self) -> bool {
        complement_valid(self.number, self.complement)
    }

    /// Whether the trailer matches the payload (checksum or CRC).
    pub fn integrity_valid(&self) -> bool {
        if self.use_crc {
            let received = ((self.trailer[0] as u16) << 8) | self.trailer[1] as u16;
            received == crc16_xmodem(self.payload)
        } else {
            self.trailer[0] == checksum8(self.payload)
        }
    }
}
