//! Traits at the engine's seams.
//!
//! The engine talks to the outside world through exactly two
//! interfaces: a [`Transport`] it writes protocol bytes to, and a
//! [`BlockSink`] it persists received payloads into. Inbound bytes have
//! no trait; the transport's read side (whatever thread it lives on)
//! pushes byte runs into [`XmodemEngine::feed_bytes`].
//!
//! [`XmodemEngine::feed_bytes`]: crate::engine::XmodemEngine::feed_bytes

use std::io;

/// Outbound half of a byte-oriented duplex channel.
///
/// Implementations deliver each byte array atomically and in order. A
/// returned error is treated as permanent: the engine transitions to
/// [`TransferState::Error`](crate::engine::TransferState::Error) and
/// does not attempt further writes.
pub trait Transport: Send {
    /// Deliver `bytes` to the peer.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Destination for received payloads.
///
/// The engine owns the sink exclusively from `start_receive` until the
/// transfer reaches a terminal state. Writes are append-only;
/// [`trim_padding`](BlockSink::trim_padding) runs once after
/// [`close`](BlockSink::close) to strip the SUB bytes the sender used
/// to fill the final block.
pub trait BlockSink: Send {
    /// Append one 128-byte payload.
    fn write_block(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Flush and close the underlying stream.
    fn close(&mut self) -> io::Result<()>;

    /// Remove trailing SUB (0x1A) padding from the last block.
    ///
    /// Called once, after `close`, on successful completion only. Scans
    /// backwards over at most the final 128 bytes and truncates at the
    /// last non-SUB byte. Returns the resulting length.
    fn trim_padding(&mut self) -> io::Result<u64>;
}
