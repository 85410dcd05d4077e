//! Error types for the XMODEM engine.

use thiserror::Error;

use crate::engine::TransferState;

/// Errors surfaced by the engine.
///
/// Public operations either return one of these synchronously or record
/// one while transitioning to a terminal state ([`TransferState::Aborted`]
/// or [`TransferState::Error`]); the recorded value is available through
/// [`XmodemEngine::last_error`](crate::engine::XmodemEngine::last_error).
/// Recoverable conditions (a bad checksum, a single timeout) are handled
/// internally via NAK/retry and never appear here.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// `start_receive` or `start_send` called while not idle.
    #[error("transfer already active (state: {0:?})")]
    AlreadyActive(TransferState),

    /// The destination cannot be opened or is not writable.
    #[error("destination unavailable: {0}")]
    SinkUnavailable(String),

    /// The source file is missing, not a regular file, or unreadable.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source file is zero bytes; XMODEM has no empty-file framing.
    #[error("source file is empty")]
    EmptySource,

    /// Transport send failure or sink write failure.
    #[error("i/o error: {0}")]
    Io(String),

    /// A retry counter reached its cap.
    #[error("retry limit reached after {attempts} attempts")]
    RetryExhausted {
        /// Consecutive failed attempts at the point of giving up.
        attempts: u32,
    },

    /// A block number that is neither the expected block nor a
    /// duplicate of the previous one.
    #[error("block {received} is neither expected block {expected} nor the previous block")]
    ProtocolViolation {
        /// Expected wire block number (modulo 256).
        expected: u8,
        /// Wire block number actually received.
        received: u8,
    },

    /// The peer sent CAN.
    #[error("peer cancelled the transfer")]
    RemoteCancelled,

    /// Receiver: gave up emitting NAK/'C' with no block in response.
    #[error("receiver gave up initiating after {attempts} attempts")]
    LocalInitiationTimeout {
        /// Init signals emitted before giving up.
        attempts: u32,
    },

    /// Sender: no NAK/'C' arrived from the receiver.
    #[error("no initiation from receiver after {attempts} attempts")]
    RemoteInitiationTimeout {
        /// Timeout rounds waited before giving up.
        attempts: u32,
    },
}
