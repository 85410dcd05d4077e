//! Transfer lifecycle state.

/// Lifecycle state of a transfer.
///
/// `Receiving`, `Sending`, and `SendingEot` are transient markers: the
/// engine enters and leaves them within a single locked step, so they
/// are never observable across I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No transfer active.
    Idle,
    /// Receiver: about to emit the init signal (NAK or 'C').
    ReceiverInit,
    /// Receiver: waiting for SOH, EOT, or CAN.
    ExpectingSoh,
    /// Receiver: validating a complete block (transient).
    Receiving,
    /// Sender: waiting for the receiver's NAK or 'C'.
    SenderWaitInit,
    /// Sender: transmitting a data block (transient).
    Sending,
    /// Sender: waiting for ACK/NAK after a block.
    WaitingForAck,
    /// Sender: transmitting EOT (transient).
    SendingEot,
    /// Sender: waiting for the final ACK after EOT.
    WaitingForEotAck,
    /// Transfer finished successfully.
    Completed,
    /// Transfer cancelled, locally or by the peer.
    Aborted,
    /// Unrecoverable failure (I/O, empty source).
    Error,
}

impl TransferState {
    /// Whether this is a terminal state: no further transitions occur
    /// and outbound control bytes are suppressed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Aborted | TransferState::Error
        )
    }
}
