//! Sender half of the state machine.
//!
//! The sender loads the whole file up front, waits for the receiver's
//! init byte (NAK selects checksum mode, `'C'` selects CRC), then
//! transmits 128-byte blocks one at a time, retransmitting on NAK or
//! timeout. After the last acknowledged block it sends EOT and waits
//! for the closing ACK.

use tracing::{debug, info, trace, warn};

use crate::core::constants::{ACK, BLOCK_SIZE, CAN, CHAR_C, EOT, NAK};
use crate::core::TransferError;
use crate::engine::state::TransferState;
use crate::wire::build_block;

use super::{AbortOrigin, EngineInner, Step};

impl EngineInner {
    pub(super) fn start_send(
        &mut self,
        data: Vec<u8>,
        use_crc_preferred: bool,
    ) -> Result<(), TransferError> {
        if self.state != TransferState::Idle {
            return Err(TransferError::AlreadyActive(self.state));
        }
        if data.is_empty() {
            // XMODEM has no framing for an empty file.
            warn!("refusing to send empty source");
            self.record_failure(TransferError::EmptySource);
            self.state = TransferState::Error;
            return Err(TransferError::EmptySource);
        }

        info!(len = data.len(), crc_preferred = use_crc_preferred, "starting send");
        self.use_crc = use_crc_preferred;
        self.failure = None;
        self.file_data = Some(data);
        self.current_block_index = 0;
        self.send_retries = 0;
        self.state = TransferState::SenderWaitInit;
        self.arm_timer(self.config.init_timeout);
        Ok(())
    }

    /// Consume one byte while waiting for the receiver's init signal.
    pub(super) fn consume_sender_init(&mut self) -> Step {
        let Some(&first) = self.rx_buffer.front() else {
            return Step::NeedMore;
        };

        match first {
            NAK => {
                debug!("receiver requested checksum mode");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.use_crc = false;
                self.begin_data_phase();
            }
            CHAR_C => {
                debug!("receiver requested CRC mode");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.use_crc = true;
                self.begin_data_phase();
            }
            CAN => {
                debug!("peer cancelled during initiation");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.abort(AbortOrigin::Remote);
            }
            byte => {
                trace!(byte, "discarding unexpected byte before initiation");
                self.rx_buffer.pop_front();
            }
        }
        Step::Advanced
    }

    fn begin_data_phase(&mut self) {
        self.send_retries = 0;
        self.current_block_index = 0;
        self.send_next_block();
    }

    /// Build and transmit the block at `current_block_index`, or EOT if
    /// the file is exhausted.
    fn send_next_block(&mut self) {
        let Some(data) = self.file_data.as_ref() else {
            warn!("no file data while sending");
            self.abort(AbortOrigin::Local);
            return;
        };

        let start = self.current_block_index * BLOCK_SIZE;
        if start >= data.len() {
            self.send_eot();
            return;
        }
        let end = usize::min(start + BLOCK_SIZE, data.len());
        let wire_number = ((self.current_block_index + 1) % 256) as u8;
        let frame = build_block(wire_number, &data[start..end], self.use_crc);

        debug!(
            block = self.current_block_index + 1,
            wire_number,
            len = frame.len(),
            crc = self.use_crc,
            "transmitting block"
        );
        self.state = TransferState::Sending;
        if self.send_bytes(&frame).is_err() {
            return;
        }
        self.state = TransferState::WaitingForAck;
        self.arm_timer(self.config.ack_timeout);
    }

    /// Consume one byte while waiting for ACK/NAK after a block.
    pub(super) fn consume_ack(&mut self) -> Step {
        let Some(&first) = self.rx_buffer.front() else {
            return Step::NeedMore;
        };

        match first {
            ACK => {
                trace!(block = self.current_block_index + 1, "block acknowledged");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.send_retries = 0;
                self.current_block_index += 1;
                self.send_next_block();
            }
            NAK => {
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.retry_block();
            }
            CAN => {
                debug!("peer cancelled mid-transfer");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.abort(AbortOrigin::Remote);
            }
            byte => {
                trace!(byte, "discarding unexpected byte while awaiting ack");
                self.rx_buffer.pop_front();
            }
        }
        Step::Advanced
    }

    /// Retransmit the current block after NAK or timeout.
    fn retry_block(&mut self) {
        self.send_retries += 1;
        warn!(
            block = self.current_block_index + 1,
            attempt = self.send_retries,
            "retransmitting block"
        );
        if self.send_retries >= self.config.max_retries {
            self.record_failure(TransferError::RetryExhausted {
                attempts: self.send_retries,
            });
            self.abort(AbortOrigin::Local);
        } else {
            self.send_next_block();
        }
    }

    /// All data acknowledged: emit EOT and wait for the closing ACK.
    fn send_eot(&mut self) {
        debug!("transmitting EOT");
        self.state = TransferState::SendingEot;
        if self.send_bytes(&[EOT]).is_err() {
            return;
        }
        self.send_retries = 0;
        self.state = TransferState::WaitingForEotAck;
        self.arm_timer(self.config.eot_ack_timeout);
    }

    /// Consume one byte while waiting for the ACK that closes EOT.
    pub(super) fn consume_eot_ack(&mut self) -> Step {
        let Some(&first) = self.rx_buffer.front() else {
            return Step::NeedMore;
        };

        match first {
            ACK => {
                info!("EOT acknowledged, transfer complete");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.state = TransferState::Completed;
                self.close_resources();
            }
            CAN => {
                debug!("peer cancelled during EOT handshake");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.abort(AbortOrigin::Remote);
            }
            byte => {
                trace!(byte, "discarding unexpected byte while awaiting EOT ack");
                self.rx_buffer.pop_front();
            }
        }
        Step::Advanced
    }

    /// Deadline expired in one of the sender's waiting states.
    pub(super) fn sender_timeout(&mut self) {
        match self.state {
            TransferState::SenderWaitInit => {
                self.send_retries += 1;
                warn!(
                    attempt = self.send_retries,
                    "no init signal from receiver"
                );
                if self.send_retries >= self.config.max_init_retries {
                    self.record_failure(TransferError::RemoteInitiationTimeout {
                        attempts: self.send_retries,
                    });
                    self.abort(AbortOrigin::Local);
                } else {
                    self.arm_timer(self.config.init_timeout);
                }
            }
            TransferState::WaitingForAck => {
                warn!(block = self.current_block_index + 1, "timed out waiting for ack");
                self.retry_block();
            }
            TransferState::WaitingForEotAck => {
                self.send_retries += 1;
                warn!(attempt = self.send_retries, "timed out waiting for EOT ack");
                if self.send_retries >= self.config.max_retries {
                    self.record_failure(TransferError::RetryExhausted {
                        attempts: self.send_retries,
                    });
                    self.abort(AbortOrigin::Local);
                } else {
                    // Re-emit without resetting the retry counter.
                    if self.send_bytes(&[EOT]).is_err() {
                        return;
                    }
                    self.arm_timer(self.config.eot_ack_timeout);
                }
            }
            state => trace!(?state, "sender timeout ignored in state"),
        }
    }
}
