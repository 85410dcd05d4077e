//! Receiver half of the state machine.
//!
//! The receiver opens the conversation: it emits NAK (checksum mode) or
//! `'C'` (CRC mode) until the sender's first block arrives, then
//! validates each block, persists the payload, and acknowledges. A
//! duplicate of the previous block (the sender missed our ACK) is
//! re-acknowledged without being written. EOT closes the sink and trims
//! the SUB padding off the final block.

use tracing::{debug, info, trace, warn};

use crate::core::constants::{ACK, CAN, CHAR_C, EOT, NAK, SOH};
use crate::core::{BlockSink, TransferError};
use crate::engine::state::TransferState;
use crate::wire::{frame_len, ReceivedBlock};

use super::{AbortOrigin, EngineInner, Step};

impl EngineInner {
    pub(super) fn start_receive(
        &mut self,
        use_crc: bool,
        sink: Box<dyn BlockSink>,
    ) -> Result<(), TransferError> {
        if self.state != TransferState::Idle {
            return Err(TransferError::AlreadyActive(self.state));
        }

        self.use_crc = use_crc;
        self.expected_block = 1;
        self.receive_retries = 0;
        self.failure = None;
        self.sink = Some(sink);
        self.state = TransferState::ReceiverInit;
        info!(crc = use_crc, "starting receive");
        self.initiate_signal();
        Ok(())
    }

    /// Emit the init signal and arm the initiation timeout. Each
    /// emission counts against `max_init_retries`; exhausting them
    /// aborts the transfer.
    pub(super) fn initiate_signal(&mut self) {
        self.cancel_timer();
        if self.receive_retries >= self.config.max_init_retries {
            warn!(
                attempts = self.receive_retries,
                "no sender responded to initiation"
            );
            self.record_failure(TransferError::LocalInitiationTimeout {
                attempts: self.receive_retries,
            });
            self.abort(AbortOrigin::Local);
            return;
        }

        let signal = if self.use_crc { CHAR_C } else { NAK };
        let name = if self.use_crc { "'C'" } else { "NAK" };
        debug!(attempt = self.receive_retries + 1, signal = name, "sending init signal");
        if self.send_bytes(&[signal]).is_err() {
            return;
        }
        self.state = TransferState::ExpectingSoh;
        self.arm_timer(self.config.init_timeout);
        self.receive_retries += 1;
    }

    /// Consume one unit from the buffer while expecting SOH/EOT/CAN.
    pub(super) fn consume_receiver(&mut self) -> Step {
        let Some(&first) = self.rx_buffer.front() else {
            return Step::NeedMore;
        };

        match first {
            SOH => {
                let required = frame_len(self.use_crc);
                if self.rx_buffer.len() < required {
                    // Partial block: leave the timer running and wait.
                    trace!(
                        buffered = self.rx_buffer.len(),
                        required,
                        "incomplete block"
                    );
                    return Step::NeedMore;
                }
                self.cancel_timer();
                let frame = self.take_bytes(required);
                self.process_block(&frame);
                Step::Advanced
            }
            EOT => {
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.complete_transfer();
                Step::Advanced
            }
            CAN => {
                debug!("peer cancelled");
                self.cancel_timer();
                self.rx_buffer.pop_front();
                self.abort(AbortOrigin::Remote);
                Step::Advanced
            }
            byte => {
                // Line noise while waiting for a frame start.
                trace!(byte, "discarding unexpected byte");
                self.rx_buffer.pop_front();
                Step::Advanced
            }
        }
    }

    /// Validate and persist one complete block.
    fn process_block(&mut self, frame: &[u8]) {
        self.state = TransferState::Receiving;

        let Some(block) = ReceivedBlock::parse(frame, self.use_crc) else {
            self.block_error();
            return;
        };

        if !block.complement_valid() {
            debug!(
                number = block.number,
                complement = block.complement,
                "block number does not match complement"
            );
            self.block_error();
            return;
        }

        let expected = (self.expected_block % 256) as u8;
        let previous = ((self.expected_block - 1) % 256) as u8;

        if block.number == expected {
            if !block.integrity_valid() {
                debug!(number = block.number, crc = self.use_crc, "integrity check failed");
                self.block_error();
                return;
            }

            let written = match self.sink.as_mut() {
                Some(sink) => sink.write_block(block.payload),
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no sink attached",
                )),
            };
            match written {
                Ok(()) => {
                    trace!(block = self.expected_block, "block persisted");
                    self.receive_retries = 0;
                    self.expected_block += 1;
                    if self.send_bytes(&[ACK]).is_err() {
                        return;
                    }
                    self.state = TransferState::ExpectingSoh;
                    self.arm_timer(self.config.ack_timeout);
                }
                Err(e) => self.fail_sink(&e),
            }
        } else if block.number == previous && self.expected_block > 1 {
            // The sender missed our ACK and retransmitted; acknowledge
            // again but do not write or advance.
            debug!(number = block.number, "duplicate of previous block, re-acking");
            if self.send_bytes(&[ACK]).is_err() {
                return;
            }
            self.state = TransferState::ExpectingSoh;
            self.arm_timer(self.config.ack_timeout);
        } else {
            warn!(
                received = block.number,
                expected,
                "unrecoverable block sequence error"
            );
            self.record_failure(TransferError::ProtocolViolation {
                expected,
                received: block.number,
            });
            self.abort(AbortOrigin::Local);
        }
    }

    /// A rejected block: count it, NAK for a retransmission, or give up.
    fn block_error(&mut self) {
        self.receive_retries += 1;
        warn!(
            block = self.expected_block,
            attempt = self.receive_retries,
            "block rejected"
        );
        if self.receive_retries >= self.config.max_retries {
            self.record_failure(TransferError::RetryExhausted {
                attempts: self.receive_retries,
            });
            self.abort(AbortOrigin::Local);
        } else {
            if self.send_bytes(&[NAK]).is_err() {
                return;
            }
            self.state = TransferState::ExpectingSoh;
            self.arm_timer(self.config.ack_timeout);
        }
    }

    /// EOT received: acknowledge, close the sink, trim SUB padding.
    fn complete_transfer(&mut self) {
        info!("EOT received, completing transfer");
        if self.send_bytes(&[ACK]).is_err() {
            return;
        }

        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!(error = %e, "failed to close sink");
            }
            // Trimming errors do not demote a completed transfer.
            match sink.trim_padding() {
                Ok(len) => debug!(len, "trimmed padding from destination"),
                Err(e) => warn!(error = %e, "failed to trim padding"),
            }
        }
        self.state = TransferState::Completed;
    }

    /// Deadline expired while waiting for SOH/EOT.
    pub(super) fn receiver_timeout(&mut self) {
        if self.expected_block == 1 {
            // Still waiting for the first block: re-run initiation.
            debug!("no first block, re-initiating");
            self.state = TransferState::ReceiverInit;
            self.initiate_signal();
        } else {
            self.receive_retries += 1;
            warn!(
                block = self.expected_block,
                attempt = self.receive_retries,
                "timed out waiting for next block"
            );
            if self.receive_retries >= self.config.max_retries {
                self.record_failure(TransferError::RetryExhausted {
                    attempts: self.receive_retries,
                });
                self.abort(AbortOrigin::Local);
            } else {
                if self.send_bytes(&[NAK]).is_err() {
                    return;
                }
                self.arm_timer(self.config.ack_timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::core::constants::{ACK, BLOCK_SIZE, CAN, CHAR_C, EOT, NAK, SUB};
    use crate::core::TransferError;
    use crate::engine::{Config, TransferState, XmodemEngine};
    use crate::testing::{wait_for_state, MemorySink, MockTransport};
    use crate::wire::build_block;

    /// Engine with timeouts long enough that no deadline fires during a
    /// byte-driven test.
    fn quiet_engine(use_crc: bool) -> (XmodemEngine, MockTransport, MemorySink) {
        let transport = MockTransport::new();
        let config = Config {
            init_timeout: Duration::from_secs(3600),
            ack_timeout: Duration::from_secs(3600),
            eot_ack_timeout: Duration::from_secs(3600),
            ..Config::default()
        };
        let engine = XmodemEngine::with_config(Box::new(transport.clone()), config);
        let sink = MemorySink::new();
        engine.start_receive(use_crc, Box::new(sink.clone())).unwrap();
        (engine, transport, sink)
    }

    #[test]
    fn test_single_block_checksum_transfer() {
        let (engine, wire, sink) = quiet_engine(false);
        assert_eq!(wire.written(), vec![NAK]);
        wire.clear();

        engine.feed_bytes(&build_block(1, b"AB", false));
        assert_eq!(wire.written(), vec![ACK]);
        assert_eq!(engine.current_state(), TransferState::ExpectingSoh);

        wire.clear();
        engine.feed_bytes(&[EOT]);
        assert_eq!(wire.written(), vec![ACK]);
        assert_eq!(engine.current_state(), TransferState::Completed);

        // 126 trailing SUB bytes trimmed away.
        assert_eq!(sink.contents(), b"AB");
        assert!(sink.is_closed());
        engine.shutdown();
    }

    #[test]
    fn test_fragmented_delivery() {
        let (engine, wire, sink) = quiet_engine(true);
        wire.clear();

        let frame = build_block(1, b"fragmented", true);
        for &byte in &frame {
            engine.feed_bytes(&[byte]);
        }
        assert_eq!(wire.written(), vec![ACK]);

        engine.feed_bytes(&[EOT]);
        assert_eq!(engine.current_state(), TransferState::Completed);
        assert_eq!(sink.contents(), b"fragmented");
        engine.shutdown();
    }

    #[test]
    fn test_noise_before_soh_is_discarded() {
        let (engine, wire, sink) = quiet_engine(false);
        wire.clear();

        let mut stream = vec![0x00, 0x7F, 0xFF];
        stream.extend(build_block(1, b"payload", false));
        engine.feed_bytes(&stream);

        assert_eq!(wire.written(), vec![ACK]);
        engine.feed_bytes(&[EOT]);
        assert_eq!(sink.contents(), b"payload");
        engine.shutdown();
    }

    #[test]
    fn test_duplicate_block_reacked_without_rewrite() {
        let (engine, wire, sink) = quiet_engine(true);
        wire.clear();

        let block1 = build_block(1, b"first", true);
        engine.feed_bytes(&block1);
        assert_eq!(wire.written(), vec![ACK]);

        // Retransmission of block 1: ACK again, write nothing.
        wire.clear();
        engine.feed_bytes(&block1);
        assert_eq!(wire.written(), vec![ACK]);
        assert_eq!(engine.current_state(), TransferState::ExpectingSoh);

        engine.feed_bytes(&build_block(2, b"second", true));
        engine.feed_bytes(&[EOT]);
        assert_eq!(engine.current_state(), TransferState::Completed);

        let mut expected = b"first".to_vec();
        expected.resize(BLOCK_SIZE, SUB);
        expected.extend_from_slice(b"second");
        assert_eq!(sink.contents(), expected);
        engine.shutdown();
    }

    #[test]
    fn test_corrupted_block_naks_until_abort() {
        let (engine, wire, _sink) = quiet_engine(false);
        wire.clear();

        let mut corrupt = build_block(1, b"corrupt", false);
        corrupt[10] ^= 0x01;

        // Nine rejections produce NAKs...
        for _ in 0..9 {
            engine.feed_bytes(&corrupt);
        }
        assert_eq!(wire.written(), vec![NAK; 9]);
        assert_eq!(engine.current_state(), TransferState::ExpectingSoh);

        // ...the tenth reaches the cap and aborts with CAN CAN.
        wire.clear();
        engine.feed_bytes(&corrupt);
        assert_eq!(engine.current_state(), TransferState::Aborted);
        assert_eq!(wire.written(), vec![CAN, CAN]);
        assert!(matches!(
            engine.last_error(),
            Some(TransferError::RetryExhausted { attempts: 10 })
        ));
        engine.shutdown();
    }

    #[test]
    fn test_bad_complement_counts_as_block_error() {
        let (engine, wire, _sink) = quiet_engine(false);
        wire.clear();

        let mut frame = build_block(1, b"x", false);
        frame[2] = 0x00; // complement no longer matches
        engine.feed_bytes(&frame);

        assert_eq!(wire.written(), vec![NAK]);
        assert_eq!(engine.current_state(), TransferState::ExpectingSoh);
        engine.shutdown();
    }

    #[test]
    fn test_good_block_resets_retry_counter() {
        let (engine, wire, _sink) = quiet_engine(false);
        wire.clear();

        let mut corrupt = build_block(1, b"data", false);
        corrupt[5] ^= 0xFF;
        for _ in 0..9 {
            engine.feed_bytes(&corrupt);
        }

        // A good block arrives on the last allowed attempt.
        engine.feed_bytes(&build_block(1, b"data", false));
        assert_eq!(engine.current_state(), TransferState::ExpectingSoh);

        // The counter reset: nine more corrupt blocks still only NAK.
        wire.clear();
        let mut corrupt2 = build_block(2, b"next", false);
        corrupt2[5] ^= 0xFF;
        for _ in 0..9 {
            engine.feed_bytes(&corrupt2);
        }
        assert_eq!(engine.current_state(), TransferState::ExpectingSoh);
        assert_eq!(wire.written(), vec![NAK; 9]);
        engine.shutdown();
    }

    #[test]
    fn test_sequence_violation_aborts() {
        let (engine, wire, _sink) = quiet_engine(true);
        wire.clear();

        // Block 5 while expecting block 1 is unrecoverable.
        engine.feed_bytes(&build_block(5, b"out of order", true));
        assert_eq!(engine.current_state(), TransferState::Aborted);
        assert_eq!(wire.written(), vec![CAN, CAN]);
        assert!(matches!(
            engine.last_error(),
            Some(TransferError::ProtocolViolation {
                expected: 1,
                received: 5
            })
        ));
        engine.shutdown();
    }

    #[test]
    fn test_remote_cancel_is_silent() {
        let (engine, wire, sink) = quiet_engine(true);
        wire.clear();

        engine.feed_bytes(&[CAN]);
        assert_eq!(engine.current_state(), TransferState::Aborted);
        assert!(wire.written().is_empty());
        assert!(sink.is_closed());
        assert!(matches!(
            engine.last_error(),
            Some(TransferError::RemoteCancelled)
        ));

        // Later bytes are discarded.
        engine.feed_bytes(&build_block(1, b"late", true));
        assert!(wire.written().is_empty());
        engine.shutdown();
    }

    #[test]
    fn test_sink_write_failure_cancels_with_error_state() {
        let (engine, wire, sink) = quiet_engine(false);
        wire.clear();
        sink.fail_next_write();

        engine.feed_bytes(&build_block(1, b"doomed", false));
        assert_eq!(engine.current_state(), TransferState::Error);
        assert_eq!(wire.written(), vec![CAN, CAN]);
        assert!(matches!(engine.last_error(), Some(TransferError::Io(_))));
        engine.shutdown();
    }

    #[test]
    fn test_init_retries_exhaust_to_abort() {
        // S1 with a compressed clock: 'C' is re-emitted on each init
        // timeout; after six emissions the receiver gives up.
        let transport = MockTransport::new();
        let config = Config {
            init_timeout: Duration::from_millis(10),
            ..Config::default()
        };
        let engine = XmodemEngine::with_config(Box::new(transport.clone()), config);
        engine
            .start_receive(true, Box::new(MemorySink::new()))
            .unwrap();

        assert!(wait_for_state(
            &engine,
            TransferState::Aborted,
            Duration::from_secs(5)
        ));

        let written = transport.written();
        assert_eq!(written, [vec![CHAR_C; 6], vec![CAN, CAN]].concat());
        assert!(matches!(
            engine.last_error(),
            Some(TransferError::LocalInitiationTimeout { attempts: 6 })
        ));
        engine.shutdown();
    }

    #[test]
    fn test_mid_transfer_timeout_naks_then_aborts() {
        let transport = MockTransport::new();
        let config = Config {
            init_timeout: Duration::from_secs(3600),
            ack_timeout: Duration::from_millis(10),
            ..Config::default()
        };
        let engine = XmodemEngine::with_config(Box::new(transport.clone()), config);
        let sink = MemorySink::new();
        engine.start_receive(false, Box::new(sink.clone())).unwrap();

        // One good block moves us past initiation and onto the ack
        // timeout; with no sender, NAKs count up to the retry cap.
        engine.feed_bytes(&build_block(1, b"only", false));
        assert!(wait_for_state(
            &engine,
            TransferState::Aborted,
            Duration::from_secs(5)
        ));
        assert!(matches!(
            engine.last_error(),
            Some(TransferError::RetryExhausted { .. })
        ));

        let written = transport.written();
        // NAK (init), ACK (block 1), nine NAK retries, CAN CAN.
        let expected = [
            vec![NAK, ACK],
            vec![NAK; 9],
            vec![CAN, CAN],
        ]
        .concat();
        assert_eq!(written, expected);
        engine.shutdown();
    }

    #[test]
    fn test_block_number_wrap_and_duplicate_at_wrap() {
        let (engine, wire, sink) = quiet_engine(true);
        wire.clear();

        // Feed 256 blocks: wire numbers 1..=255, then 0.
        for index in 0..256usize {
            let wire_number = ((index + 1) % 256) as u8;
            let payload = [(index % 256) as u8; 4];
            engine.feed_bytes(&build_block(wire_number, &payload, true));
            assert_eq!(engine.current_state(), TransferState::ExpectingSoh);
        }

        // A retransmission of block 256 (wire 0x00) is the previous
        // block now: re-ACK, no write.
        wire.clear();
        engine.feed_bytes(&build_block(0, &[0xFF; 4], true));
        assert_eq!(wire.written(), vec![ACK]);

        // Block 257 (wire 0x01) is new data, not a duplicate of block 1.
        engine.feed_bytes(&build_block(1, b"wrapped", true));
        engine.feed_bytes(&[EOT]);
        assert_eq!(engine.current_state(), TransferState::Completed);

        let contents = sink.contents();
        assert_eq!(contents.len(), 256 * BLOCK_SIZE + b"wrapped".len());
        assert_eq!(&contents[256 * BLOCK_SIZE..], b"wrapped");
        engine.shutdown();
    }
}
