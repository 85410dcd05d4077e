//! The protocol state machine.
//!
//! [`XmodemEngine`] owns all protocol state behind a single mutex: the
//! transfer state, the receive buffer, retry counters, and the
//! per-transfer resources (sink or file data). Two producers re-enter
//! the engine: the transport's read side calling
//! [`feed_bytes`](XmodemEngine::feed_bytes) on whatever thread delivers
//! serial data, and the timer thread firing deadlines. Every
//! externally visible transition happens under the lock; the engine
//! never sleeps while holding it, and the only I/O performed inside is
//! the outbound transport write.
//!
//! Inbound bytes are appended to the receive buffer and the machine is
//! driven until it cannot make progress (a partial block, or nothing
//! buffered while a deadline is pending). Timer callbacks carry a
//! generation number that is re-checked under the lock, so a deadline
//! cancelled at the same instant it fires is a no-op.

mod receiver;
mod sender;
mod state;
mod timer;

pub use state::TransferState;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::core::constants::{
    ACK_TIMEOUT, CAN, EOT_ACK_TIMEOUT, INIT_TIMEOUT, MAX_INIT_RETRIES, MAX_RETRIES,
};
use crate::core::{BlockSink, TransferError, Transport};

use timer::{TimerHandle, TimerService};

/// Tunable timing and retry parameters.
///
/// The defaults are the protocol's standard values; only tests normally
/// change them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-block and per-EOT retry cap.
    pub max_retries: u32,
    /// Initiation retry cap (both sides).
    pub max_init_retries: u32,
    /// Wait for the first SOH (receiver) or NAK/'C' (sender).
    pub init_timeout: Duration,
    /// Wait for ACK/NAK after a block, or the next SOH/EOT after ACK.
    pub ack_timeout: Duration,
    /// Wait for the final ACK after EOT.
    pub eot_ack_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: MAX_RETRIES,
            max_init_retries: MAX_INIT_RETRIES,
            init_timeout: INIT_TIMEOUT,
            ack_timeout: ACK_TIMEOUT,
            eot_ack_timeout: EOT_ACK_TIMEOUT,
        }
    }
}

/// Outcome of one attempt to consume bytes from the front of the
/// receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Something was consumed; keep driving.
    Advanced,
    /// A complete unit is not buffered yet; wait for more bytes.
    NeedMore,
}

/// The full-duplex XMODEM protocol engine.
///
/// One engine performs one transfer at a time, as either sender or
/// receiver. All entry points are safe to call from any thread.
pub struct XmodemEngine {
    inner: Arc<Mutex<EngineInner>>,
    timer: TimerService,
}

impl XmodemEngine {
    /// Create an engine over `transport` with default timing.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_config(transport, Config::default())
    }

    /// Create an engine with explicit timing and retry parameters.
    pub fn with_config(transport: Box<dyn Transport>, config: Config) -> Self {
        let timer = TimerService::new();
        let inner = Arc::new(Mutex::new(EngineInner::new(
            transport,
            config,
            timer.handle(),
        )));

        let weak = Arc::downgrade(&inner);
        timer.start(move |generation| {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).on_timer_fired(generation);
            }
        });

        XmodemEngine { inner, timer }
    }

    /// Begin receiving into `sink`.
    ///
    /// Emits the init signal (NAK in checksum mode, `'C'` in CRC mode)
    /// and arms the initiation timeout. Fails with
    /// [`TransferError::AlreadyActive`] unless the engine is idle.
    pub fn start_receive(
        &self,
        use_crc: bool,
        sink: Box<dyn BlockSink>,
    ) -> Result<(), TransferError> {
        lock(&self.inner).start_receive(use_crc, sink)
    }

    /// Begin sending `data`.
    ///
    /// The transfer waits for the receiver's init byte; the actual
    /// integrity mode follows that byte, `use_crc_preferred` is
    /// advisory only. Zero-byte data fails with
    /// [`TransferError::EmptySource`] and leaves the engine in
    /// [`TransferState::Error`].
    pub fn start_send(&self, data: Vec<u8>, use_crc_preferred: bool) -> Result<(), TransferError> {
        lock(&self.inner).start_send(data, use_crc_preferred)
    }

    /// Deliver a run of inbound bytes from the transport.
    ///
    /// Runs are processed in arrival order and need not align with
    /// protocol frames.
    pub fn feed_bytes(&self, bytes: &[u8]) {
        lock(&self.inner).ingest(bytes);
    }

    /// Cancel the transfer locally, emitting `CAN CAN` unless the
    /// engine never left idle. Idempotent.
    pub fn abort_local(&self) {
        lock(&self.inner).abort(AbortOrigin::Local);
    }

    /// Current transfer state.
    pub fn current_state(&self) -> TransferState {
        lock(&self.inner).state
    }

    /// The error recorded when the engine last entered
    /// [`TransferState::Aborted`] or [`TransferState::Error`].
    pub fn last_error(&self) -> Option<TransferError> {
        lock(&self.inner).failure.clone()
    }

    /// Tear down the timer service, draining any pending callback.
    /// Idempotent; an abort in progress remains observable afterwards.
    pub fn shutdown(&self) {
        self.timer.shutdown();
    }
}

impl Drop for XmodemEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(inner: &Mutex<EngineInner>) -> MutexGuard<'_, EngineInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Who initiated an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortOrigin {
    Local,
    Remote,
}

/// All protocol state, guarded by the engine lock.
struct EngineInner {
    state: TransferState,
    config: Config,
    transport: Box<dyn Transport>,
    timer: TimerHandle,
    /// Generation of the currently armed deadline, if any.
    timer_generation: Option<u64>,
    rx_buffer: VecDeque<u8>,
    use_crc: bool,
    failure: Option<TransferError>,

    // Receiver half
    /// Running counter of the next expected block, starting at 1. The
    /// wire representation is this modulo 256.
    expected_block: u64,
    receive_retries: u32,
    sink: Option<Box<dyn BlockSink>>,

    // Sender half
    file_data: Option<Vec<u8>>,
    current_block_index: usize,
    send_retries: u32,
}

impl EngineInner {
    fn new(transport: Box<dyn Transport>, config: Config, timer: TimerHandle) -> Self {
        EngineInner {
            state: TransferState::Idle,
            config,
            transport,
            timer,
            timer_generation: None,
            rx_buffer: VecDeque::new(),
            use_crc: false,
            failure: None,
            expected_block: 1,
            receive_retries: 0,
            sink: None,
            file_data: None,
            current_block_index: 0,
            send_retries: 0,
        }
    }

    // =========================================================================
    // Buffer ingestion and the drive loop
    // =========================================================================

    fn ingest(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.state == TransferState::Idle || self.state.is_terminal() {
            trace!(
                count = bytes.len(),
                state = ?self.state,
                "discarding inbound bytes with no transfer active"
            );
            return;
        }
        self.rx_buffer.extend(bytes);
        self.process_buffer();
    }

    /// Drive the machine until it cannot make further progress.
    fn process_buffer(&mut self) {
        while !self.rx_buffer.is_empty() {
            let step = match self.state {
                TransferState::ExpectingSoh | TransferState::ReceiverInit => {
                    self.consume_receiver()
                }
                TransferState::SenderWaitInit => self.consume_sender_init(),
                TransferState::WaitingForAck => self.consume_ack(),
                TransferState::WaitingForEotAck => self.consume_eot_ack(),
                state => {
                    // Stray bytes while idle, terminal, or mid-step.
                    let byte = self.rx_buffer.pop_front();
                    trace!(?byte, ?state, "discarding stray byte");
                    Step::Advanced
                }
            };
            if step == Step::NeedMore {
                break;
            }
        }
    }

    /// Pop exactly `count` bytes from the front of the receive buffer.
    fn take_bytes(&mut self, count: usize) -> Vec<u8> {
        debug_assert!(self.rx_buffer.len() >= count);
        self.rx_buffer.drain(..count).collect()
    }

    // =========================================================================
    // Timer plumbing
    // =========================================================================

    fn arm_timer(&mut self, delay: Duration) {
        self.timer_generation = Some(self.timer.arm(delay));
    }

    fn cancel_timer(&mut self) {
        if self.timer_generation.take().is_some() {
            self.timer.cancel();
        }
    }

    /// Entry point for the timer thread. Bails out when the fired
    /// deadline is no longer the current one.
    fn on_timer_fired(&mut self, generation: u64) {
        if self.timer_generation != Some(generation) {
            trace!(generation, "ignoring stale deadline");
            return;
        }
        self.timer_generation = None;

        match self.state {
            TransferState::ExpectingSoh => self.receiver_timeout(),
            TransferState::SenderWaitInit
            | TransferState::WaitingForAck
            | TransferState::WaitingForEotAck => self.sender_timeout(),
            state => trace!(?state, "timeout ignored in state"),
        }
    }

    // =========================================================================
    // Outbound writes and failure transitions
    // =========================================================================

    /// Write protocol bytes out. In a terminal state the write is
    /// suppressed; a transport error tears the transfer down to
    /// [`TransferState::Error`] without emitting CAN.
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), ()> {
        if self.state.is_terminal() {
            trace!(state = ?self.state, "suppressing outbound bytes in terminal state");
            return Ok(());
        }
        match self.transport.send(bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "transport send failed");
                self.fail_transport(&e);
                Err(())
            }
        }
    }

    fn fail_transport(&mut self, error: &std::io::Error) {
        self.cancel_timer();
        self.record_failure(TransferError::Io(error.to_string()));
        self.state = TransferState::Error;
        self.close_resources();
        self.rx_buffer.clear();
    }

    /// Sink write failure: the line is still up, so tell the peer with
    /// `CAN CAN` before landing in [`TransferState::Error`].
    fn fail_sink(&mut self, error: &std::io::Error) {
        warn!(error = %error, "sink write failed");
        self.cancel_timer();
        self.record_failure(TransferError::Io(error.to_string()));
        let _ = self.send_bytes(&[CAN, CAN]);
        self.state = TransferState::Error;
        self.close_resources();
        self.rx_buffer.clear();
    }

    /// First recorded cause wins.
    fn record_failure(&mut self, error: TransferError) {
        self.failure.get_or_insert(error);
    }

    // =========================================================================
    // Abort and teardown
    // =========================================================================

    fn abort(&mut self, origin: AbortOrigin) {
        if self.state.is_terminal() {
            return;
        }
        self.cancel_timer();

        match origin {
            AbortOrigin::Local => {
                if self.state != TransferState::Idle {
                    debug!("emitting CAN CAN");
                    // Best effort: the transfer is being torn down
                    // either way, and send_bytes already records a
                    // transport failure.
                    let _ = self.send_bytes(&[CAN, CAN]);
                }
            }
            AbortOrigin::Remote => {
                self.record_failure(TransferError::RemoteCancelled);
            }
        }

        if !self.state.is_terminal() {
            self.state = TransferState::Aborted;
        }
        self.close_resources();
        self.rx_buffer.clear();
        warn!(?origin, "transfer aborted");
    }

    fn close_resources(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!(error = %e, "failed to close sink");
            }
        }
        self.file_data = None;
    }
}
