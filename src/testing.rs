//! Test doubles shared by the unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::core::constants::{BLOCK_SIZE, SUB};
use crate::core::{BlockSink, Transport};
use crate::engine::{TransferState, XmodemEngine};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport that records everything written to it.
#[derive(Clone)]
pub(crate) struct MockTransport {
    written: Arc<Mutex<Vec<u8>>>,
    fail_next: Arc<AtomicBool>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        MockTransport {
            written: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Everything written so far, in order.
    pub(crate) fn written(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }

    pub(crate) fn clear(&self) {
        lock(&self.written).clear();
    }

    /// Make the next `send` fail with a broken-pipe error.
    pub(crate) fn fail_next_send(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock send failure"));
        }
        lock(&self.written).extend_from_slice(bytes);
        Ok(())
    }
}

#[derive(Default)]
struct MemorySinkState {
    data: Vec<u8>,
    closed: bool,
    fail_next_write: bool,
}

/// In-memory [`BlockSink`] with the same trim semantics as a file.
#[derive(Clone, Default)]
pub(crate) struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        lock(&self.state).data.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub(crate) fn fail_next_write(&self) {
        lock(&self.state).fail_next_write = true;
    }
}

impl BlockSink for MemorySink {
    fn write_block(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(io::Error::new(io::ErrorKind::Other, "mock write failure"));
        }
        state.data.extend_from_slice(payload);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        lock(&self.state).closed = true;
        Ok(())
    }

    fn trim_padding(&mut self) -> io::Result<u64> {
        let mut state = lock(&self.state);
        let len = state.data.len();
        let window = len.min(BLOCK_SIZE);
        let keep = match state.data[len - window..]
            .iter()
            .rposition(|&b| b != SUB)
        {
            Some(position) => len - window + position + 1,
            None => len - window,
        };
        state.data.truncate(keep);
        Ok(state.data.len() as u64)
    }
}

/// Poll until the engine reaches `target` or `timeout` elapses.
pub(crate) fn wait_for_state(
    engine: &XmodemEngine,
    target: TransferState,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if engine.current_state() == target {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    engine.current_state() == target
}
