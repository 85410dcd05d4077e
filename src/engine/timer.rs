//! Single-deadline timer service.
//!
//! One dedicated thread sleeps until the armed deadline and invokes the
//! engine callback with the deadline's generation number. Arming a new
//! deadline cancels the previous one. Cancellation races with firing:
//! a callback that has already been dispatched carries a generation the
//! engine compares against its current one (under the engine lock) and
//! ignores when stale, so a deadline either fires exactly once or is
//! cancelled exactly once.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::trace;

#[derive(Debug)]
struct TimerState {
    deadline: Option<(u64, Instant)>,
    next_generation: u64,
    shutdown: bool,
}

#[derive(Debug)]
struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle used by the engine to arm and cancel deadlines.
#[derive(Debug, Clone)]
pub(crate) struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    /// Arm a deadline `delay` from now, replacing any previous one.
    /// Returns the new deadline's generation.
    pub(crate) fn arm(&self, delay: Duration) -> u64 {
        let mut state = self.shared.lock();
        let generation = state.next_generation;
        state.next_generation += 1;
        state.deadline = Some((generation, Instant::now() + delay));
        self.shared.cv.notify_one();
        generation
    }

    /// Cancel the armed deadline, if any. Idempotent.
    pub(crate) fn cancel(&self) {
        let mut state = self.shared.lock();
        state.deadline = None;
        self.shared.cv.notify_one();
    }
}

/// Owns the timer thread for one engine.
#[derive(Debug)]
pub(crate) struct TimerService {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Create the service without starting the thread; the engine wires
    /// its callback in via [`start`](TimerService::start).
    pub(crate) fn new() -> Self {
        TimerService {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    deadline: None,
                    next_generation: 0,
                    shutdown: false,
                }),
                cv: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Handle for arming and cancelling deadlines.
    pub(crate) fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the scheduler thread. `callback` runs on that thread with
    /// the fired deadline's generation; the timer lock is not held
    /// during the call.
    pub(crate) fn start<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("xmodem-timer".into())
            .spawn(move || run_scheduler(&shared, callback))
            .expect("failed to spawn timer thread");

        *self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop the scheduler thread and wait for it to finish, draining
    /// any in-flight callback. Idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.deadline = None;
            self.shared.cv.notify_one();
        }
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run_scheduler<F: Fn(u64)>(shared: &TimerShared, callback: F) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }
        match state.deadline {
            None => {
                state = shared
                    .cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some((generation, at)) => {
                let now = Instant::now();
                if now >= at {
                    state.deadline = None;
                    drop(state);
                    trace!(generation, "deadline fired");
                    callback(generation);
                    state = shared.lock();
                } else {
                    state = shared
                        .cv
                        .wait_timeout(state, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
