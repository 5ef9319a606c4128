//! Restartable one-shot timer
//!
//! Backs the process responsiveness check and the renderer-side paint
//! coalescing timer. One worker thread per timer; `start` re-arms, `stop`
//! disarms, the callback runs on the worker thread with no locks held.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct TimerState {
    deadline: Option<Instant>,
    generation: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// A one-shot timer that can be re-armed or cancelled at any time.
pub struct Timer {
    shared: Arc<TimerShared>,
}

impl Timer {
    /// Create a timer; `callback` fires on the timer's worker thread each
    /// time an armed deadline elapses without being restarted or stopped.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: None,
                generation: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        thread::spawn(move || {
            let mut state = worker.state.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                match state.deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            let generation = state.generation;
                            state.deadline = None;
                            drop(state);
                            callback();
                            state = worker.state.lock().unwrap();
                            // A restart during the callback owns the next fire.
                            if state.generation != generation {
                                continue;
                            }
                        } else {
                            let (guard, _) = worker
                                .condvar
                                .wait_timeout(state, deadline - now)
                                .unwrap();
                            state = guard;
                        }
                    }
                    None => {
                        state = worker.condvar.wait(state).unwrap();
                    }
                }
            }
        });

        Self { shared }
    }

    /// Arm (or re-arm) the timer to fire after `delay`.
    pub fn start(&self, delay: Duration) {
        let mut state = self.shared.state.lock().unwrap();
        state.deadline = Some(Instant::now() + delay);
        state.generation += 1;
        self.shared.condvar.notify_one();
    }

    /// Disarm the timer; a pending fire is cancelled.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.deadline = None;
        state.generation += 1;
        self.shared.condvar.notify_one();
    }

    /// Whether a deadline is currently armed.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().unwrap().deadline.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.shutdown = true;
        state.generation += 1;
        self.shared.condvar.notify_one();
    }
}
