//! Single-threaded run loop
//!
//! The "client context" of the channel: one dispatch thread executing queued
//! closures in FIFO order. Proxy state is only ever mutated from here, so
//! handlers observe sends and notifications in a single total order.

use std::sync::mpsc::{self, Sender};
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a dispatch thread. Cloning shares the same loop.
#[derive(Clone)]
pub struct RunLoop {
    tx: Sender<Task>,
}

impl RunLoop {
    /// Spawn a new run loop thread. The thread exits when every handle to
    /// the loop has been dropped and the queue has drained.
    pub fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let thread_name = format!("strix-runloop-{name}");
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for task in rx {
                    task();
                }
            })
            .expect("failed to spawn run loop thread");
        Self { tx }
    }

    /// Queue `task` for execution on the loop thread.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Dropped silently if the loop has already shut down.
        let _ = self.tx.send(Box::new(task));
    }

    /// Block until every task queued before this call has executed.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        self.dispatch(move || {
            let _ = tx.send(());
        });
        let _ = rx.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispatch_runs_in_order() {
        let run_loop = RunLoop::new("test");
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = Arc::clone(&log);
            run_loop.dispatch(move || log.lock().unwrap().push(i));
        }
        run_loop.flush();
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_flush_waits_for_queued_work() {
        let run_loop = RunLoop::new("flush");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            run_loop.dispatch(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        run_loop.flush();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_clone_shares_loop() {
        let run_loop = RunLoop::new("clone");
        let other = run_loop.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        other.dispatch(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        run_loop.flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
