//! Named background threads that can be joined with a deadline

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A spawned thread plus a completion signal.
///
/// The thread owns the sending half of a zero-capacity channel; it is dropped
/// when the closure returns or unwinds, which disconnects the receiver and
/// lets `join_timeout` tell a finished thread from a stuck one.
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: &str, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx): (Sender<()>, Receiver<()>) = bounded(0);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                f();
            })?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            done_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns true if the thread was joined. On timeout the thread is
    /// detached and false is returned. Calling this again after either
    /// outcome returns true immediately.
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if handle.join().is_err() {
                    log::warn!("Worker '{}' panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Worker '{}' did not stop within {:?}, detaching",
                    self.name,
                    timeout
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_join_finished_worker() {
        let mut worker = Worker::spawn("quick", || {}).unwrap();
        assert!(worker.join_timeout(Duration::from_secs(1)));
        assert!(worker.is_finished());
        assert!(worker.join_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_join_times_out_on_stuck_worker() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let mut worker = Worker::spawn("stuck", move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        assert!(!worker.join_timeout(Duration::from_millis(30)));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_panicking_worker_still_joins() {
        let mut worker = Worker::spawn("panics", || panic!("boom")).unwrap();
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }
}
