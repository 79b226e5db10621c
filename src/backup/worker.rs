//! Single-threaded background task runner for backup rotation.
//!
//! Tasks are fire-and-forget and run strictly one after another on a
//! dedicated thread, so two rotations can never overlap. There is no
//! cancellation: once submitted, a task runs to completion. Dropping the
//! worker closes the queue, drains whatever is left, and joins the thread.
//!
//! The channel is a `tokio::sync::mpsc` queue consumed with `blocking_recv`,
//! so the worker needs no async runtime. `flush()` blocks the calling thread
//! and must not be called from inside an async context.

use log::{debug, error};
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts fire-and-forget tasks and executes them sequentially.
pub trait BackgroundTaskRunner: Send + Sync {
    /// Queue a task. Never blocks on the task itself.
    fn submit(&self, task: Task);

    /// Block until every task submitted before this call has finished.
    fn flush(&self);
}

enum Message {
    Run(Task),
    Flush(oneshot::Sender<()>),
}

/// [`BackgroundTaskRunner`] backed by one named OS thread.
pub struct SequentialWorker {
    sender: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SequentialWorker {
    /// Spawn the worker thread.
    pub fn new(name: &str) -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        Message::Run(task) => {
                            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                                error!("Background task panicked");
                            }
                        }
                        Message::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!("Background worker queue closed");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, message: Message) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }
}

impl BackgroundTaskRunner for SequentialWorker {
    fn submit(&self, task: Task) {
        if !self.send(Message::Run(task)) {
            error!("Background worker stopped, dropping task");
        }
    }

    fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(Message::Flush(done)) {
            let _ = wait.blocking_recv();
        }
    }
}

impl Drop for SequentialWorker {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Background worker thread panicked");
            }
        }
    }
}

/// Runs tasks immediately on the submitting thread.
///
/// Useful where backups should complete before `save()` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

impl BackgroundTaskRunner for InlineRunner {
    fn submit(&self, task: Task) {
        task();
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_order() {
        let worker = SequentialWorker::new("test-worker").unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            worker.submit(Box::new(move || {
                if i % 5 == 0 {
                    thread::sleep(Duration::from_millis(2));
                }
                seen.lock().push(i);
            }));
        }
        worker.flush();

        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let worker = SequentialWorker::new("test-worker").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        worker.submit(Box::new(|| panic!("boom")));
        let c = Arc::clone(&counter);
        worker.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        worker.flush();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let worker = SequentialWorker::new("test-worker").unwrap();
            for _ in 0..5 {
                let c = Arc::clone(&counter);
                worker.submit(Box::new(move || {
                    thread::sleep(Duration::from_millis(1));
                    c.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_inline_runner() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        InlineRunner.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
