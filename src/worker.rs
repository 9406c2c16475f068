//! Threaded-action runner (C8): a fixed-size worker pool that runs an
//! action's `run()` off the hook thread, then delivers its result to
//! `finished()` — mirroring `ThreadedAction`'s `starting`/`run`/`finished`
//! lifecycle, minus the `starting()` call, which the caller makes
//! synchronously, before handing the job to the pool, while still holding
//! whatever lock guards engine state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::error;

const POOL_SIZE: usize = 16;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of at most [`POOL_SIZE`] worker threads that run queued
/// closures. Dropping the pool joins every worker after closing the
/// queue.
pub struct ActionRunner {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ActionRunner {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..POOL_SIZE)
            .map(|id| spawn_worker(id, Arc::clone(&receiver)))
            .collect();
        ActionRunner { sender: Some(sender), workers }
    }

    /// Submits `run`, running it on the pool; once it returns (or panics),
    /// `finished` is called with the result — skipped if `run` panicked,
    /// matching the reference implementation's "finished is simply never
    /// called if run() raised" behaviour.
    pub fn submit<T, R, F>(&self, run: R, finished: F)
    where
        T: Send + 'static,
        R: FnOnce() -> T + Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(run));
            match result {
                Ok(value) => finished(value),
                Err(_) => error!("threaded action panicked"),
            }
        });
        if let Some(sender) = &self.sender {
            let _ = sender.send(job);
        }
    }
}

fn spawn_worker(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("keytap-worker-{id}"))
        .spawn(move || loop {
            let job = {
                let rx = receiver.lock().unwrap();
                rx.recv()
            };
            match job {
                Ok(job) => job(),
                Err(_) => break, // channel closed: pool is shutting down
            }
        })
        .expect("failed to spawn worker thread")
}

impl Default for ActionRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActionRunner {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_and_finished_both_execute() {
        let runner = ActionRunner::new();
        let result = Arc::new(AtomicUsize::new(0));
        let result_clone = Arc::clone(&result);
        let (tx, rx) = mpsc::channel();
        runner.submit(
            move || 42,
            move |value| {
                result_clone.store(value, Ordering::SeqCst);
                let _ = tx.send(());
            },
        );
        rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn panicking_run_skips_finished() {
        let runner = ActionRunner::new();
        let finished_called = Arc::new(AtomicUsize::new(0));
        let finished_clone = Arc::clone(&finished_called);
        let (tx, rx) = mpsc::channel::<()>();
        runner.submit(
            move || -> () { panic!("boom") },
            move |()| {
                finished_clone.store(1, Ordering::SeqCst);
            },
        );
        // Give the worker a moment; since finished never fires we just
        // confirm the pool stays alive afterwards.
        let _ = tx;
        thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(finished_called.load(Ordering::SeqCst), 0);
        let _ = rx.try_recv();
    }
}
