// ==================================================================================
// `pool` module: bounded worker pool with a single collector
// ==================================================================================
use anyhow::Result;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Shared stop flag. Workers stop picking up queued units once it is set, and
/// running tool invocations poll it and kill their child process.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs `f`, turning a panic into its message.
pub fn isolate<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        WorkerPool {
            workers,
            queue_capacity: workers * 2,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Feeds `items` through a bounded queue to the workers and hands every
    /// result to `collect` on the calling thread, in completion order.
    ///
    /// `collect` is the only consumer of results. If it fails, `cancel` is set,
    /// queued items are skipped and the error is returned once workers drain.
    pub fn run<T, R, F, C>(&self, items: Vec<T>, cancel: &CancelToken, job: F, mut collect: C) -> Result<()>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
        C: FnMut(R) -> Result<()>,
    {
        thread::scope(|s| {
            let (job_tx, job_rx) = crossbeam_channel::bounded::<T>(self.queue_capacity);
            let (result_tx, result_rx) = crossbeam_channel::bounded::<R>(self.queue_capacity);

            let feeder_cancel = cancel.clone();
            s.spawn(move || {
                for item in items {
                    if feeder_cancel.is_cancelled() || job_tx.send(item).is_err() {
                        break;
                    }
                }
            });

            let job = &job;
            for _ in 0..self.workers {
                let (rx, tx) = (job_rx.clone(), result_tx.clone());
                let worker_cancel = cancel.clone();
                s.spawn(move || {
                    // Keep draining after cancellation so the feeder never blocks.
                    for item in rx {
                        if worker_cancel.is_cancelled() {
                            continue;
                        }
                        let _ = tx.send(job(item));
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            let mut outcome = Ok(());
            for result in result_rx.iter() {
                if let Err(e) = collect(result) {
                    cancel.cancel();
                    outcome = Err(e);
                    break;
                }
            }
            drop(result_rx);
            outcome
        })
    }
}
