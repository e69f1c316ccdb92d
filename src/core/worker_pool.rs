//! Bounded pool of worker threads executing chunks of a parallel step.
//!
//! Reading stays on the calling thread: the producer closure is only ever
//! invoked there, and produced tasks are handed to the workers through a
//! bounded channel. A full channel blocks the producer.
//!
//! Outcomes are aggregated in a [`PoolReport`] guarded by a mutex, each
//! outcome being applied in one critical section. The first failure stops the
//! producer; tasks already handed to workers still run to completion and are
//! still recorded.

use std::thread;

use crossbeam_channel::bounded;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::BatchError;

/// Aggregated outcome of every task submitted to a [`WorkerPool`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PoolReport {
    /// Tasks handed to a worker
    pub submitted: usize,
    /// Tasks whose handler returned `Ok`
    pub succeeded: usize,
    /// Failed tasks, including producer failures and lost workers
    pub failed: usize,
    /// Sum of the counts returned by successful handlers
    pub written: usize,
    /// Earliest recorded failure
    pub first_error: Option<BatchError>,
}

impl PoolReport {
    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }

    fn record(&mut self, outcome: Result<usize, BatchError>) {
        match outcome {
            Ok(written) => {
                self.succeeded += 1;
                self.written += written;
            }
            Err(error) => self.record_failure(error),
        }
    }

    fn record_failure(&mut self, error: BatchError) {
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }
}

/// A fixed number of workers fed through a queue of fixed capacity.
///
/// A capacity of `0` turns the queue into a hand-off: the producer blocks
/// until a worker is free to take the task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerPool {
    workers: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Creates a pool. At least one worker is always started.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_capacity,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Runs `produce` on the calling thread until it returns `Ok(None)`, an
    /// error, or a task fails, and runs `handle` on the workers for every
    /// produced task.
    ///
    /// `handle` returns the number of items it wrote. Returns once every
    /// worker has drained the queue and stopped.
    pub fn run<T, P, H>(&self, mut produce: P, handle: H) -> PoolReport
    where
        T: Send,
        P: FnMut() -> Result<Option<T>, BatchError>,
        H: Fn(T) -> Result<usize, BatchError> + Sync,
    {
        let report = Mutex::new(PoolReport::default());

        thread::scope(|scope| {
            let (sender, receiver) = bounded::<T>(self.queue_capacity);
            let handle = &handle;
            let report_ref = &report;

            let workers: Vec<_> = (0..self.workers)
                .map(|index| {
                    let receiver = receiver.clone();
                    scope.spawn(move || {
                        for task in receiver.iter() {
                            let outcome = handle(task);
                            report_ref.lock().record(outcome);
                        }
                        debug!("Worker {} stopped", index);
                    })
                })
                .collect();
            drop(receiver);

            loop {
                if report.lock().first_error.is_some() {
                    debug!("A task failed, no further task is submitted");
                    break;
                }

                match produce() {
                    Ok(Some(task)) => {
                        if sender.send(task).is_err() {
                            warn!("Every worker stopped, no further task is submitted");
                            break;
                        }
                        report.lock().submitted += 1;
                    }
                    Ok(None) => break,
                    Err(error) => {
                        report.lock().record_failure(error);
                        break;
                    }
                }
            }

            // Closing the channel lets the workers drain it and stop.
            drop(sender);

            for (index, worker) in workers.into_iter().enumerate() {
                if worker.join().is_err() {
                    report
                        .lock()
                        .record_failure(BatchError::Step(format!("worker {} panicked", index)));
                }
            }
        });

        report.into_inner()
    }
}
