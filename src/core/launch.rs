//! Launching jobs, once or on a fixed interval.
//!
//! A [`JobLauncher`] allows at most one in-flight run. Every accepted launch
//! is identified by a run id taken from the wall clock in milliseconds and
//! forced to be strictly increasing, so two launches never share an id.
//!
//! The [`Scheduler`] ticks on a dedicated thread while the job itself runs on
//! the thread that called [`Scheduler::run`]. A tick arriving while a run is in
//! flight is refused with [`BatchError::JobAlreadyRunning`]; it is neither
//! queued nor run concurrently.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use chrono::Utc;
use crossbeam_channel::{Receiver, bounded, select, tick};
use log::{debug, info, warn};

use crate::error::BatchError;

use super::job::{Job, JobExecution};

/// Guards against overlapping runs and hands out run ids.
#[derive(Debug, Default)]
pub struct JobLauncher {
    running: AtomicBool,
    last_run_id: AtomicU64,
}

impl JobLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reserves the single run slot.
    ///
    /// The slot is released when the returned permit is dropped.
    pub fn try_acquire(&self, job_name: &str) -> Result<LaunchPermit<'_>, BatchError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BatchError::JobAlreadyRunning(job_name.to_string()));
        }

        Ok(LaunchPermit {
            launcher: self,
            run_id: self.next_run_id(),
        })
    }

    /// Runs `job` to completion with a fresh run id, unless a run is in flight.
    pub fn launch(&self, job: &dyn Job) -> Result<JobExecution, BatchError> {
        let permit = self.try_acquire(job.get_name())?;
        Ok(permit.run(job))
    }

    fn next_run_id(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let previous = self
            .last_run_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_default();
        now.max(previous + 1)
    }
}

/// Exclusive right to run one job, obtained from [`JobLauncher::try_acquire`].
#[derive(Debug)]
pub struct LaunchPermit<'l> {
    launcher: &'l JobLauncher,
    run_id: u64,
}

impl LaunchPermit<'_> {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Runs `job` and releases the slot.
    pub fn run(self, job: &dyn Job) -> JobExecution {
        info!("Launching job {} as run {}", job.get_name(), self.run_id);
        job.run(self.run_id)
    }
}

impl Drop for LaunchPermit<'_> {
    fn drop(&mut self) {
        self.launcher.running.store(false, Ordering::Release);
    }
}

/// What a scheduler did until it was stopped.
#[derive(Debug, Default)]
pub struct SchedulerReport {
    /// Executions of every accepted launch, in launch order
    pub executions: Vec<JobExecution>,
    /// Ticks refused because a run was in flight
    pub rejected: usize,
}

/// Launches a job every `interval`.
pub struct Scheduler<'l> {
    launcher: &'l JobLauncher,
    interval: Duration,
}

impl<'l> Scheduler<'l> {
    pub fn new(launcher: &'l JobLauncher, interval: Duration) -> Self {
        Self { launcher, interval }
    }

    /// Launches `job` on every tick until `shutdown` yields a message or is
    /// disconnected. A run in progress at shutdown is completed first.
    pub fn run<S: Send>(&self, job: &dyn Job, shutdown: &Receiver<S>) -> SchedulerReport {
        let mut executions = Vec::new();
        let rejected = AtomicUsize::new(0);

        info!(
            "Scheduling job {} every {} ms",
            job.get_name(),
            self.interval.as_millis()
        );

        thread::scope(|scope| {
            let (permit_sender, permit_receiver) = bounded::<LaunchPermit<'l>>(1);
            let job_name = job.get_name().to_string();
            let launcher = self.launcher;
            let interval = self.interval;
            let rejected = &rejected;

            scope.spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => match launcher.try_acquire(&job_name) {
                            Ok(permit) => {
                                debug!("Tick accepted as run {}", permit.run_id());
                                if permit_sender.send(permit).is_err() {
                                    break;
                                }
                            }
                            Err(error) => {
                                rejected.fetch_add(1, Ordering::Relaxed);
                                warn!("Scheduled launch refused: {}", error);
                            }
                        },
                        recv(shutdown) -> _ => {
                            info!("Scheduler of job {} stopping", job_name);
                            break;
                        }
                    }
                }
            });

            for permit in permit_receiver.iter() {
                executions.push(permit.run(job));
            }
        });

        SchedulerReport {
            executions,
            rejected: rejected.into_inner(),
        }
    }
}
