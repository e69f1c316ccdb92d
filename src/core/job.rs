use std::time::{Duration, Instant};

use log::{error, info, warn};
use uuid::Uuid;

use crate::error::BatchError;

use super::{
    build_name,
    step::{BatchStatus, Step, StepExecution},
};

/// Represents a job that can be executed.
///
/// A job is a container for a sequence of steps executed in order. Running a
/// job blocks the caller until every step reached a terminal state or one of
/// them failed.
pub trait Job {
    /// Runs the job as the run identified by `run_id`.
    ///
    /// The outcome is reported through the returned execution's status.
    fn run(&self, run_id: u64) -> JobExecution;

    fn get_name(&self) -> &str;
}

/// Represents the execution of a job.
#[derive(Debug, Clone)]
pub struct JobExecution {
    /// Unique identifier of this execution
    pub id: Uuid,
    /// Identifier given by the launcher, unique per launch
    pub run_id: u64,
    pub job_name: String,
    /// `Completed` only if every step completed
    pub status: BatchStatus,
    /// The time when the job started executing
    pub start_time: Instant,
    /// The time when the job finished executing
    pub end_time: Instant,
    /// The total duration of the job execution
    pub duration: Duration,
    /// Executions of the steps that were started, in order
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    /// Execution of a run that failed before its first step started.
    pub fn failed(job_name: &str, run_id: u64) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            job_name: job_name.to_string(),
            status: BatchStatus::Failed,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            step_executions: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub fn step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|step| step.name == name)
    }
}

/// Hook invoked once a job reached its terminal status.
///
/// Errors are logged by the job and never change its recorded status.
/// Closures taking a `&JobExecution` can be registered directly.
pub trait JobExecutionListener {
    fn after_job(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
}

impl<F> JobExecutionListener for F
where
    F: Fn(&JobExecution) -> Result<(), BatchError>,
{
    fn after_job(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        self(job_execution)
    }
}

/// Represents an instance of a job.
///
/// A `JobInstance` is created through the [`JobBuilder`]. Its steps run in the
/// order they were added; the first failed step fails the job and the
/// following steps are not started.
pub struct JobInstance<'a> {
    /// Unique identifier for this job instance
    id: Uuid,
    /// Human-readable name for the job
    name: String,
    /// Collection of steps that make up this job, in execution order
    steps: Vec<&'a dyn Step>,
    listeners: Vec<&'a dyn JobExecutionListener>,
}

impl Job for JobInstance<'_> {
    fn run(&self, run_id: u64) -> JobExecution {
        let start_time = Instant::now();

        info!(
            "Start of job: {}, id: {}, run: {}",
            self.name, self.id, run_id
        );

        let mut status = BatchStatus::Running;
        let mut step_executions = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let mut step_execution = StepExecution::new(step.get_name());
            let result = step.execute(&mut step_execution);
            step_executions.push(step_execution);

            if let Err(error) = result {
                warn!("Job {} stopped: {}", self.name, error);
                status = BatchStatus::Failed;
                break;
            }
        }

        if status == BatchStatus::Running {
            status = BatchStatus::Completed;
        }

        info!(
            "End of job: {}, id: {}, run: {}, status: {:?}",
            self.name, self.id, run_id, status
        );

        let end_time = Instant::now();
        let job_execution = JobExecution {
            id: self.id,
            run_id,
            job_name: self.name.clone(),
            status,
            start_time,
            end_time,
            duration: end_time.duration_since(start_time),
            step_executions,
        };

        for listener in &self.listeners {
            if let Err(error) = listener.after_job(&job_execution) {
                error!("Listener of job {} failed: {}", self.name, error);
            }
        }

        job_execution
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

/// Builder for creating a job instance.
///
/// ```rust,no_run,compile_fail
/// use person_batch::core::job::JobBuilder;
///
/// let job = JobBuilder::new()
///     .name("import-persons")
///     .start(&read_step)
///     .next(&export_step)
///     .listener(&archive_listener)
///     .build();
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Collection of steps to be executed, in order
    steps: Vec<&'a dyn Step>,
    listeners: Vec<&'a dyn JobExecutionListener>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    ///
    /// Identical to `next()`, reads better for the first step.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to the job. Steps are executed in the order they are added.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Registers a hook called with the final execution of every run.
    pub fn listener(mut self, listener: &'a dyn JobExecutionListener) -> JobBuilder<'a> {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> JobInstance<'a> {
        JobInstance {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            listeners: self.listeners,
        }
    }
}
