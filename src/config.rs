//! Pipeline configuration.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{core::step::TaskExecutor, error::BatchError};

/// How the import step transforms and writes its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One chunk at a time on the thread running the job.
    #[default]
    Sequential,
    /// `pool_size` workers behind a queue of `queue_capacity` chunks.
    ThreadPool,
    /// `concurrency_limit` workers, each chunk handed directly to a free one.
    SimpleAsync,
}

/// Options of the person pipeline.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Records per transactional unit
    pub chunk_size: usize,
    /// Directory scanned for input files
    pub input_dir: PathBuf,
    /// Glob matched against file names of `input_dir`
    pub input_pattern: String,
    /// Directory receiving the export file and the archived inputs
    pub output_path: PathBuf,
    pub output_file_name: String,
    /// Maximum concurrent workers of the thread pool
    pub pool_size: usize,
    /// Pending-chunk backlog of the thread pool
    pub queue_capacity: usize,
    pub schedule_interval_ms: u64,
    /// Maximum concurrent chunks of the simple async executor
    pub concurrency_limit: usize,
    pub database_url: String,
    pub execution_mode: ExecutionMode,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            input_dir: PathBuf::from("input"),
            input_pattern: "persons_*.csv".to_string(),
            output_path: PathBuf::from("output"),
            output_file_name: "persons_output.csv".to_string(),
            pool_size: 10,
            queue_capacity: 10,
            schedule_interval_ms: 10_000,
            concurrency_limit: 5,
            database_url: "sqlite://person.db".to_string(),
            execution_mode: ExecutionMode::Sequential,
        }
    }
}

impl BatchConfig {
    /// Checks value ranges. `queue_capacity` may be 0 (hand-off queue).
    pub fn validate(&self) -> Result<(), BatchError> {
        let invalid = |message: &str| Err(BatchError::Configuration(message.to_string()));

        if self.chunk_size == 0 {
            return invalid("chunk_size must be greater than 0");
        }
        if self.pool_size == 0 {
            return invalid("pool_size must be greater than 0");
        }
        if self.concurrency_limit == 0 {
            return invalid("concurrency_limit must be greater than 0");
        }
        if self.schedule_interval_ms == 0 {
            return invalid("schedule_interval_ms must be greater than 0");
        }
        if self.input_pattern.trim().is_empty() {
            return invalid("input_pattern must not be empty");
        }
        if self.output_file_name.trim().is_empty() {
            return invalid("output_file_name must not be empty");
        }
        if self.database_url.trim().is_empty() {
            return invalid("database_url must not be empty");
        }
        Ok(())
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(input: &str) -> Result<Self, BatchError> {
        let config: BatchConfig = serde_json::from_str(input)
            .map_err(|e| BatchError::Configuration(format!("parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let input = fs::read_to_string(path).map_err(|e| {
            BatchError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&input)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    pub fn output_file(&self) -> PathBuf {
        self.output_path.join(&self.output_file_name)
    }

    /// Executor of the import step.
    pub fn task_executor(&self) -> TaskExecutor {
        match self.execution_mode {
            ExecutionMode::Sequential => TaskExecutor::Sequential,
            ExecutionMode::ThreadPool => TaskExecutor::ThreadPool {
                pool_size: self.pool_size,
                queue_capacity: self.queue_capacity,
            },
            ExecutionMode::SimpleAsync => TaskExecutor::SimpleAsync {
                concurrency_limit: self.concurrency_limit,
            },
        }
    }
}
