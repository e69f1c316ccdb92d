use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    /// An input (file, query cursor) could not be opened.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The input pattern resolved to zero resources.
    #[error("No resources matched pattern: {0}")]
    NoResourcesMatched(String),

    /// A line did not split into the expected fields.
    #[error("Malformed record in {resource} at line {line}: {reason} [{raw}]")]
    MalformedRecord {
        resource: String,
        line: u64,
        raw: String,
        reason: String,
    },

    /// The processor rejected one record.
    #[error("Transform error for record {record}: {reason}")]
    TransformError { record: String, reason: String },

    /// A full chunk could not be persisted.
    #[error("Sink failure: {0}")]
    SinkFailure(String),

    /// A launch was refused because a run is still in flight.
    #[error("Job already running: {0}")]
    JobAlreadyRunning(String),

    /// A post-job side effect (archiving) failed.
    #[error("Unexpected job outcome: {0}")]
    UnexpectedJobOutcome(String),

    /// A step reached the FAILED status.
    #[error("Step failed: {0}")]
    Step(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}
