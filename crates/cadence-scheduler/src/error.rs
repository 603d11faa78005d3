use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A schedule configuration string could not be parsed.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A job definition is malformed (bad run time limit, unknown schedule type…).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The job type identifier is not registered with the scheduler.
    #[error("Unknown job type: {job_type}")]
    UnknownJobType { job_type: String },

    /// Persisting a descriptor change failed, or the descriptor is read-only.
    /// The in-memory change may already have been applied.
    #[error("Job modification failed: {0}")]
    Modification(String),

    /// The scheduler variant does not support the operation at runtime.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Job already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Job not registered: {name}")]
    NotRegistered { name: String },

    /// No worker facility could be obtained (e.g. no tokio runtime).
    #[error("Worker pool error: {0}")]
    Worker(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Core(#[from] cadence_core::CoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
