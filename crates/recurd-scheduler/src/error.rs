use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Job arguments could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cron expression could not be parsed or never fires.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given name or id exists in the store.
    #[error("Job not found: {job}")]
    JobNotFound { job: String },

    /// Another job already uses this name.
    #[error("Job name already exists: {name}")]
    DuplicateName { name: String },

    /// The function name is not present in the registry.
    #[error("Function is not registered: {name}")]
    InvalidFunction { name: String },

    /// The operation is not allowed in the job's (or engine's) current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl SchedulerError {
    /// Short error code string for admin clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::JobNotFound { .. } => "NOT_FOUND",
            SchedulerError::DuplicateName { .. } => "DUPLICATE_NAME",
            SchedulerError::InvalidFunction { .. } => "INVALID_FUNCTION",
            SchedulerError::InvalidState(_) => "INVALID_STATE",
        }
    }

    pub(crate) fn not_found(job: impl Into<String>) -> Self {
        SchedulerError::JobNotFound { job: job.into() }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
