use thiserror::Error;

/// Errors surfaced by the repository core.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Unknown problem class, instance, solution or asset
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate instance uid on create
    #[error("{0} already exists")]
    Conflict(String),

    /// Payload failed schema validation, or the query references undeclared fields
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Cascade cleanup could not remove every dependent record
    #[error("partial failure: {message}")]
    PartialFailure {
        message: String,
        failures: Vec<String>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("file store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index store error: {0:#}")]
    Index(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

impl RepositoryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
