//! Store error types.

/// Errors from session stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// No snapshot under the requested id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Snapshot written by an incompatible version.
    #[error("unsupported snapshot version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Version found in the payload.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },

    /// A stored row has an unreadable column.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Column name.
        column: &'static str,
        /// Decoder message.
        detail: String,
    },

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(String),

    /// Blocking task failed to complete.
    #[error("task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::NotFound(_) => "not_found",
            Self::Serialization(_) => "serialization",
            Self::UnsupportedVersion { .. } => "version",
            Self::CorruptRow { .. } => "corrupt_row",
            Self::Io(_) => "io",
            Self::Task(_) => "task",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_) | Self::Task(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
