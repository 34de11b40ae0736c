use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution state not found for manifest '{0}'")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal store error: {0}")]
    Internal(String),

    /// Returned when the run-level file lock is already held.
    #[error("execution state lock conflict: already locked by {holder}")]
    LockConflict { holder: String },
}
