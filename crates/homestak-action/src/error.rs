use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of action failure modes (spec §7), shared across every
/// component that needs to decide whether a failure is retryable or how to
/// report it to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A condition the Action was waiting on timed out.
    NotReady,
    /// Credential rejected (SSH, token, bearer).
    Unauthorized,
    /// A token (or other time-bounded credential) is past its validity.
    Expired,
    /// A document failed validation.
    Malformed,
    /// State-already-exists or ID collision.
    Conflict,
    /// A required resource (image, credential, node) is absent.
    NotFound,
    /// A delegated sub-run returned failure; the child's own specific kind
    /// is not preserved across the process boundary (§7).
    RemoteFailure,
    /// The streamer or an overall run-level timeout elapsed.
    Timeout,
    /// Operator interrupt.
    Cancelled,
    /// Unexpected condition; a programming error.
    Internal,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("provision failed: {0}")]
    ProvisionFailed(String),

    #[error("destroy failed: {0}")]
    DestroyFailed(String),

    #[error("action not ready: {0}")]
    NotReady(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("token expired: {0}")]
    Expired(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote failure: {0}")]
    RemoteFailure(String),

    #[error("invalid action input: {0}")]
    InvalidInput(String),

    #[error("action timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("internal action error: {0}")]
    Internal(String),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::NotReady(_) => ErrorKind::NotReady,
            ActionError::Unauthorized(_) => ErrorKind::Unauthorized,
            ActionError::Expired(_) => ErrorKind::Expired,
            ActionError::Malformed(_) | ActionError::InvalidInput(_) => ErrorKind::Malformed,
            ActionError::Conflict(_) => ErrorKind::Conflict,
            ActionError::NotFound(_) => ErrorKind::NotFound,
            ActionError::RemoteFailure(_) => ErrorKind::RemoteFailure,
            ActionError::Timeout(_) => ErrorKind::Timeout,
            ActionError::Transport(_) => ErrorKind::RemoteFailure,
            ActionError::Cancelled => ErrorKind::Cancelled,
            ActionError::UnknownAction(_) => ErrorKind::Malformed,
            ActionError::ProvisionFailed(_) | ActionError::DestroyFailed(_) | ActionError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<homestak_token::TokenError> for ActionError {
    fn from(e: homestak_token::TokenError) -> Self {
        match e {
            homestak_token::TokenError::Expired { expired_at } => {
                ActionError::Expired(format!("token expired at {expired_at}"))
            }
            homestak_token::TokenError::Malformed => ActionError::Malformed(e.to_string()),
            homestak_token::TokenError::BadSignature => ActionError::Unauthorized(e.to_string()),
            homestak_token::TokenError::NoKey => ActionError::Internal(e.to_string()),
        }
    }
}
