use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature verification failed")]
    BadSignature,

    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    #[error("no signing key configured")]
    NoKey,
}
