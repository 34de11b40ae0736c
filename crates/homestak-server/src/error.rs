use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Lifecycle and daemonization errors, distinct from request-handling
/// errors ([`ApiError`]).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] homestak_config::ConfigError),

    #[error("token error: {0}")]
    Token(#[from] homestak_token::TokenError),

    #[error("store error: {0}")]
    Store(#[from] homestak_state::StoreError),

    #[error("tls certificate generation failed: {0}")]
    Tls(String),

    #[error("server already bound at {0}")]
    AlreadyRunning(String),

    #[error("no server instance is running for {0}")]
    NotRunning(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

/// Error response shape for the HTTP surface.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        ApiError {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".to_string(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status == StatusCode::UNAUTHORIZED {
            // spec.md requires no body beyond the literal string "Unauthorized".
            return (self.status, "Unauthorized").into_response();
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<homestak_config::ConfigError> for ApiError {
    fn from(e: homestak_config::ConfigError) -> Self {
        ApiError::internal(e.to_string())
    }
}
