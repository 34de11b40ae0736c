use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use homestak_token::Token;

use crate::state::AppState;

/// Requires the operator-issued bearer token used by the `.git` routes.
/// Returns bare 401 text with no JSON body, per spec.md's two-scheme
/// authentication table.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match bearer_token_from(&request) {
        Some(token) if token == state.bearer_token.as_str() => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
    }
}

fn bearer_token_from(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Verifies a provisioning token against the path's claimed identity for
/// `/spec/{identity}`. Not wired as middleware (the identity lives in the
/// path, not available uniformly across routes) — called directly from
/// the handler.
pub fn verify_spec_token(
    state: &AppState,
    identity: &str,
    raw_token: &str,
) -> Result<(), crate::error::ApiError> {
    let verified = state
        .tokens
        .verify(&Token(raw_token.to_string()))
        .map_err(|_| crate::error::ApiError::unauthorized())?;
    if verified.identity != identity {
        return Err(crate::error::ApiError::unauthorized());
    }
    Ok(())
}
