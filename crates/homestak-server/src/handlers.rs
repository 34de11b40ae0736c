use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::Request;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::auth::verify_spec_token;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn list_specs(State(state): State<AppState>) -> impl IntoResponse {
    let manifests = state.manifests.read().await;
    let mut identities: Vec<&String> = manifests.keys().collect();
    identities.sort();
    Json(json!({ "specs": identities }))
}

/// `GET /spec/{identity}` — provisioning-token authenticated; the token's
/// identity claim MUST equal the path identity.
pub async fn get_spec(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    request: Request<axum::body::Body>,
) -> Result<impl IntoResponse, ApiError> {
    let raw_token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(ApiError::unauthorized)?;

    verify_spec_token(&state, &identity, raw_token)?;

    let manifests = state.manifests.read().await;
    let manifest = manifests
        .get(&identity)
        .ok_or_else(|| ApiError::not_found(format!("no spec named '{identity}'")))?;

    Ok(Json(manifest.clone()))
}

/// `GET /{repo}.git` — read-only listing of the synthetic `_working`
/// branch, i.e. the live contents of the repo's working tree directory on
/// disk. This repo carries no git object-database crate, so the listing
/// is produced by walking the filesystem rather than speaking real git
/// wire protocol; `repo_file` below is the part of the contract ("simple
/// bootstrap fetches") that matters in practice.
pub async fn repo_listing(
    State(state): State<AppState>,
    Path(repo_git): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = repo_name(&repo_git)?;
    let root = state.repo_root.join(repo);
    if !root.is_dir() {
        return Err(ApiError::not_found(format!("no repo named '{repo}'")));
    }
    let files = walk_files(&root).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "branch": "_working", "files": files })))
}

/// `GET /{repo}.git/{path}` — a single file's contents from `_working`.
pub async fn repo_file(
    State(state): State<AppState>,
    Path((repo_git, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = repo_name(&repo_git)?;
    let root = state.repo_root.join(repo);
    let target = root.join(&path);
    let canonical_root = root.canonicalize().unwrap_or(root.clone());
    let canonical_target = target
        .canonicalize()
        .map_err(|_| ApiError::not_found(format!("no file '{path}' in repo '{repo}'")))?;
    if !canonical_target.starts_with(&canonical_root) {
        return Err(ApiError::not_found("path escapes repo root"));
    }
    tokio::fs::read(&canonical_target)
        .await
        .map_err(|_| ApiError::not_found(format!("no file '{path}' in repo '{repo}'")))
}

fn repo_name(repo_git: &str) -> Result<&str, ApiError> {
    repo_git
        .strip_suffix(".git")
        .ok_or_else(|| ApiError::not_found(format!("'{repo_git}' is not a .git repo path")))
}

fn walk_files(root: &std::path::Path) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.display().to_string());
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestak_domain::Settings;
    use homestak_token::TokenService;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn test_state(repo_root: std::path::PathBuf) -> AppState {
        let mut manifests = HashMap::new();
        manifests.insert(
            "lab".to_string(),
            homestak_domain::Manifest {
                schema_version: 2,
                name: "lab".into(),
                settings: Settings::default(),
                nodes: vec![],
            },
        );
        AppState {
            manifests: Arc::new(RwLock::new(manifests)),
            tokens: Arc::new(TokenService::new(TokenService::generate_key())),
            bearer_token: Arc::new("test-bearer".into()),
            repo_root: Arc::new(repo_root),
        }
    }

    #[tokio::test]
    async fn get_spec_rejects_identity_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf());
        let token = state
            .tokens
            .mint("someone-else", chrono::Duration::seconds(60))
            .unwrap();
        let req = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let result = get_spec(State(state), Path("lab".to_string()), req).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_spec_succeeds_when_identity_matches() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf());
        let token = state.tokens.mint("lab", chrono::Duration::seconds(60)).unwrap();
        let req = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(get_spec(State(state), Path("lab".to_string()), req)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn repo_file_reads_from_working_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("site")).unwrap();
        std::fs::write(dir.path().join("site/hello.txt"), b"hi").unwrap();
        let state = test_state(dir.path().to_path_buf());
        let resp = repo_file(
            State(state),
            Path(("site.git".to_string(), "hello.txt".to_string())),
        )
        .await
        .unwrap()
        .into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hi");
    }

    #[tokio::test]
    async fn repo_file_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("site")).unwrap();
        let state = test_state(dir.path().to_path_buf());
        let result = repo_file(
            State(state),
            Path(("site.git".to_string(), "../../etc/passwd".to_string())),
        )
        .await;
        assert!(result.is_err());
    }
}
