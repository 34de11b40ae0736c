use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

/// Wires the route table. `/health`, `/specs`, and `/spec/:identity` are
/// unauthenticated at the router layer — the last verifies its own
/// provisioning token inline, since the identity it checks against lives
/// in the path, not somewhere `from_fn_with_state` can see uniformly. The
/// `.git` routes carry the operator bearer token as middleware.
pub fn build_app(state: AppState) -> Router {
    let git_routes = Router::new()
        .route("/:repo_git", get(handlers::repo_listing))
        .route("/:repo_git/*path", get(handlers::repo_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/specs", get(handlers::list_specs))
        .route("/spec/:identity", get(handlers::get_spec))
        .merge(git_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use homestak_domain::{Manifest, Settings};
    use homestak_token::TokenService;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::util::ServiceExt;

    fn test_state(repo_root: std::path::PathBuf) -> AppState {
        let mut manifests = HashMap::new();
        manifests.insert(
            "lab".to_string(),
            Manifest {
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
    async fn health_requires_no_auth() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path().to_path_buf()));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn specs_requires_no_auth() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path().to_path_buf()));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/specs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn spec_without_token_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path().to_path_buf()));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/spec/lab")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn spec_with_matching_token_returns_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf());
        let token = state
            .tokens
            .mint("lab", chrono::Duration::seconds(60))
            .unwrap();
        let app = build_app(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/spec/lab")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn git_file_without_bearer_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("site")).unwrap();
        std::fs::write(dir.path().join("site/a.txt"), b"x").unwrap();
        let app = build_app(test_state(dir.path().to_path_buf()));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/site.git/a.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn git_file_with_bearer_returns_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("site")).unwrap();
        std::fs::write(dir.path().join("site/a.txt"), b"x").unwrap();
        let app = build_app(test_state(dir.path().to_path_buf()));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/site.git/a.txt")
                    .header("Authorization", "Bearer test-bearer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
