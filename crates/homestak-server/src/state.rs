use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use homestak_domain::Manifest;
use homestak_token::TokenService;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ServerError;

/// Shared state behind every route: the cached set of manifests this
/// server can resolve specs from, the provisioning-token service used to
/// authenticate `/spec/{identity}`, and the bare mirror's working tree
/// directory served by the `.git` routes.
#[derive(Clone)]
pub struct AppState {
    pub manifests: Arc<RwLock<HashMap<String, Manifest>>>,
    pub tokens: Arc<TokenService>,
    pub bearer_token: Arc<String>,
    pub repo_root: Arc<PathBuf>,
}

impl AppState {
    pub fn new(
        manifests_dir: &Path,
        tokens: TokenService,
        bearer_token: String,
        repo_root: PathBuf,
    ) -> Result<Self, ServerError> {
        let manifests = load_cache(manifests_dir)?;
        Ok(AppState {
            manifests: Arc::new(RwLock::new(manifests)),
            tokens: Arc::new(tokens),
            bearer_token: Arc::new(bearer_token),
            repo_root: Arc::new(repo_root),
        })
    }

    /// Reloads the spec resolver cache from disk without dropping
    /// connections — the `SIGHUP` behavior spec.md requires.
    pub async fn reload(&self, manifests_dir: &Path) -> Result<(), ServerError> {
        let fresh = load_cache(manifests_dir)?;
        let mut guard = self.manifests.write().await;
        *guard = fresh;
        info!(count = guard.len(), "reloaded spec cache");
        Ok(())
    }
}

fn load_cache(manifests_dir: &Path) -> Result<HashMap<String, Manifest>, ServerError> {
    let manifests = homestak_config::load_manifests_dir(manifests_dir)?;
    Ok(manifests.into_iter().map(|m| (m.name.clone(), m)).collect())
}
