use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use homestak_state::RunLock;
use tracing::{error, info, warn};

use crate::app::build_app;
use crate::error::ServerError;
use crate::state::AppState;

/// On-disk coordinates for one daemon instance: where its PID file and
/// lock file live, and the manifests directory it serves specs from.
#[derive(Clone, Debug)]
pub struct ServerLayout {
    pub pid_file: PathBuf,
    pub lock_file: PathBuf,
    pub manifests_dir: PathBuf,
    pub repo_root: PathBuf,
    pub addr: SocketAddr,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

/// Reference-counted handle to a possibly-shared daemon instance.
///
/// `ensure()` starts the daemon if nothing owns it yet, or attaches to an
/// already-running instance otherwise; `release()` only stops the
/// process if this handle is the one that started it and the refcount
/// has dropped to zero. The PID-file-creation window is serialized with
/// [`RunLock`] so concurrent `ensure()` calls from separate processes
/// never race to bind the same port twice.
pub struct ServerHandle {
    layout: ServerLayout,
    started_by_us: bool,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Ensures a daemon is running for `layout`, starting one if none is,
    /// and returns a handle tracking whether this call was the one that
    /// started it.
    pub async fn ensure(
        layout: ServerLayout,
        bearer_token: String,
        signing_key: Vec<u8>,
    ) -> Result<Self, ServerError> {
        let _serialize = RunLock::acquire(&layout.lock_file, "server-ensure")
            .or_else(|_| wait_for_lock(&layout.lock_file))?;

        if let Some(pid) = read_live_pid(&layout.pid_file) {
            info!(pid, "attaching to already-running spec server");
            return Ok(ServerHandle {
                layout,
                started_by_us: false,
                shutdown: None,
                task: None,
            });
        }

        let state = AppState::new(
            &layout.manifests_dir,
            homestak_token::TokenService::new(signing_key),
            bearer_token,
            layout.repo_root.clone(),
        )?;

        let tls_config = load_or_generate_tls(&layout).await?;
        let app = build_app(state.clone());
        let addr = layout.addr;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let manifests_dir = layout.manifests_dir.clone();
        let pid_file = layout.pid_file.clone();

        write_pid_file(&pid_file)?;

        let task = tokio::spawn(async move {
            let server = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service());

            tokio::pin!(server);

            let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGHUP handler");
                    return;
                }
            };

            loop {
                tokio::select! {
                    result = &mut server => {
                        if let Err(e) = result {
                            error!(error = %e, "spec server exited with error");
                        }
                        break;
                    }
                    _ = sighup.recv() => {
                        if let Err(e) = state.reload(&manifests_dir).await {
                            warn!(error = %e, "spec cache reload failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            let _ = std::fs::remove_file(&pid_file);
        });

        // Block until /health answers over TLS, bounding startup latency.
        wait_until_healthy(&layout).await?;

        Ok(ServerHandle {
            layout,
            started_by_us: true,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Whether this handle is the one that actually started the daemon, as
    /// opposed to attaching to one already running.
    pub fn started_by_us(&self) -> bool {
        self.started_by_us
    }

    /// Releases this handle's claim. Only actually stops the daemon when
    /// this instance started it; an attached (non-owning) handle is a
    /// no-op here, matching the refcounted contract.
    pub async fn release(mut self) -> Result<(), ServerError> {
        if self.started_by_us {
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
            if let Some(task) = self.task.take() {
                let _ = task.await;
            }
            info!("stopped spec server we started");
        }
        Ok(())
    }
}

fn read_live_pid(pid_file: &Path) -> Option<u32> {
    let text = std::fs::read_to_string(pid_file).ok()?;
    let pid: u32 = text.trim().parse().ok()?;
    if Path::new(&format!("/proc/{pid}")).exists() {
        Some(pid)
    } else {
        let _ = std::fs::remove_file(pid_file);
        None
    }
}

fn write_pid_file(pid_file: &Path) -> Result<(), ServerError> {
    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(pid_file, std::process::id().to_string())?;
    Ok(())
}

fn wait_for_lock(lock_file: &Path) -> Result<RunLock, ServerError> {
    // Another ensure() call is mid-bootstrap (cert generation, health poll).
    // Poll for the lock to free up rather than giving up after one retry.
    const ATTEMPTS: u32 = 100;
    let mut last_err = None;
    for _ in 0..ATTEMPTS {
        std::thread::sleep(Duration::from_millis(50));
        match RunLock::acquire(lock_file, "server-ensure-retry") {
            Ok(lock) => return Ok(lock),
            Err(e) => last_err = Some(e),
        }
    }
    Err(ServerError::from(last_err.expect("ATTEMPTS > 0")))
}

async fn load_or_generate_tls(layout: &ServerLayout) -> Result<RustlsConfig, ServerError> {
    if let (Some(cert), Some(key)) = (&layout.tls_cert, &layout.tls_key) {
        return RustlsConfig::from_pem_file(cert, key)
            .await
            .map_err(|e| ServerError::Tls(e.to_string()));
    }

    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    let cert_pem = generated.cert.pem();
    let key_pem = generated.key_pair.serialize_pem();

    let fingerprint = sha256_hex(generated.cert.der());
    info!(fingerprint = %fingerprint, "generated self-signed TLS certificate");

    RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes())
        .await
        .map_err(|e| ServerError::Tls(e.to_string()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

async fn wait_until_healthy(layout: &ServerLayout) -> Result<(), ServerError> {
    let url = format!("https://{}/health", layout.addr);
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(ServerError::Internal(
        "spec server did not become healthy in time".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_pid_file_is_treated_as_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("server.pid");
        std::fs::write(&pid_file, "999999999").unwrap();
        assert!(read_live_pid(&pid_file).is_none());
        assert!(!pid_file.exists());
    }

    #[test]
    fn missing_pid_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("server.pid");
        assert!(read_live_pid(&pid_file).is_none());
    }

    #[test]
    fn own_pid_is_live() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("server.pid");
        std::fs::write(&pid_file, std::process::id().to_string()).unwrap();
        assert_eq!(read_live_pid(&pid_file), Some(std::process::id()));
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn concurrent_ensure_calls_start_exactly_one_server() {
        let dir = tempfile::tempdir().unwrap();
        let manifests_dir = dir.path().join("manifests");
        std::fs::create_dir_all(&manifests_dir).unwrap();
        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(&repo_root).unwrap();

        let layout = ServerLayout {
            pid_file: dir.path().join("server.pid"),
            lock_file: dir.path().join("server.lock"),
            manifests_dir,
            repo_root,
            addr: format!("127.0.0.1:{}", free_port()).parse().unwrap(),
            tls_cert: None,
            tls_key: None,
        };
        let key = homestak_token::TokenService::generate_key();

        let (a, b) = tokio::join!(
            ServerHandle::ensure(layout.clone(), "bearer-token".into(), key.clone()),
            ServerHandle::ensure(layout.clone(), "bearer-token".into(), key.clone()),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        assert!(
            a.started_by_us() != b.started_by_us(),
            "exactly one of the two concurrent ensure() calls should have bound the port"
        );

        a.release().await.unwrap();
        b.release().await.unwrap();
    }
}
