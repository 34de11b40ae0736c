use std::io::{self, BufRead, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use homestak_action::{
    ActionRegistry, AwaitReachable, DelegateSubtree, EnsureImageArtifact, IssueHypervisorCredential, LocalAction,
};
use homestak_executor::{Executor, RunReport, Verb};
use homestak_server::{ServerHandle, ServerLayout};
use homestak_state::FileStore;
use homestak_streamer::LocalProcessShell;
use tracing::info;

use crate::cli;
use crate::output::{render_phase_summary, render_trailer};

const CREDENTIAL_VALIDITY_MINUTES: i64 = 60;
const REACHABLE_TIMEOUT_SECONDS: u64 = 120;

/// Default root for persisted execution state and cached image artifacts
/// when `--state-dir`/`HOMESTAK_STATE_DIR` isn't given.
fn default_state_dir() -> PathBuf {
    home_or_tmp().join(".homestak")
}

fn home_or_tmp() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn state_dir(cli: &cli::Cli) -> PathBuf {
    cli.state_dir.clone().unwrap_or_else(default_state_dir)
}

/// Builds the production action registry: real actions for the operations
/// this repo implements end-to-end, `LocalAction` stand-ins for the
/// remaining driver-level operations (talking to a real hypervisor API is
/// out of scope here — see DESIGN.md).
fn build_registry(state_dir: &Path, signing_key: Vec<u8>) -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    LocalAction::register_all(&mut registry);

    registry.register(Arc::new(IssueHypervisorCredential::new(
        homestak_token::TokenService::new(signing_key),
        chrono::Duration::minutes(CREDENTIAL_VALIDITY_MINUTES),
    )));
    registry.register(Arc::new(EnsureImageArtifact::new(state_dir.join("images"))));
    registry.register(Arc::new(AwaitReachable::new(Duration::from_secs(
        REACHABLE_TIMEOUT_SECONDS,
    ))));
    registry.register(Arc::new(DelegateSubtree::new(
        LocalProcessShell::new(),
        std::env::current_exe().unwrap_or_else(|_| PathBuf::from("homestak")),
        state_dir.join("delegations"),
    )));

    Arc::new(registry)
}

fn server_layout(state_dir: &Path) -> anyhow::Result<ServerLayout> {
    Ok(ServerLayout {
        pid_file: cli::default_pid_file(),
        lock_file: cli::default_lock_file(),
        manifests_dir: state_dir.join("manifests"),
        repo_root: state_dir.join("repo"),
        addr: "127.0.0.1:8443".parse()?,
        tls_cert: None,
        tls_key: None,
    })
}

fn signing_key(state_dir: &Path) -> anyhow::Result<Vec<u8>> {
    let path = state_dir.join("signing.key");
    if let Ok(existing) = std::fs::read(&path) {
        return Ok(existing);
    }
    std::fs::create_dir_all(state_dir)?;
    let key = homestak_token::TokenService::generate_key();
    std::fs::write(&path, &key)?;
    Ok(key)
}

fn repo_token() -> String {
    std::env::var("HOMESTAK_REPO_TOKEN").unwrap_or_else(|_| "homestak-dev-token".to_string())
}

async fn build_executor(cli: &cli::Cli) -> anyhow::Result<Executor> {
    let dir = state_dir(cli);
    std::fs::create_dir_all(&dir)?;

    let key = signing_key(&dir)?;
    let registry = build_registry(&dir, key.clone());
    let store = Arc::new(FileStore::open(&dir.join("executions"))?);
    let layout = server_layout(&dir)?;

    Ok(Executor::new(
        registry,
        store,
        Some(layout),
        repo_token(),
        key,
        Some(dir.join("locks")),
    ))
}

async fn emit(
    cli: &cli::Cli,
    scenario: &str,
    result: anyhow::Result<RunReport>,
    started: Instant,
) -> anyhow::Result<()> {
    let elapsed = started.elapsed();
    match result {
        Ok(report) => {
            if cli.structured_output {
                println!("{}", render_trailer(scenario, &report, elapsed));
            } else {
                print!("{}", render_phase_summary(&report));
            }
            if report.is_success() {
                Ok(())
            } else {
                anyhow::bail!("{scenario} finished with {} error(s)", report.errors.len());
            }
        }
        Err(e) => {
            if cli.structured_output {
                let failed = RunReport {
                    verb: match scenario {
                        "destroy" => Verb::Destroy,
                        "test" => Verb::Test,
                        _ => Verb::Apply,
                    },
                    dry_run: false,
                    changes: Vec::new(),
                    errors: vec![e.to_string()],
                };
                println!("{}", render_trailer(scenario, &failed, elapsed));
            }
            Err(e)
        }
    }
}

/// Prompt the user to type `expected` to confirm a destructive action.
fn confirm_destructive(label: &str, expected: &str) -> anyhow::Result<()> {
    print!("  Type '{expected}' to confirm: ");
    io::stdout().flush()?;
    let line = io::stdin()
        .lock()
        .lines()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no input"))??;
    if line.trim() != expected {
        anyhow::bail!("aborted: {label} not destroyed");
    }
    Ok(())
}

pub async fn apply(cli: &cli::Cli, manifest: &Path, host: &str, dry_run: bool) -> anyhow::Result<()> {
    let started = Instant::now();
    if dry_run {
        info!(manifest = %manifest.display(), host, "dry-run: not executing");
        println!("dry-run: would apply {} against {host}", manifest.display());
        return Ok(());
    }
    let doc = homestak_config::load_manifest(manifest)?;
    let executor = build_executor(cli).await?;
    let result = executor.apply(&doc, host).await.map_err(anyhow::Error::from);
    emit(cli, "apply", result, started).await
}

pub async fn destroy(
    cli: &cli::Cli,
    manifest: &Path,
    host: &str,
    dry_run: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let started = Instant::now();
    if dry_run {
        println!("dry-run: would destroy {} against {host}", manifest.display());
        return Ok(());
    }
    if !yes && !cli.structured_output {
        println!("This will destroy every node in '{}' on host '{host}'.", manifest.display());
        confirm_destructive(host, host)?;
    }
    let doc = homestak_config::load_manifest(manifest)?;
    let executor = build_executor(cli).await?;
    let result = executor.destroy(&doc, host).await.map_err(anyhow::Error::from);
    emit(cli, "destroy", result, started).await
}

pub async fn test(cli: &cli::Cli, manifest: &Path, host: &str, dry_run: bool) -> anyhow::Result<()> {
    let started = Instant::now();
    if dry_run {
        println!("dry-run: would test {} against {host}", manifest.display());
        return Ok(());
    }
    let doc = homestak_config::load_manifest(manifest)?;
    let executor = build_executor(cli).await?;
    let result = executor.test(&doc, host).await.map_err(anyhow::Error::from);
    emit(cli, "test", result, started).await
}

pub async fn server_start(
    cli: &cli::Cli,
    port: u16,
    bind: &str,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    repos: PathBuf,
    repo_token: String,
    foreground: bool,
) -> anyhow::Result<()> {
    let dir = state_dir(cli);
    std::fs::create_dir_all(&dir)?;
    let signing_key = signing_key(&dir)?;

    let layout = ServerLayout {
        pid_file: cli::default_pid_file(),
        lock_file: cli::default_lock_file(),
        manifests_dir: repos,
        repo_root: dir.join("repo"),
        addr: cli::parse_bind_addr(bind, port)?,
        tls_cert: cert,
        tls_key: key,
    };

    let handle = ServerHandle::ensure(layout, repo_token, signing_key).await?;
    if !handle.started_by_us() {
        println!("a spec server is already running");
        return Ok(());
    }

    println!("spec server listening on https://{bind}:{port}");
    if !foreground {
        // No OS-level daemonization crate is in the dependency stack; a
        // service manager (systemd, nohup) is expected to background this
        // process. We still block here so the listener task stays alive.
        info!("no daemonization backend available; run under a supervisor for true backgrounding");
    }
    tokio::signal::ctrl_c().await?;
    handle.release().await?;
    Ok(())
}

pub async fn server_stop() -> anyhow::Result<()> {
    let pid_file = cli::default_pid_file();
    let text = std::fs::read_to_string(&pid_file)
        .map_err(|_| anyhow::anyhow!("no server.pid file found at {}", pid_file.display()))?;
    let pid = text.trim();
    let status = std::process::Command::new("kill").arg("-TERM").arg(pid).status()?;
    if status.success() {
        println!("sent SIGTERM to pid {pid}");
        Ok(())
    } else {
        anyhow::bail!("failed to signal pid {pid}")
    }
}

pub async fn server_status(json: bool) -> anyhow::Result<()> {
    let pid_file = cli::default_pid_file();
    let running = std::fs::read_to_string(&pid_file)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .map(|pid| Path::new(&format!("/proc/{pid}")).exists())
        .unwrap_or(false);

    if json {
        println!(
            "{}",
            serde_json::json!({ "running": running, "pid_file": pid_file.display().to_string() })
        );
    } else if running {
        println!("spec server is running");
    } else {
        println!("spec server is not running");
    }
    Ok(())
}
