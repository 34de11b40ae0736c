use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "homestak",
    about = "Declarative hypervisor/guest orchestration via manifest graph execution",
    version
)]
pub struct Cli {
    /// Raise the log level to debug.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Emit a single trailing-line JSON trailer on standard output; the
    /// rest of logging is diverted to standard error.
    #[arg(long, global = true)]
    pub structured_output: bool,

    /// Root directory for persisted execution state (defaults under a
    /// well-known administrative directory).
    #[arg(long, env = "HOMESTAK_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the create/configure/delegate lifecycle for every node not
    /// already up to date.
    Apply {
        /// Path to the manifest file.
        manifest: PathBuf,
        /// Target host (the root hypervisor's address, or the host this
        /// manifest was previously applied against).
        host: String,
        #[arg(long)]
        dry_run: bool,
        /// Skip destructive confirmations.
        #[arg(long)]
        yes: bool,
    },

    /// Tear down every node, children before parents.
    Destroy {
        manifest: PathBuf,
        host: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        yes: bool,
    },

    /// Run read-only checks against every node already up.
    Test {
        manifest: PathBuf,
        host: String,
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage the spec/repo server daemon.
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServerCommand {
    /// Start the spec/repo server, daemonizing unless --foreground is set.
    Start {
        #[arg(long, default_value_t = 8443)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// PEM certificate; a self-signed one is generated if omitted.
        #[arg(long)]
        cert: Option<PathBuf>,
        #[arg(long)]
        key: Option<PathBuf>,
        /// Directory of manifests served for pull-mode nodes.
        #[arg(long, default_value = "/etc/homestak/manifests")]
        repos: PathBuf,
        /// Bearer token required by the git-read endpoints.
        #[arg(long, env = "HOMESTAK_REPO_TOKEN")]
        repo_token: String,
        /// Stay attached to the controlling terminal instead of
        /// daemonizing (the spawned task still runs under this process).
        #[arg(long)]
        foreground: bool,
    },

    /// Stop a running daemon.
    Stop,

    /// Report whether a daemon is running and healthy.
    Status {
        #[arg(long)]
        json: bool,
    },
}

pub fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/homestak/server.pid")
}

pub fn default_lock_file() -> PathBuf {
    PathBuf::from("/var/run/homestak/server.lock")
}

pub fn parse_bind_addr(bind: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{bind}:{port}")
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid --bind/--port combination: {e}"))
}
