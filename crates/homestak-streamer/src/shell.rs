use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::StreamerError;
use crate::trailer::{extract_trailer, resolve_trailer, TrailerResult};

/// Maximum number of captured output bytes retained per command; older
/// bytes are dropped once the buffer fills so a runaway process can't
/// exhaust memory.
const CAPTURE_LIMIT_BYTES: usize = 1 << 20;

/// One command to run on the far end of a remote channel.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        RemoteCommand {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: Duration::from_secs(1800),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one command execution: exit code, captured combined
/// stdout+stderr (bounded, see [`CAPTURE_LIMIT_BYTES`]), and the structured
/// output trailer if the command emitted one.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub output: String,
    pub trailer: Option<serde_json::Value>,
    /// Structured result resolved from `trailer`, or synthesized from
    /// `exit_code` when the trailer is absent or unparseable (§6 point 3).
    pub result: TrailerResult,
}

/// Opens an interactive channel to a target and runs commands over it.
///
/// The "remote" part (an actual SSH/PTY transport) is intentionally left to
/// implementors: homestak ships [`LocalProcessShell`] for single-host and
/// test use, and this trait is the extension point for a real network
/// transport.
#[async_trait]
pub trait RemoteShell: Send + Sync + 'static {
    async fn run(&self, command: RemoteCommand) -> Result<CommandOutcome, StreamerError>;
}

/// Runs commands as a local subprocess. Used when the target is the same
/// host homestak runs on, and as the shell implementation exercised by
/// tests.
#[derive(Debug, Default, Clone)]
pub struct LocalProcessShell;

impl LocalProcessShell {
    pub fn new() -> Self {
        LocalProcessShell
    }
}

#[async_trait]
impl RemoteShell for LocalProcessShell {
    async fn run(&self, command: RemoteCommand) -> Result<CommandOutcome, StreamerError> {
        debug!(program = command.program, args = ?command.args, "LocalProcessShell: running command");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        for (k, v) in &command.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| StreamerError::ChannelFailed(e.to_string()))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let tx1 = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx1.send(line);
            }
        });

        let tx2 = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx2.send(line);
            }
        });

        drop(tx);

        let mut captured: VecDeque<String> = VecDeque::new();
        let mut captured_bytes = 0usize;
        let collect = async {
            while let Some(line) = rx.recv().await {
                captured_bytes += line.len() + 1;
                captured.push_back(line);
                while captured_bytes > CAPTURE_LIMIT_BYTES {
                    if let Some(dropped) = captured.pop_front() {
                        captured_bytes -= dropped.len() + 1;
                    } else {
                        break;
                    }
                }
            }
        };

        let timed_out = tokio::time::timeout(command.timeout, collect).await.is_err();

        stdout_task.await.ok();
        stderr_task.await.ok();

        if timed_out {
            warn!(program = command.program, "command timed out, killing process");
            let _ = child.kill().await;
            return Err(StreamerError::TimedOut(command.timeout));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| StreamerError::Internal(e.to_string()))?;

        let output: String = captured.into_iter().collect::<Vec<_>>().join("\n");
        let trailer = extract_trailer(&output);
        let exit_code = status.code().unwrap_or(-1);
        let result = resolve_trailer(&output, exit_code);

        Ok(CommandOutcome {
            exit_code,
            output,
            trailer,
            result,
        })
    }
}
