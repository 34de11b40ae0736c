use std::path::PathBuf;

use async_trait::async_trait;
use homestak_domain::Node;
use homestak_streamer::{project_context, RemoteCommand, RemoteShell};
use tracing::debug;

use crate::action::{Action, ActionResult, Context, HostConfig};
use crate::error::ActionError;

/// Delegates a subtree to a child hypervisor: writes the already-serialized
/// sub-manifest (`ctx.vars["delegate_manifest"]`) to a scratch file, invokes
/// this engine's own binary against it over a [`RemoteShell`], and imports
/// the child run's reported context keys under the caller-supplied
/// allow-list (`ctx.vars["delegate_allow_list"]`, comma-separated).
pub struct DelegateSubtree<S: RemoteShell> {
    shell: S,
    binary: PathBuf,
    scratch_dir: PathBuf,
}

impl<S: RemoteShell> DelegateSubtree<S> {
    pub fn new(shell: S, binary: PathBuf, scratch_dir: PathBuf) -> Self {
        DelegateSubtree {
            shell,
            binary,
            scratch_dir,
        }
    }
}

#[async_trait]
impl<S: RemoteShell> Action for DelegateSubtree<S> {
    fn name(&self) -> &'static str {
        "delegate_subtree"
    }

    async fn execute(&self, node: &Node, host: &HostConfig, ctx: &Context) -> Result<ActionResult, ActionError> {
        let manifest_text = ctx.vars.get("delegate_manifest").ok_or_else(|| {
            ActionError::InvalidInput("delegate_subtree requires delegate_manifest in context".into())
        })?;
        let verb = ctx.vars.get("delegate_verb").map(String::as_str).unwrap_or("apply");
        let allow_list: Vec<String> = ctx
            .vars
            .get("delegate_allow_list")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| ActionError::Internal(format!("creating delegation scratch dir: {e}")))?;
        let manifest_path = self.scratch_dir.join(format!("{}.json", node.name.as_str()));
        std::fs::write(&manifest_path, manifest_text)
            .map_err(|e| ActionError::Internal(format!("writing delegated sub-manifest: {e}")))?;

        let command = RemoteCommand::new(self.binary.to_string_lossy().to_string())
            .arg(verb)
            .arg("--manifest")
            .arg(manifest_path.to_string_lossy().to_string())
            .arg("--host")
            .arg(&host.address)
            .arg("--structured-output");

        debug!(node = %node.name, verb, host = %host.address, "DelegateSubtree: invoking child run");
        let outcome = self
            .shell
            .run(command)
            .await
            .map_err(|e| ActionError::Transport(e.to_string()));
        let _ = std::fs::remove_file(&manifest_path);
        let outcome = outcome?;

        if !outcome.result.success {
            let message = outcome
                .result
                .error
                .unwrap_or_else(|| format!("child run exited {}", outcome.exit_code));
            return Err(ActionError::RemoteFailure(message));
        }

        let context_additions = project_context(&outcome.result.context, &allow_list);
        Ok(ActionResult::ok(format!("delegated subtree to {}", host.address)).with_outputs(context_additions))
    }
}
