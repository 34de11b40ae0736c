use std::collections::HashMap;

use async_trait::async_trait;
use homestak_domain::Node;
use tracing::debug;

use crate::action::{Action, ActionResult, Context, HostConfig};
use crate::error::ActionError;

/// A stub action that simulates every capability locally.
///
/// - Performs no real I/O or network access.
/// - Produces deterministic `local://<node>/<key>` outputs so the executor
///   tests and dry-run previews have something stable to assert against.
/// - One instance handles exactly one named capability; the node executor's
///   test wiring registers one `LocalAction` per spec.md §4.1 operation name.
#[derive(Debug, Clone)]
pub struct LocalAction {
    name: &'static str,
}

impl LocalAction {
    pub fn new(name: &'static str) -> Self {
        LocalAction { name }
    }

    /// Registers a `LocalAction` for every operation name the node executor
    /// dispatches, wired into one [`crate::registry::ActionRegistry`].
    pub fn register_all(registry: &mut crate::registry::ActionRegistry) {
        for name in [
            "provision_infrastructure",
            "start_resource",
            "await_address",
            "await_reachable",
            "await_file",
            "run_configuration",
            "issue_hypervisor_credential",
            "ensure_image_artifact",
            "destroy_resource",
            "delegate_subtree",
        ] {
            registry.register(std::sync::Arc::new(LocalAction::new(name)));
        }
    }
}

#[async_trait]
impl Action for LocalAction {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(
        &self,
        node: &Node,
        _host: &HostConfig,
        _ctx: &Context,
    ) -> Result<ActionResult, ActionError> {
        debug!(node = %node.name, action = self.name, "LocalAction: execute");

        let mut outputs = HashMap::new();
        match self.name {
            "provision_infrastructure" => {
                outputs.insert(
                    "handle".to_string(),
                    format!("local://{}/handle", node.name.as_str()),
                );
            }
            "start_resource" => {
                outputs.insert("started".to_string(), "true".to_string());
            }
            "await_address" => {
                outputs.insert(
                    "address".to_string(),
                    format!("local://{}/address", node.name.as_str()),
                );
            }
            "await_reachable" => {
                outputs.insert("reachable".to_string(), "true".to_string());
            }
            "await_file" => {
                outputs.insert("found".to_string(), "true".to_string());
            }
            "run_configuration" => {
                outputs.insert("configured".to_string(), "true".to_string());
            }
            "issue_hypervisor_credential" => {
                outputs.insert(
                    "token".to_string(),
                    format!("local-token://{}", node.name.as_str()),
                );
            }
            "ensure_image_artifact" => {
                outputs.insert(
                    "image_path".to_string(),
                    format!("local://{}/images/{}", node.name.as_str(), node.image),
                );
            }
            "destroy_resource" => {
                outputs.insert("destroyed".to_string(), "true".to_string());
            }
            "delegate_subtree" => {
                outputs.insert("delegated".to_string(), "true".to_string());
            }
            other => {
                return Err(ActionError::UnknownAction(other.to_string()));
            }
        }

        Ok(ActionResult::ok(format!("{} simulated locally", self.name)).with_outputs(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestak_domain::{Execution, ExecutionMode, NodeKind, NodeName};

    fn dummy_node() -> Node {
        Node {
            name: NodeName::new("test"),
            kind: NodeKind::Vm,
            parent: None,
            preset: "small".into(),
            image: "debian-12".into(),
            vmid: None,
            disk_gib: 16,
            execution: Execution {
                mode: ExecutionMode::Pull,
                spec: None,
            },
            vars: HashMap::new(),
        }
    }

    fn host() -> HostConfig {
        HostConfig {
            address: "127.0.0.1".into(),
            vars: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn provision_infrastructure_returns_a_handle() {
        let action = LocalAction::new("provision_infrastructure");
        let result = action
            .execute(&dummy_node(), &host(), &Context::default())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.context_additions.contains_key("handle"));
    }

    #[tokio::test]
    async fn unregistered_name_is_an_error() {
        let action = LocalAction::new("not_a_real_action");
        let result = action.execute(&dummy_node(), &host(), &Context::default()).await;
        assert!(result.is_err());
    }
}
