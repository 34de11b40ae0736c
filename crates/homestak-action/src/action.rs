use std::collections::HashMap;

use async_trait::async_trait;
use homestak_domain::Node;

use crate::error::{ActionError, ErrorKind};

/// Everything an action needs to know about the host it's driving work
/// against: the address of the hypervisor or guest it runs commands on, and
/// the resolved-variable bundle (site/host/posture/node/token layers
/// already merged) available for template substitution.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub address: String,
    pub vars: HashMap<String, String>,
}

/// Context passed to every action invocation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Outputs contributed by already-completed actions on this node, plus
    /// anything inherited from its parent's context overlay.
    pub vars: HashMap<String, String>,
}

/// Outcome of one action invocation.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Key/value outputs merged into the node's context overlay on success.
    pub context_additions: HashMap<String, String>,
    pub error_kind: Option<ErrorKind>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        ActionResult {
            success: true,
            message: message.into(),
            context_additions: HashMap::new(),
            error_kind: None,
        }
    }

    pub fn with_outputs(mut self, outputs: HashMap<String, String>) -> Self {
        self.context_additions = outputs;
        self
    }
}

/// One capability the node executor can invoke against a node: provisioning,
/// waiting, configuring, destroying, or delegating to a child.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        node: &Node,
        host: &HostConfig,
        ctx: &Context,
    ) -> Result<ActionResult, ActionError>;
}
