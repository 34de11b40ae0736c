use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use homestak_domain::Node;
use homestak_token::TokenService;
use tracing::debug;

use crate::action::{Action, ActionResult, Context, HostConfig};
use crate::error::ActionError;

/// Mints a provisioning token identifying a child node, so it can pull its
/// own configuration from the spec/repo server once it boots.
pub struct IssueHypervisorCredential {
    tokens: TokenService,
    validity: Duration,
}

impl IssueHypervisorCredential {
    pub fn new(tokens: TokenService, validity: Duration) -> Self {
        IssueHypervisorCredential { tokens, validity }
    }
}

#[async_trait]
impl Action for IssueHypervisorCredential {
    fn name(&self) -> &'static str {
        "issue_hypervisor_credential"
    }

    async fn execute(
        &self,
        node: &Node,
        _host: &HostConfig,
        _ctx: &Context,
    ) -> Result<ActionResult, ActionError> {
        debug!(node = %node.name, "IssueHypervisorCredential: minting token");
        let token = self.tokens.mint(node.name.as_str(), self.validity)?;

        let mut outputs = HashMap::new();
        outputs.insert("token".to_string(), token.to_string());
        Ok(ActionResult::ok("credential issued").with_outputs(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestak_domain::{Execution, ExecutionMode, NodeKind, NodeName};

    fn dummy_node() -> Node {
        Node {
            name: NodeName::new("child"),
            kind: NodeKind::Pve,
            parent: Some(NodeName::new("root")),
            preset: "small".into(),
            image: "pve-base".into(),
            vmid: None,
            disk_gib: 32,
            execution: Execution {
                mode: ExecutionMode::Push,
                spec: None,
            },
            vars: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn issues_a_verifiable_token() {
        let tokens = TokenService::new(TokenService::generate_key());
        let action = IssueHypervisorCredential::new(tokens.clone(), Duration::minutes(30));
        let host = HostConfig {
            address: "10.0.0.1".into(),
            vars: HashMap::new(),
        };
        let result = action
            .execute(&dummy_node(), &host, &Context::default())
            .await
            .unwrap();

        let token_str = result.context_additions.get("token").unwrap();
        let verified = tokens
            .verify(&homestak_token::Token(token_str.clone()))
            .unwrap();
        assert_eq!(verified.identity, "child");
    }
}
