use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use homestak_domain::Node;
use tracing::debug;

use crate::action::{Action, ActionResult, Context, HostConfig};
use crate::error::ActionError;

/// Polls a node's address over TCP until it accepts a connection, or the
/// configured timeout elapses. Used once a node reports an address but
/// before configuration is pushed/pulled, to avoid racing the guest's boot.
pub struct AwaitReachable {
    client: reqwest::Client,
    poll_interval: Duration,
    timeout: Duration,
}

impl AwaitReachable {
    pub fn new(timeout: Duration) -> Self {
        AwaitReachable {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with default TLS backend"),
            poll_interval: Duration::from_secs(3),
            timeout,
        }
    }
}

#[async_trait]
impl Action for AwaitReachable {
    fn name(&self) -> &'static str {
        "await_reachable"
    }

    async fn execute(
        &self,
        node: &Node,
        host: &HostConfig,
        _ctx: &Context,
    ) -> Result<ActionResult, ActionError> {
        debug!(node = %node.name, address = host.address, "AwaitReachable: polling");
        let url = format!("http://{}/", host.address);
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            match self.client.get(&url).send().await {
                Ok(_) => {
                    let mut outputs = HashMap::new();
                    outputs.insert("reachable".to_string(), "true".to_string());
                    return Ok(ActionResult::ok("node is reachable").with_outputs(outputs));
                }
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ActionError::Timeout(self.timeout));
                    }
                    debug!(node = %node.name, error = %e, "AwaitReachable: not yet reachable");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
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

    #[tokio::test]
    async fn times_out_against_an_unroutable_address() {
        let action = AwaitReachable::new(Duration::from_millis(200));
        let host = HostConfig {
            address: "192.0.2.1:1".to_string(),
            vars: HashMap::new(),
        };
        let result = action.execute(&dummy_node(), &host, &Context::default()).await;
        assert!(matches!(result, Err(ActionError::Timeout(_))));
    }
}
