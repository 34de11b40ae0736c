use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeName(pub String);

impl NodeName {
    pub fn new(s: impl Into<String>) -> Self {
        NodeName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Whether a node is a hypervisor (can parent other nodes) or a plain guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A hypervisor node (e.g. Proxmox VE): always pushed to, may parent children.
    Pve,
    /// A plain guest VM: leaf of the tree, never parents other nodes.
    Vm,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Pve => write!(f, "pve"),
            NodeKind::Vm => write!(f, "vm"),
        }
    }
}

/// Whether configuration is pushed to the node from the parent, or pulled by
/// the node itself from the spec/repo server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Push,
    Pull,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Push => write!(f, "push"),
            ExecutionMode::Pull => write!(f, "pull"),
        }
    }
}

/// Policy applied when a node fails during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Stop the run immediately, leaving already-created nodes in place.
    Stop,
    /// Destroy everything created so far in reverse creation order.
    Rollback,
    /// Skip the failed subtree and keep processing independent branches.
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Stop
    }
}

impl std::fmt::Display for OnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnError::Stop => write!(f, "stop"),
            OnError::Rollback => write!(f, "rollback"),
            OnError::Continue => write!(f, "continue"),
        }
    }
}

/// Lifecycle status of a single node across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Provisioning,
    Starting,
    AwaitingAddress,
    AwaitingReachable,
    Configuring,
    Testing,
    Ready,
    Delegating,
    Destroying,
    Destroyed,
    Failed,
    /// Skipped because an ancestor failed under the `continue` error policy.
    Skipped,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Provisioning => "provisioning",
            NodeStatus::Starting => "starting",
            NodeStatus::AwaitingAddress => "awaiting_address",
            NodeStatus::AwaitingReachable => "awaiting_reachable",
            NodeStatus::Configuring => "configuring",
            NodeStatus::Testing => "testing",
            NodeStatus::Ready => "ready",
            NodeStatus::Delegating => "delegating",
            NodeStatus::Destroying => "destroying",
            NodeStatus::Destroyed => "destroyed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

// ── Core structs ──────────────────────────────────────────────────────────────

/// How configuration reaches a node: pushed by the parent over the remote
/// command streamer, or pulled by the node from the spec/repo server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub mode: ExecutionMode,
    /// Path (relative to the manifest root) to the configuration spec this
    /// node applies. `None` means "no configuration step, just boot".
    pub spec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeName,
    pub kind: NodeKind,
    /// Name of the parent hypervisor node. `None` for root nodes.
    pub parent: Option<NodeName>,
    /// Named resource preset (cpu/mem/disk class) looked up in site settings.
    pub preset: String,
    /// Base image or template identifier to clone/boot from.
    pub image: String,
    /// Fixed numeric id to request from the hypervisor. `None` lets the
    /// hypervisor allocate one.
    pub vmid: Option<u64>,
    pub disk_gib: u32,
    pub execution: Execution,
    /// Free-form key/value overlay merged into this node's resolved-variable
    /// bundle ahead of site/host/posture defaults.
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default = "default_timeout_buffer")]
    pub timeout_buffer_seconds: u32,
    #[serde(default)]
    pub keep_on_failure: bool,
    #[serde(default)]
    pub cleanup_on_failure: bool,
}

fn default_timeout_buffer() -> u32 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            on_error: OnError::default(),
            timeout_buffer_seconds: default_timeout_buffer(),
            keep_on_failure: false,
            cleanup_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub settings: Settings,
    pub nodes: Vec<Node>,
}

impl Manifest {
    pub fn node(&self, name: &NodeName) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.name == name)
    }

    pub fn children_of<'a>(&'a self, parent: &'a NodeName) -> impl Iterator<Item = &'a Node> {
        self.nodes
            .iter()
            .filter(move |n| n.parent.as_ref() == Some(parent))
    }

    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.parent.is_none())
    }
}

#[cfg(test)]
mod inline_tests {
    use super::*;

    #[test]
    fn settings_default_matches_stop_policy() {
        let s = Settings::default();
        assert_eq!(s.on_error, OnError::Stop);
        assert_eq!(s.timeout_buffer_seconds, 30);
    }

    #[test]
    fn manifest_children_of_filters_by_parent() {
        let m = Manifest {
            schema_version: 2,
            name: "site".into(),
            settings: Settings::default(),
            nodes: vec![
                Node {
                    name: NodeName::new("root"),
                    kind: NodeKind::Pve,
                    parent: None,
                    preset: "small".into(),
                    image: "pve-base".into(),
                    vmid: None,
                    disk_gib: 32,
                    execution: Execution {
                        mode: ExecutionMode::Push,
                        spec: None,
                    },
                    vars: HashMap::new(),
                },
                Node {
                    name: NodeName::new("leaf"),
                    kind: NodeKind::Vm,
                    parent: Some(NodeName::new("root")),
                    preset: "small".into(),
                    image: "debian-12".into(),
                    vmid: None,
                    disk_gib: 16,
                    execution: Execution {
                        mode: ExecutionMode::Pull,
                        spec: Some("guest.yaml".into()),
                    },
                    vars: HashMap::new(),
                },
            ],
        };
        let children: Vec<_> = m.children_of(&NodeName::new("root")).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name.as_str(), "leaf");
    }
}
