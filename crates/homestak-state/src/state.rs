use std::collections::HashMap;

use chrono::{DateTime, Utc};
use homestak_action::ErrorKind;
use homestak_domain::{NodeName, NodeStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted record of the most recent failure for a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeError {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub kind: ErrorKind,
}

/// Per-node runtime state tracked across a run and persisted between runs
/// so a re-apply can tell what already exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    /// Hypervisor-assigned numeric id (vmid), once known.
    pub assigned_id: Option<u64>,
    /// Reachable address of this node, once known.
    pub address: Option<String>,
    /// Address of the parent hypervisor this node was created on.
    pub parent_address: Option<String>,
    pub error: Option<NodeError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Free-form key/value outputs this node contributed to its own and its
    /// descendants' resolved-variable bundle.
    #[serde(default)]
    pub context_overlay: HashMap<String, String>,
    /// Fingerprint of the node's desired configuration as of the last
    /// successful apply. A changed fingerprint on the next run means the
    /// node's config has drifted and must be reapplied.
    pub fingerprint: Option<String>,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState {
            status: NodeStatus::Pending,
            assigned_id: None,
            address: None,
            parent_address: None,
            error: None,
            started_at: None,
            finished_at: None,
            context_overlay: HashMap::new(),
            fingerprint: None,
        }
    }
}

impl NodeState {
    pub fn mark_started(&mut self, now: DateTime<Utc>, status: NodeStatus) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = status;
        self.error = None;
    }

    pub fn mark_ready(&mut self, now: DateTime<Utc>, fingerprint: String) {
        self.status = NodeStatus::Ready;
        self.finished_at = Some(now);
        self.fingerprint = Some(fingerprint);
        self.error = None;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, message: String, kind: ErrorKind) {
        self.status = NodeStatus::Failed;
        self.finished_at = Some(now);
        self.error = Some(NodeError {
            message,
            occurred_at: now,
            kind,
        });
    }

    pub fn mark_destroyed(&mut self, now: DateTime<Utc>) {
        self.status = NodeStatus::Destroyed;
        self.finished_at = Some(now);
    }
}

/// The full persisted state for one manifest run against one target host.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionState {
    pub nodes: HashMap<NodeName, NodeState>,
    /// Fingerprint of the whole manifest at last successful run, used for a
    /// cheap "nothing changed" short-circuit before per-node diffing.
    pub fingerprint: Option<String>,
}

impl ExecutionState {
    pub fn node_mut(&mut self, name: &NodeName) -> &mut NodeState {
        self.nodes.entry(name.clone()).or_default()
    }
}

// ── AuditEvent ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AuditEvent {
    RunStarted {
        id: Uuid,
        at: DateTime<Utc>,
        manifest: String,
        dry_run: bool,
    },
    RunCompleted {
        id: Uuid,
        at: DateTime<Utc>,
        manifest: String,
        changes: usize,
        dry_run: bool,
    },
    NodeProvisioned {
        id: Uuid,
        at: DateTime<Utc>,
        node: NodeName,
    },
    NodeConfigured {
        id: Uuid,
        at: DateTime<Utc>,
        node: NodeName,
    },
    NodeDelegated {
        id: Uuid,
        at: DateTime<Utc>,
        node: NodeName,
        child_count: usize,
    },
    NodeDestroyed {
        id: Uuid,
        at: DateTime<Utc>,
        node: NodeName,
    },
    NodeError {
        id: Uuid,
        at: DateTime<Utc>,
        node: NodeName,
        message: String,
        kind: ErrorKind,
    },
}

impl AuditEvent {
    pub fn node(&self) -> Option<&NodeName> {
        match self {
            AuditEvent::NodeProvisioned { node, .. }
            | AuditEvent::NodeConfigured { node, .. }
            | AuditEvent::NodeDelegated { node, .. }
            | AuditEvent::NodeDestroyed { node, .. }
            | AuditEvent::NodeError { node, .. } => Some(node),
            _ => None,
        }
    }
}
