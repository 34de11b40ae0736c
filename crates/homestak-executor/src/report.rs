use homestak_domain::NodeName;
use serde::{Deserialize, Serialize};

/// The three operator-facing verbs a run can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Apply,
    Destroy,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub verb: Verb,
    /// The target this manifest is being applied against — the root
    /// hypervisor's address for a fresh apply, or whatever host the prior
    /// run recorded state under.
    pub host: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Change {
    NodeCreated { node: NodeName },
    NodeConfigured { node: NodeName },
    NodeTested { node: NodeName },
    NodeDelegated { node: NodeName, child_count: usize },
    NodeDestroyed { node: NodeName },
    NodeSkipped { node: NodeName },
    NodeFailed { node: NodeName, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub verb: Verb,
    pub dry_run: bool,
    pub changes: Vec<Change>,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(verb: Verb, dry_run: bool) -> Self {
        RunReport {
            verb,
            dry_run,
            changes: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}
