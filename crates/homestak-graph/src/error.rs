use homestak_domain::NodeName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node '{node}' references unknown parent '{parent}'")]
    UnknownParent { node: NodeName, parent: NodeName },

    #[error("node '{0}' is a vm and cannot parent other nodes")]
    VmCannotParent(NodeName),

    #[error("pve node '{0}' must use push execution mode")]
    PveRequiresPush(NodeName),

    #[error("duplicate node name: {0}")]
    DuplicateNodeName(NodeName),

    #[error("cycle detected in node parent graph")]
    CycleDetected,

    #[error("node '{0}' not found in manifest")]
    UnknownNode(NodeName),

    #[error("multiple errors")]
    Multiple(Vec<GraphError>),
}
