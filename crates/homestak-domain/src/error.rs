use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid node name: {0}")]
    InvalidNodeName(String),

    #[error("unknown parent '{parent}' referenced by node '{node}'")]
    UnknownParent { node: String, parent: String },

    #[error("node '{0}' is a vm and cannot parent other nodes")]
    VmCannotParent(String),

    #[error("pve node '{0}' must use push execution mode")]
    PveRequiresPush(String),

    #[error("duplicate node name: {0}")]
    DuplicateNodeName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
