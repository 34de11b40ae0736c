pub mod action;
pub mod credential;
pub mod delegate;
pub mod error;
pub mod image;
pub mod local;
pub mod reachable;
pub mod registry;
pub mod retry;

pub use action::{Action, ActionResult, Context, HostConfig};
pub use credential::IssueHypervisorCredential;
pub use delegate::DelegateSubtree;
pub use error::{ActionError, ErrorKind};
pub use image::EnsureImageArtifact;
pub use local::LocalAction;
pub use reachable::AwaitReachable;
pub use registry::ActionRegistry;
pub use retry::with_retry;
