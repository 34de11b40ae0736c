pub mod error;
pub mod file_store;
pub mod lock;
pub mod memory;
pub mod state;
pub mod store;

pub use error::StoreError;
pub use file_store::FileStore;
pub use lock::RunLock;
pub use memory::InMemoryStore;
pub use state::{AuditEvent, ExecutionState, NodeError, NodeState};
pub use store::{ExecutionKey, StateStore};
