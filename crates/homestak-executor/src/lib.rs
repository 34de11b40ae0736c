pub mod error;
pub mod executor;
pub mod report;
pub mod vars;

pub use error::ExecutorError;
pub use executor::Executor;
pub use report::{Change, RunReport, RunRequest, Verb};
