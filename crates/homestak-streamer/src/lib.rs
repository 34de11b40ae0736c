pub mod error;
pub mod shell;
pub mod trailer;

pub use error::StreamerError;
pub use shell::{CommandOutcome, LocalProcessShell, RemoteCommand, RemoteShell};
pub use trailer::{extract_trailer, project_context, resolve_trailer, TrailerResult};
