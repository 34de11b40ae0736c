mod error;
mod fingerprint;
mod validate;

pub use error::GraphError;
pub use fingerprint::compute_fingerprint;
pub use validate::{extract_subtree, validate, ResolvedGraph};
