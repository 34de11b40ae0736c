mod raw;
mod loader;
pub mod error;

pub use error::ConfigError;
pub use loader::{load_manifest, load_manifest_str, load_manifests_dir};
pub use raw::{convert_manifest, parse_raw_manifest};
