use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use homestak_domain::Node;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::action::{Action, ActionResult, Context, HostConfig};
use crate::error::ActionError;

/// Reassembles a base image from split `.partaa`, `.partab`, ... files in a
/// local image cache directory, verifying the result against an optional
/// `.sha256` sidecar, and returns the path to the whole file.
///
/// Split files are probed in lexicographic suffix order (`aa`, `ab`, ...,
/// `az`, `ba`, ...) and concatenated in that order; this mirrors the output
/// of the common `split -b <size> -d` / `split -a 2` conventions.
pub struct EnsureImageArtifact {
    cache_dir: PathBuf,
}

impl EnsureImageArtifact {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        EnsureImageArtifact {
            cache_dir: cache_dir.into(),
        }
    }

    fn whole_path(&self, image: &str) -> PathBuf {
        self.cache_dir.join(image)
    }

    fn part_paths(&self, image: &str) -> Vec<PathBuf> {
        let mut parts = Vec::new();
        for a in b'a'..=b'z' {
            for b in b'a'..=b'z' {
                let suffix = format!("{}{}", a as char, b as char);
                let path = self.cache_dir.join(format!("{image}.part{suffix}"));
                if path.exists() {
                    parts.push(path);
                } else if !parts.is_empty() {
                    // Suffixes are contiguous from "aa"; stop at the first gap.
                    return parts;
                }
            }
        }
        parts
    }

    fn reassemble(&self, image: &str) -> Result<PathBuf, ActionError> {
        let whole = self.whole_path(image);
        if whole.exists() {
            return Ok(whole);
        }

        let parts = self.part_paths(image);
        if parts.is_empty() {
            return Err(ActionError::ProvisionFailed(format!(
                "no image artifact or split parts found for '{image}' under {}",
                self.cache_dir.display()
            )));
        }

        let tmp = whole.with_extension("reassembling");
        {
            use std::io::Write;
            let mut out = std::fs::File::create(&tmp)
                .map_err(|e| ActionError::Internal(e.to_string()))?;
            for part in &parts {
                let bytes =
                    std::fs::read(part).map_err(|e| ActionError::Internal(e.to_string()))?;
                out.write_all(&bytes)
                    .map_err(|e| ActionError::Internal(e.to_string()))?;
            }
        }

        if let Some(expected) = read_checksum_sidecar(&self.cache_dir, image) {
            let actual = sha256_file(&tmp)?;
            if actual != expected {
                let _ = std::fs::remove_file(&tmp);
                return Err(ActionError::ProvisionFailed(format!(
                    "checksum mismatch reassembling '{image}': expected {expected}, got {actual}"
                )));
            }
        }

        std::fs::rename(&tmp, &whole).map_err(|e| ActionError::Internal(e.to_string()))?;
        Ok(whole)
    }
}

fn read_checksum_sidecar(cache_dir: &Path, image: &str) -> Option<String> {
    let sidecar = cache_dir.join(format!("{image}.sha256"));
    std::fs::read_to_string(sidecar)
        .ok()
        .map(|s| s.split_whitespace().next().unwrap_or("").to_string())
        .filter(|s| !s.is_empty())
}

fn sha256_file(path: &Path) -> Result<String, ActionError> {
    let bytes = std::fs::read(path).map_err(|e| ActionError::Internal(e.to_string()))?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}

#[async_trait]
impl Action for EnsureImageArtifact {
    fn name(&self) -> &'static str {
        "ensure_image_artifact"
    }

    async fn execute(
        &self,
        node: &Node,
        _host: &HostConfig,
        _ctx: &Context,
    ) -> Result<ActionResult, ActionError> {
        debug!(node = %node.name, image = node.image, "EnsureImageArtifact: reassembling if needed");
        let image = node.image.clone();
        let cache_dir = self.cache_dir.clone();
        let path = tokio::task::spawn_blocking(move || {
            EnsureImageArtifact::new(cache_dir).reassemble(&image)
        })
        .await
        .map_err(|e| ActionError::Internal(e.to_string()))??;

        let mut outputs = HashMap::new();
        outputs.insert("image_path".to_string(), path.display().to_string());
        Ok(ActionResult::ok("image artifact ready").with_outputs(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_parts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("img.partaa"), b"hello, ").unwrap();
        std::fs::write(dir.path().join("img.partab"), b"world").unwrap();

        let action = EnsureImageArtifact::new(dir.path());
        let path = action.reassemble("img").unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents, "hello, world");
    }

    #[test]
    fn returns_whole_file_unmodified_if_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("img"), b"already whole").unwrap();

        let action = EnsureImageArtifact::new(dir.path());
        let path = action.reassemble("img").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "already whole");
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("img.partaa"), b"tampered").unwrap();
        std::fs::write(dir.path().join("img.sha256"), "0000000000000000000000000000000000000000000000000000000000000000\n").unwrap();

        let action = EnsureImageArtifact::new(dir.path());
        assert!(action.reassemble("img").is_err());
    }

    #[test]
    fn missing_parts_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let action = EnsureImageArtifact::new(dir.path());
        assert!(action.reassemble("nonexistent").is_err());
    }
}
