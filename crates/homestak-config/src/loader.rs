use std::path::Path;

use homestak_domain::Manifest;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{convert_manifest, parse_raw_manifest};

/// Loads and validates a single manifest file from disk.
pub fn load_manifest(path: &Path) -> Result<Manifest, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_manifest_str(&content, &path.display().to_string())
}

/// Parses a manifest from an in-memory document, e.g. one served over the
/// spec/repo server's pull endpoint.
pub fn load_manifest_str(content: &str, path: &str) -> Result<Manifest, ConfigError> {
    let raw = parse_raw_manifest(content, path)?;
    debug!(path, schema_version = raw.schema_version, "loading manifest");
    convert_manifest(raw, path)
}

/// Walks `dir` and loads every `*.yaml`/`*.yml` manifest found directly in
/// it. Used by the spec/repo server to serve a whole directory of manifests
/// keyed by name.
pub fn load_manifests_dir(dir: &Path) -> Result<Vec<Manifest>, ConfigError> {
    let mut manifests = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        let is_manifest = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if !path.is_file() || !is_manifest {
            continue;
        }
        manifests.push(load_manifest(&path)?);
    }

    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_yaml() -> &'static str {
        r#"
schema_version: 2
name: lab
settings:
  on_error: rollback
nodes:
  - name: hv1
    kind: pve
    parent: null
    preset: small
    image: pve-base
    vmid: 100
    disk_gib: 32
    execution:
      mode: push
      spec: null
  - name: guest1
    kind: vm
    parent: hv1
    preset: small
    image: debian-12
    vmid: null
    disk_gib: 16
    execution:
      mode: pull
      spec: guest.yaml
"#
    }

    #[test]
    fn loads_a_manifest_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.yaml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(sample_yaml().as_bytes())
            .unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.name, "lab");
        assert_eq!(manifest.nodes.len(), 2);
        assert_eq!(manifest.nodes[1].parent.as_ref().unwrap().as_str(), "hv1");
    }

    #[test]
    fn loads_every_manifest_in_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.yaml"))
            .unwrap()
            .write_all(sample_yaml().as_bytes())
            .unwrap();
        std::fs::File::create(dir.path().join("notes.txt"))
            .unwrap()
            .write_all(b"not a manifest")
            .unwrap();

        let manifests = load_manifests_dir(dir.path()).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "lab");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_manifest(Path::new("/nonexistent/lab.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
