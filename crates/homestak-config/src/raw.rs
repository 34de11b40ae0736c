use std::collections::HashMap;

use serde::Deserialize;

use homestak_domain::{
    Execution, ExecutionMode, Manifest, Node, NodeKind, NodeName, OnError, Settings,
};

use crate::error::ConfigError;

/// On-disk shape of a manifest file, schema_version 2 (current).
///
/// `schema_version` 1 documents are accepted too: [`migrate_v1`] rewrites
/// their field names onto this shape before conversion.
#[derive(Debug, Deserialize)]
pub struct RawManifest {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub settings: RawSettings,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSettings {
    pub on_error: Option<String>,
    pub timeout_buffer_seconds: Option<u32>,
    pub keep_on_failure: Option<bool>,
    pub cleanup_on_failure: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RawNode {
    pub name: String,
    pub kind: String,
    pub parent: Option<String>,
    pub preset: String,
    pub image: String,
    pub vmid: Option<u64>,
    pub disk_gib: u32,
    pub execution: RawExecution,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RawExecution {
    pub mode: String,
    pub spec: Option<String>,
}

/// Raw shape of a schema_version 1 document, named the way the fields read
/// before the v2 rename.
#[derive(Debug, Deserialize)]
struct RawManifestV1 {
    name: String,
    #[serde(default)]
    settings: RawSettingsV1,
    #[serde(default)]
    nodes: Vec<RawNodeV1>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettingsV1 {
    on_failure: Option<String>,
    timeout_buffer_seconds: Option<u32>,
    keep_on_failure: Option<bool>,
    cleanup_on_failure: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawNodeV1 {
    name: String,
    kind: String,
    parent: Option<String>,
    preset: String,
    image: String,
    vm_id: Option<u64>,
    disk_gb: u32,
    push_pull: String,
    spec_file: Option<String>,
    #[serde(default)]
    vars: HashMap<String, String>,
}

/// Parses a manifest document, migrating schema_version 1 onto the
/// current shape first.
pub fn parse_raw_manifest(text: &str, path: &str) -> Result<RawManifest, ConfigError> {
    let probe: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|source| ConfigError::YamlParse {
            path: path.to_string(),
            source,
        })?;
    let schema_version = probe
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(2);

    if schema_version == 1 {
        let v1: RawManifestV1 =
            serde_yaml::from_str(text).map_err(|source| ConfigError::YamlParse {
                path: path.to_string(),
                source,
            })?;
        Ok(migrate_v1(v1))
    } else {
        serde_yaml::from_str(text).map_err(|source| ConfigError::YamlParse {
            path: path.to_string(),
            source,
        })
    }
}

/// Rewrites a v1 document's field names onto the v2 shape. Values carry
/// over unchanged; only the vocabulary changes (`on_failure` -> `on_error`,
/// `vm_id` -> `vmid`, `disk_gb` -> `disk_gib`, `push_pull` -> `execution.mode`,
/// `spec_file` -> `execution.spec`).
fn migrate_v1(v1: RawManifestV1) -> RawManifest {
    RawManifest {
        schema_version: 2,
        name: v1.name,
        settings: RawSettings {
            on_error: v1.settings.on_failure,
            timeout_buffer_seconds: v1.settings.timeout_buffer_seconds,
            keep_on_failure: v1.settings.keep_on_failure,
            cleanup_on_failure: v1.settings.cleanup_on_failure,
        },
        nodes: v1
            .nodes
            .into_iter()
            .map(|n| RawNode {
                name: n.name,
                kind: n.kind,
                parent: n.parent,
                preset: n.preset,
                image: n.image,
                vmid: n.vm_id,
                disk_gib: n.disk_gb,
                execution: RawExecution {
                    mode: n.push_pull,
                    spec: n.spec_file,
                },
                vars: n.vars,
            })
            .collect(),
    }
}

pub fn convert_manifest(raw: RawManifest, path: &str) -> Result<Manifest, ConfigError> {
    let settings = convert_settings(raw.settings, path)?;
    let nodes = raw
        .nodes
        .into_iter()
        .map(|n| convert_node(n, path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Manifest {
        schema_version: 2,
        name: raw.name,
        settings,
        nodes,
    })
}

fn convert_settings(raw: RawSettings, path: &str) -> Result<Settings, ConfigError> {
    let on_error = match raw.on_error.as_deref() {
        None => OnError::Stop,
        Some("stop") => OnError::Stop,
        Some("rollback") => OnError::Rollback,
        Some("continue") => OnError::Continue,
        Some(other) => {
            return Err(ConfigError::Conversion {
                path: path.to_string(),
                message: format!("unknown on_error policy '{other}'"),
            })
        }
    };
    Ok(Settings {
        on_error,
        timeout_buffer_seconds: raw.timeout_buffer_seconds.unwrap_or(30),
        keep_on_failure: raw.keep_on_failure.unwrap_or(false),
        cleanup_on_failure: raw.cleanup_on_failure.unwrap_or(false),
    })
}

fn convert_node(raw: RawNode, path: &str) -> Result<Node, ConfigError> {
    let kind = parse_kind(&raw.kind, path)?;
    let execution = convert_execution(raw.execution, path)?;
    Ok(Node {
        name: NodeName::new(raw.name),
        kind,
        parent: raw.parent.map(NodeName::new),
        preset: raw.preset,
        image: raw.image,
        vmid: raw.vmid,
        disk_gib: raw.disk_gib,
        execution,
        vars: raw.vars,
    })
}

fn parse_kind(s: &str, path: &str) -> Result<NodeKind, ConfigError> {
    match s {
        "pve" => Ok(NodeKind::Pve),
        "vm" => Ok(NodeKind::Vm),
        other => Err(ConfigError::Conversion {
            path: path.to_string(),
            message: format!("unknown node kind '{other}'"),
        }),
    }
}

fn convert_execution(raw: RawExecution, path: &str) -> Result<Execution, ConfigError> {
    let mode = match raw.mode.as_str() {
        "push" => ExecutionMode::Push,
        "pull" => ExecutionMode::Pull,
        other => {
            return Err(ConfigError::Conversion {
                path: path.to_string(),
                message: format!("unknown execution mode '{other}'"),
            })
        }
    };
    Ok(Execution {
        mode,
        spec: raw.spec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_document_migrates_field_names() {
        let yaml = r#"
schema_version: 1
name: lab
settings:
  on_failure: rollback
nodes:
  - name: hv1
    kind: pve
    parent: null
    preset: small
    image: pve-base
    vm_id: 100
    disk_gb: 32
    push_pull: push
    spec_file: null
"#;
        let raw = parse_raw_manifest(yaml, "lab.yaml").unwrap();
        assert_eq!(raw.schema_version, 2);
        assert_eq!(raw.settings.on_error.as_deref(), Some("rollback"));
        assert_eq!(raw.nodes[0].vmid, Some(100));
        assert_eq!(raw.nodes[0].disk_gib, 32);
        assert_eq!(raw.nodes[0].execution.mode, "push");
    }

    #[test]
    fn v2_document_round_trips_unchanged() {
        let yaml = r#"
schema_version: 2
name: lab
nodes: []
"#;
        let raw = parse_raw_manifest(yaml, "lab.yaml").unwrap();
        assert_eq!(raw.schema_version, 2);
        assert_eq!(raw.name, "lab");
    }

    #[test]
    fn unknown_on_error_policy_is_rejected() {
        let raw = RawSettings {
            on_error: Some("explode".into()),
            timeout_buffer_seconds: None,
            keep_on_failure: None,
            cleanup_on_failure: None,
        };
        let err = convert_settings(raw, "lab.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Conversion { .. }));
    }
}
