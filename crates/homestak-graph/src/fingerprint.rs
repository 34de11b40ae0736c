use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize `value` to canonical JSON (object keys sorted) and return its
/// SHA-256 hex digest. Used to detect manifest/config drift cheaply: a node
/// is reprovisioned only when its own fingerprint changes, not the whole
/// manifest's.
pub fn compute_fingerprint<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}

fn sort_json_keys(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_json_keys(v))).collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(sort_json_keys).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn fingerprint_is_stable_under_map_key_order() {
        let mut a = HashMap::new();
        a.insert("b", 2);
        a.insert("a", 1);
        let mut b = HashMap::new();
        b.insert("a", 1);
        b.insert("b", 2);
        assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn fingerprint_changes_with_value() {
        assert_ne!(compute_fingerprint(&1), compute_fingerprint(&2));
    }
}
