use std::collections::HashMap;

/// Keys whose values are merged as a comma-separated set union rather than
/// overwritten by a later layer — package lists accumulate, they don't
/// replace each other as a site's defaults meet a node's own additions.
const SET_UNION_SUFFIXES: &[&str] = &["_packages", "packages"];

/// Resolves the five-layer variable bundle a node's actions see: site
/// defaults, overridden by host settings, overridden by posture (the
/// node's role-derived defaults), overridden by the node's own `vars:`
/// block, overridden last by anything token issuance contributed (e.g. the
/// provisioning token itself). Later layers win on scalar keys; keys ending
/// in one of [`SET_UNION_SUFFIXES`] are unioned instead, so downstream
/// inputs can layer over upstream outputs without clobbering them.
pub fn resolve(layers: &[&HashMap<String, String>]) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = HashMap::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            if is_set_union_key(key) {
                union_into(&mut merged, key, value);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

fn is_set_union_key(key: &str) -> bool {
    SET_UNION_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

fn union_into(merged: &mut HashMap<String, String>, key: &str, value: &str) {
    let mut items: Vec<String> = merged
        .get(key)
        .map(|existing| existing.split(',').map(str::trim).map(String::from).collect())
        .unwrap_or_default();
    for item in value.split(',').map(str::trim) {
        if !item.is_empty() && !items.iter().any(|i| i == item) {
            items.push(item.to_string());
        }
    }
    merged.insert(key.to_string(), items.join(","));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn later_layer_overrides_scalar_keys() {
        let site = map(&[("region", "us-east")]);
        let node = map(&[("region", "us-west")]);
        let merged = resolve(&[&site, &node]);
        assert_eq!(merged.get("region").unwrap(), "us-west");
    }

    #[test]
    fn package_lists_union_instead_of_overwrite() {
        let site = map(&[("base_packages", "curl,vim")]);
        let node = map(&[("base_packages", "vim,htop")]);
        let merged = resolve(&[&site, &node]);
        let mut got: Vec<&str> = merged.get("base_packages").unwrap().split(',').collect();
        got.sort();
        assert_eq!(got, vec!["curl", "htop", "vim"]);
    }

    #[test]
    fn empty_layers_produce_empty_bundle() {
        let merged = resolve(&[]);
        assert!(merged.is_empty());
    }
}
