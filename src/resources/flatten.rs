//! Manifest flattening
//!
//! Generated manifest files can contain a single object, a plain YAML list, a
//! typed `kind: List` wrapper, or arbitrarily nested combinations of those.
//! Flattening walks the structure with an explicit work stack and a visited
//! set keyed on container identity, so a container reachable through more
//! than one path is expanded exactly once and the walk always terminates.

use serde_json::Value;
use std::collections::HashSet;

/// Flatten one manifest value into its concrete resources
pub fn flatten_value(value: &Value) -> Vec<Value> {
    flatten_values(&[value])
}

/// Flatten a set of manifest values into their concrete resources
///
/// Elements that are neither resources nor list-likes (scalars, fragments
/// without a kind) are ignored. Order of first reachability is preserved.
pub fn flatten_values(values: &[&Value]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut seen: HashSet<*const Value> = HashSet::new();
    // Work stack holds containers in reverse so expansion preserves input order.
    let mut stack: Vec<&Value> = values.iter().rev().copied().collect();

    while let Some(node) = stack.pop() {
        if let Some(items) = list_items(node) {
            // Identity, not equality: two structurally equal lists at
            // different addresses are both walked, the same list reached
            // twice is not.
            if !seen.insert(node as *const Value) {
                continue;
            }
            for item in items.iter().rev() {
                stack.push(item);
            }
        } else if crate::resources::is_resource(node) {
            out.push(node.clone());
        }
    }

    out
}

/// Items of a list-like node: a plain array, or a typed List wrapper
fn list_items(value: &Value) -> Option<&Vec<Value>> {
    if let Some(array) = value.as_array() {
        return Some(array);
    }
    match crate::resources::kind_of(value) {
        Some(kind) if kind.ends_with("List") => value.get("items").and_then(|i| i.as_array()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_resource() {
        let pod = json!({"kind": "Pod", "metadata": {"name": "p"}});
        let flat = flatten_value(&pod);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0]["metadata"]["name"], "p");
    }

    #[test]
    fn test_typed_list_wrapper() {
        let list = json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {"kind": "Service", "metadata": {"name": "a"}},
                {"kind": "Pod", "metadata": {"name": "b"}}
            ]
        });
        let flat = flatten_value(&list);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0]["kind"], "Service");
        assert_eq!(flat[1]["kind"], "Pod");
    }

    #[test]
    fn test_nested_lists_preserve_order() {
        let nested = json!([
            {"kind": "ConfigMap", "metadata": {"name": "first"}},
            [
                {"kind": "Service", "metadata": {"name": "second"}},
                {"kind": "List", "items": [{"kind": "Pod", "metadata": {"name": "third"}}]}
            ],
            {"kind": "Secret", "metadata": {"name": "fourth"}}
        ]);
        let names: Vec<String> = flatten_value(&nested)
            .iter()
            .map(|r| r["metadata"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_non_resource_elements_ignored() {
        let mixed = json!([
            "a stray string",
            42,
            {"not": "a resource"},
            {"kind": "Pod", "metadata": {"name": "real"}}
        ]);
        let flat = flatten_value(&mixed);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0]["metadata"]["name"], "real");
    }

    #[test]
    fn test_aliased_container_expanded_once() {
        // The same list reached through two entries must not duplicate its
        // resources or loop the walk.
        let shared = json!([
            {"kind": "Pod", "metadata": {"name": "only-once"}}
        ]);
        let flat = flatten_values(&[&shared, &shared, &shared]);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0]["metadata"]["name"], "only-once");
    }

    #[test]
    fn test_structurally_equal_but_distinct_lists_both_walked() {
        let a = json!([{"kind": "Pod", "metadata": {"name": "p"}}]);
        let b = json!([{"kind": "Pod", "metadata": {"name": "p"}}]);
        let flat = flatten_values(&[&a, &b]);
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_deeply_nested_terminates() {
        let mut doc = json!({"kind": "Pod", "metadata": {"name": "deep"}});
        for _ in 0..500 {
            doc = json!([doc]);
        }
        let flat = flatten_value(&doc);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0]["metadata"]["name"], "deep");
    }

    #[test]
    fn test_empty_input() {
        assert!(flatten_value(&json!([])).is_empty());
        assert!(flatten_values(&[]).is_empty());
    }
}
