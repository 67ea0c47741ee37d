//! Manifest resource helpers
//!
//! Generated manifests are handled structurally as `serde_json::Value`.
//! This module provides the accessors the apply, undeploy and build paths
//! use to dig into them, mirroring how status extraction walks objects.

pub mod flatten;

use serde_json::Value;
use std::collections::BTreeMap;

/// Label that scopes cascade deletion to resources from the same tool run
pub const PROVIDER_LABEL: &str = "provider";

/// Provider label value stamped on resources this tool creates
pub const PROVIDER_NAME: &str = "kforge";

/// Kind of a manifest object, if present
pub fn kind_of(resource: &Value) -> Option<&str> {
    resource.get("kind").and_then(|k| k.as_str())
}

/// metadata.name, if present
pub fn name_of(resource: &Value) -> Option<&str> {
    resource
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
}

/// metadata.namespace, if present
pub fn namespace_of(resource: &Value) -> Option<&str> {
    resource
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(|n| n.as_str())
}

/// metadata.uid, if present
pub fn uid_of(resource: &Value) -> Option<&str> {
    resource
        .get("metadata")
        .and_then(|m| m.get("uid"))
        .and_then(|u| u.as_str())
}

/// metadata.labels as an owned map
pub fn labels_of(resource: &Value) -> BTreeMap<String, String> {
    resource
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(|l| l.as_object())
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Value of the provider label, if set
pub fn provider_of(resource: &Value) -> Option<String> {
    labels_of(resource).get(PROVIDER_LABEL).cloned()
}

/// Whether a value looks like a concrete resource manifest
///
/// Anything with a `kind` other than a list wrapper and a metadata.name
/// qualifies; list wrappers and loose scalars do not.
pub fn is_resource(value: &Value) -> bool {
    match kind_of(value) {
        Some(kind) => !kind.ends_with("List") && name_of(value).is_some(),
        None => false,
    }
}

/// Strip server-managed metadata so a live object can be compared against,
/// or re-submitted as, a desired manifest
pub fn sanitize(resource: &Value) -> Value {
    let mut out = resource.clone();
    if let Some(metadata) = out.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in [
            "uid",
            "resourceVersion",
            "creationTimestamp",
            "generation",
            "managedFields",
            "selfLink",
        ] {
            metadata.remove(field);
        }
    }
    if let Some(obj) = out.as_object_mut() {
        obj.remove("status");
    }
    out
}

/// Whether a pod reports ready
///
/// True on a Ready condition with status True, or a Running/Succeeded phase
/// when conditions are not populated yet.
pub fn pod_is_ready(pod: &Value) -> bool {
    if let Some(conditions) = pod.pointer("/status/conditions").and_then(|c| c.as_array()) {
        return conditions.iter().any(|c| {
            c.get("type").and_then(|t| t.as_str()) == Some("Ready")
                && c.get("status").and_then(|s| s.as_str()) == Some("True")
        });
    }
    matches!(
        pod.pointer("/status/phase").and_then(|p| p.as_str()),
        Some("Running") | Some("Succeeded")
    )
}
