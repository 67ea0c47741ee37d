//! Patch strategies
//!
//! Computes the minimal merge patch that brings a live resource in line with
//! a desired manifest. Dispatch is by resource kind through a registry, not a
//! type hierarchy: each kind has exactly one strategy, and a kind without one
//! is a first-class unsupported error.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};

use crate::cluster::ClusterOps;
use crate::resources::sanitize;
use crate::util::apply_merge_patch;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("No patch strategy registered for kind {0}")]
    UnsupportedKind(String),
}

/// Builds a merge-patch body from (desired, live)
type PatcherFn = fn(&Value, &Value) -> Value;

/// Kind-keyed patch strategy registry
pub struct PatchService {
    strategies: HashMap<&'static str, PatcherFn>,
}

impl PatchService {
    pub fn new() -> Self {
        let mut strategies: HashMap<&'static str, PatcherFn> = HashMap::new();

        // Controllers: the live selector is authoritative - rewriting it would
        // orphan the controller's pods.
        for kind in [
            "ReplicationController",
            "Deployment",
            "DeploymentConfig",
            "ReplicaSet",
            "StatefulSet",
            "DaemonSet",
        ] {
            strategies.insert(kind, controller_patch as PatcherFn);
        }

        // Routes: the spec (host, TLS) is managed by the router once admitted.
        strategies.insert("Route", metadata_only_patch as PatcherFn);

        // Services: clusterIP is allocated server-side and immutable.
        strategies.insert("Service", service_patch as PatcherFn);

        for kind in [
            "ConfigMap",
            "Secret",
            "ServiceAccount",
            "Ingress",
            "PersistentVolumeClaim",
            "BuildConfig",
            "ImageStream",
        ] {
            strategies.insert(kind, overlay_patch as PatcherFn);
        }

        Self { strategies }
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.strategies.contains_key(kind)
    }

    /// Compute the merge-patch body for a kind, without applying it
    pub fn build_patch(&self, kind: &str, desired: &Value, live: &Value) -> Result<Value, PatchError> {
        let patcher = self
            .strategies
            .get(kind)
            .ok_or_else(|| PatchError::UnsupportedKind(kind.to_string()))?;
        Ok(patcher(desired, live))
    }

    /// Patch a live resource toward the desired manifest
    ///
    /// Returns the updated resource, or `None` when the patch would not
    /// change anything the user manages - in that case no call is made to the
    /// cluster, so applying the same manifest twice is a server-side no-op.
    pub async fn patch(
        &self,
        cluster: &Arc<dyn ClusterOps>,
        namespace: &str,
        desired: &Value,
        live: &Value,
    ) -> Result<Option<Value>> {
        let kind = crate::resources::kind_of(desired)
            .ok_or_else(|| anyhow::anyhow!("Desired resource has no kind"))?;
        let name = crate::resources::name_of(desired)
            .ok_or_else(|| anyhow::anyhow!("Desired resource has no name"))?;
        let patch = self.build_patch(kind, desired, live)?;

        if is_noop(live, &patch) {
            tracing::debug!("{} {}/{} is unchanged", kind, namespace, name);
            return Ok(None);
        }

        let updated = cluster.merge_patch(kind, namespace, name, &patch).await?;
        Ok(Some(updated))
    }
}

impl Default for PatchService {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether applying the patch would leave the live object semantically
/// unchanged, ignoring server-managed fields
fn is_noop(live: &Value, patch: &Value) -> bool {
    let mut projected = live.clone();
    apply_merge_patch(&mut projected, patch);
    sanitize(&projected) == sanitize(live)
}

/// User-managed metadata from a desired manifest: labels and annotations
fn metadata_overlay(desired: &Value) -> Value {
    let mut metadata = json!({});
    if let Some(labels) = desired.pointer("/metadata/labels") {
        metadata["labels"] = labels.clone();
    }
    if let Some(annotations) = desired.pointer("/metadata/annotations") {
        metadata["annotations"] = annotations.clone();
    }
    metadata
}

/// Overlay metadata and spec, preserving the live selector
fn controller_patch(desired: &Value, live: &Value) -> Value {
    let mut patch = json!({ "metadata": metadata_overlay(desired) });
    if let Some(spec) = desired.get("spec") {
        let mut spec = spec.clone();
        if let Some(live_selector) = live.pointer("/spec/selector") {
            spec["selector"] = live_selector.clone();
        }
        patch["spec"] = spec;
    }
    patch
}

/// Overlay metadata only, leaving the live spec untouched
fn metadata_only_patch(desired: &Value, _live: &Value) -> Value {
    json!({ "metadata": metadata_overlay(desired) })
}

/// Overlay metadata and spec, preserving the allocated clusterIP
fn service_patch(desired: &Value, live: &Value) -> Value {
    let mut patch = json!({ "metadata": metadata_overlay(desired) });
    if let Some(spec) = desired.get("spec") {
        let mut spec = spec.clone();
        for field in ["clusterIP", "clusterIPs"] {
            if let Some(live_value) = live.pointer(&format!("/spec/{}", field)) {
                spec[field] = live_value.clone();
            }
        }
        patch["spec"] = spec;
    }
    patch
}

/// Overlay everything the manifest carries except server-managed fields
fn overlay_patch(desired: &Value, _live: &Value) -> Value {
    let mut patch = sanitize(desired);
    if let Some(obj) = patch.as_object_mut() {
        obj.remove("apiVersion");
        obj.remove("kind");
        if let Some(metadata) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            metadata.remove("name");
            metadata.remove("namespace");
        }
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use serde_json::json;

    fn service() -> PatchService {
        PatchService::new()
    }

    #[test]
    fn test_unsupported_kind() {
        let err = service()
            .build_patch("Pod", &json!({}), &json!({}))
            .unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedKind(ref k) if k == "Pod"));
    }

    #[test]
    fn test_controller_patch_preserves_live_selector() {
        let desired = json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "labels": {"app": "web", "version": "2"}},
            "spec": {"replicas": 3, "selector": {"matchLabels": {"app": "web-v2"}}}
        });
        let live = json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "uid": "u1"},
            "spec": {"replicas": 1, "selector": {"matchLabels": {"app": "web"}}}
        });
        let patch = service().build_patch("Deployment", &desired, &live).unwrap();
        assert_eq!(patch["spec"]["selector"]["matchLabels"]["app"], "web");
        assert_eq!(patch["spec"]["replicas"], 3);
        assert_eq!(patch["metadata"]["labels"]["version"], "2");
    }

    #[test]
    fn test_route_patch_preserves_live_spec() {
        let desired = json!({
            "kind": "Route",
            "metadata": {"name": "app", "labels": {"app": "demo"}},
            "spec": {"host": "new-host.example.com"}
        });
        let live = json!({
            "kind": "Route",
            "metadata": {"name": "app"},
            "spec": {"host": "assigned.apps.example.com"}
        });
        let patch = service().build_patch("Route", &desired, &live).unwrap();
        assert_eq!(patch.get("spec"), None);
        assert_eq!(patch["metadata"]["labels"]["app"], "demo");
    }

    #[test]
    fn test_service_patch_preserves_cluster_ip() {
        let desired = json!({
            "kind": "Service",
            "metadata": {"name": "web"},
            "spec": {"ports": [{"port": 8080}]}
        });
        let live = json!({
            "kind": "Service",
            "metadata": {"name": "web"},
            "spec": {"clusterIP": "10.0.0.42", "ports": [{"port": 80}]}
        });
        let patch = service().build_patch("Service", &desired, &live).unwrap();
        assert_eq!(patch["spec"]["clusterIP"], "10.0.0.42");
        assert_eq!(patch["spec"]["ports"][0]["port"], 8080);
    }

    #[tokio::test]
    async fn test_patch_is_idempotent() {
        let desired = json!({
            "kind": "ConfigMap",
            "metadata": {"name": "settings"},
            "data": {"key": "v2"}
        });
        let fake = FakeCluster::new();
        fake.insert(
            "demo",
            json!({"kind": "ConfigMap", "metadata": {"name": "settings"}, "data": {"key": "v1"}}),
        );
        let cluster: Arc<dyn ClusterOps> = Arc::new(fake);

        let svc = service();
        let live = cluster.get("ConfigMap", "demo", "settings").await.unwrap().unwrap();
        let updated = svc.patch(&cluster, "demo", &desired, &live).await.unwrap();
        assert!(updated.is_some());

        // Second application of the same desired state: no server-side change
        let live = cluster.get("ConfigMap", "demo", "settings").await.unwrap().unwrap();
        let second = svc.patch(&cluster, "demo", &desired, &live).await.unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_noop_detection_ignores_server_fields() {
        let live = json!({
            "kind": "ConfigMap",
            "metadata": {"name": "c", "uid": "u1", "resourceVersion": "7"},
            "data": {"k": "v"}
        });
        let patch = json!({"data": {"k": "v"}});
        assert!(is_noop(&live, &patch));

        let changing = json!({"data": {"k": "v2"}});
        assert!(!is_noop(&live, &changing));
    }
}
