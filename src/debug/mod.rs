//! Remote debugging
//!
//! Switches the first controller among the applied entities into debug mode
//! by injecting the JVM remote-debug environment into its pod template, then
//! waits for a ready pod so the caller can port-forward to it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};

use crate::apply::ApplyService;
use crate::cluster::ClusterOps;
use crate::resources;
use crate::util::retry;

pub const DEFAULT_DEBUG_PORT: u16 = 5005;

const ENV_DEBUG_ENABLE: &str = "JAVA_ENABLE_DEBUG";
const ENV_DEBUG_SUSPEND: &str = "JAVA_DEBUG_SUSPEND";
const ENV_DEBUG_PORT: &str = "JAVA_DEBUG_PORT";

/// Kinds whose pod template can carry the debug environment
const CONTROLLER_KINDS: [&str; 6] = [
    "Deployment",
    "DeploymentConfig",
    "ReplicationController",
    "ReplicaSet",
    "StatefulSet",
    "DaemonSet",
];

pub struct DebugService {
    cluster: Arc<dyn ClusterOps>,
    apply: ApplyService,
    namespace: String,
}

impl DebugService {
    pub fn new(cluster: Arc<dyn ClusterOps>, apply: ApplyService, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            apply,
            namespace: namespace.into(),
        }
    }

    /// Enable debug mode on the first controller among `entities`
    ///
    /// Applies the modified controller and returns the name of a ready pod
    /// carrying the debug environment, for the caller to port-forward to.
    pub async fn debug(&self, entities: &[Value], port: u16, suspend: bool) -> Result<String> {
        let controller = entities
            .iter()
            .find(|e| {
                resources::kind_of(e)
                    .map(|k| CONTROLLER_KINDS.contains(&k))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                anyhow::anyhow!("No controller found among the applied entities to debug")
            })?;

        let kind = resources::kind_of(controller).unwrap_or_default().to_string();
        let name = resources::name_of(controller).unwrap_or_default().to_string();
        tracing::info!(
            "Enabling debug mode on {} {}/{} (port {}, suspend {})",
            kind,
            self.namespace,
            name,
            port,
            suspend
        );

        let debug_enabled = enable_debug(controller, port, suspend);
        self.apply
            .apply_resource(&debug_enabled, &self.namespace, "debug")
            .await?;

        let selector = selector_labels(controller);
        let selector = &selector;
        let pod = retry::with_fixed_delay(60, Duration::from_secs(2), || async move {
            self.find_ready_pod(selector).await
        })
        .await
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No ready pod for {} {}/{} appeared in debug mode",
                kind,
                self.namespace,
                name
            )
        })?;

        tracing::info!("Pod {}/{} is ready for debugging", self.namespace, pod);
        Ok(pod)
    }

    async fn find_ready_pod(&self, selector: &Value) -> Option<String> {
        let pods = match self.cluster.list("Pod", &self.namespace).await {
            Ok(pods) => pods,
            Err(e) => {
                tracing::debug!("Listing pods failed, retrying: {:#}", e);
                return None;
            }
        };
        pods.iter()
            .filter(|pod| labels_match(selector, pod))
            .find(|pod| resources::pod_is_ready(pod))
            .and_then(|pod| resources::name_of(pod))
            .map(|name| name.to_string())
    }
}

/// Inject the remote-debug environment into every container of the
/// controller's pod template
pub fn enable_debug(controller: &Value, port: u16, suspend: bool) -> Value {
    let mut out = controller.clone();
    if let Some(containers) = out
        .pointer_mut("/spec/template/spec/containers")
        .and_then(|c| c.as_array_mut())
    {
        for container in containers {
            set_env(container, ENV_DEBUG_ENABLE, "true");
            set_env(container, ENV_DEBUG_SUSPEND, &suspend.to_string());
            set_env(container, ENV_DEBUG_PORT, &port.to_string());
        }
    }
    out
}

/// Set or replace an env entry on a container
fn set_env(container: &mut Value, name: &str, value: &str) {
    let Some(obj) = container.as_object_mut() else {
        return;
    };
    let env = obj.entry("env").or_insert_with(|| json!([]));
    if let Some(entries) = env.as_array_mut() {
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.get("name").and_then(|n| n.as_str()) == Some(name))
        {
            existing["value"] = json!(value);
        } else {
            entries.push(json!({"name": name, "value": value}));
        }
    }
}

/// Pod selector of a controller: matchLabels, a bare selector map, or the
/// template labels as a last resort
fn selector_labels(controller: &Value) -> Value {
    controller
        .pointer("/spec/selector/matchLabels")
        .or_else(|| controller.pointer("/spec/selector"))
        .filter(|s| s.is_object())
        .or_else(|| controller.pointer("/spec/template/metadata/labels"))
        .cloned()
        .unwrap_or_else(|| json!({}))
}

/// Whether a pod's labels carry every (key, value) of the selector
fn labels_match(selector: &Value, pod: &Value) -> bool {
    let Some(selector) = selector.as_object() else {
        return false;
    };
    if selector.is_empty() {
        return false;
    }
    let labels = resources::labels_of(pod);
    selector.iter().all(|(key, value)| {
        value
            .as_str()
            .map(|v| labels.get(key).map(|l| l == v).unwrap_or(false))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::ApplyOpts;
    use crate::cluster::fake::FakeCluster;

    fn deployment() -> Value {
        json!({
            "kind": "Deployment",
            "metadata": {"name": "app"},
            "spec": {
                "selector": {"matchLabels": {"app": "demo"}},
                "template": {
                    "metadata": {"labels": {"app": "demo"}},
                    "spec": {"containers": [
                        {"name": "app", "env": [{"name": "JAVA_OPTS", "value": "-Xmx256m"}]}
                    ]}
                }
            }
        })
    }

    #[test]
    fn test_enable_debug_injects_env() {
        let debugged = enable_debug(&deployment(), 5005, false);
        let env = debugged
            .pointer("/spec/template/spec/containers/0/env")
            .unwrap()
            .as_array()
            .unwrap();
        let get = |name: &str| {
            env.iter()
                .find(|e| e["name"] == name)
                .map(|e| e["value"].as_str().unwrap().to_string())
        };
        assert_eq!(get(ENV_DEBUG_ENABLE).unwrap(), "true");
        assert_eq!(get(ENV_DEBUG_SUSPEND).unwrap(), "false");
        assert_eq!(get(ENV_DEBUG_PORT).unwrap(), "5005");
        // Pre-existing env entries survive
        assert_eq!(get("JAVA_OPTS").unwrap(), "-Xmx256m");
    }

    #[test]
    fn test_enable_debug_replaces_existing_entry() {
        let first = enable_debug(&deployment(), 5005, false);
        let second = enable_debug(&first, 8000, true);
        let env = second
            .pointer("/spec/template/spec/containers/0/env")
            .unwrap()
            .as_array()
            .unwrap();
        let ports: Vec<&Value> = env.iter().filter(|e| e["name"] == ENV_DEBUG_PORT).collect();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0]["value"], "8000");
    }

    #[test]
    fn test_selector_labels_fallbacks() {
        assert_eq!(selector_labels(&deployment()), json!({"app": "demo"}));

        let rc = json!({
            "kind": "ReplicationController",
            "spec": {"selector": {"app": "legacy"}}
        });
        assert_eq!(selector_labels(&rc), json!({"app": "legacy"}));
    }

    #[tokio::test]
    async fn test_debug_applies_controller_and_finds_ready_pod() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(
            "demo",
            json!({
                "kind": "Pod",
                "metadata": {"name": "app-1234", "labels": {"app": "demo"}},
                "status": {"conditions": [{"type": "Ready", "status": "True"}]}
            }),
        );
        let cluster: Arc<dyn ClusterOps> = fake.clone();
        let apply = ApplyService::new(cluster.clone(), ApplyOpts::default());
        let svc = DebugService::new(cluster, apply, "demo");

        let pod = svc.debug(&[deployment()], 5005, false).await.unwrap();
        assert_eq!(pod, "app-1234");

        let applied = fake.stored("Deployment", "demo", "app").unwrap();
        let env = applied
            .pointer("/spec/template/spec/containers/0/env")
            .unwrap();
        assert!(env.to_string().contains(ENV_DEBUG_ENABLE));
    }

    #[tokio::test]
    async fn test_debug_without_controller_is_an_error() {
        let fake = Arc::new(FakeCluster::new());
        let cluster: Arc<dyn ClusterOps> = fake.clone();
        let apply = ApplyService::new(cluster.clone(), ApplyOpts::default());
        let svc = DebugService::new(cluster, apply, "demo");

        let entities = vec![json!({"kind": "Service", "metadata": {"name": "web"}})];
        let err = svc.debug(&entities, 5005, false).await.unwrap_err();
        assert!(err.to_string().contains("No controller"));
    }
}
