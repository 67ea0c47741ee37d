//! Pod log tailing with replacement tracking
//!
//! Follows the logs of the newest ready pod matching a label selector. When
//! the pod is replaced (rollout, crash loop), the tail switches to the
//! replacement and says so.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::cluster::ClusterOps;
use crate::resources;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct PodLogService {
    cluster: Arc<dyn ClusterOps>,
    namespace: String,
}

impl PodLogService {
    pub fn new(cluster: Arc<dyn ClusterOps>, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    /// Tail logs of the pods selected by `selector` until cancelled
    pub async fn tail(&self, selector: &BTreeMap<String, String>) -> Result<()> {
        let mut current: Option<String> = None;
        let mut tail_task: Option<JoinHandle<()>> = None;

        loop {
            let newest = self.newest_ready_pod(selector).await?;
            if newest != current {
                if let Some(task) = tail_task.take() {
                    task.abort();
                }
                match (&current, &newest) {
                    (Some(old), Some(new)) => {
                        tracing::info!("Pod {} was replaced by {}, switching log tail", old, new);
                    }
                    (None, Some(new)) => tracing::info!("Tailing logs of pod {}", new),
                    (Some(old), None) => tracing::info!("Pod {} is gone, waiting for a replacement", old),
                    (None, None) => {}
                }
                if let Some(pod) = &newest {
                    tail_task = Some(self.spawn_tail(pod.clone()));
                }
                current = newest;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn spawn_tail(&self, pod: String) -> JoinHandle<()> {
        let cluster = self.cluster.clone();
        let namespace = self.namespace.clone();
        tokio::spawn(async move {
            match cluster.pod_logs(&namespace, &pod, true).await {
                Ok(mut lines) => {
                    while let Some(line) = lines.next().await {
                        println!("[{}] {}", pod, line);
                    }
                }
                Err(e) => tracing::warn!("Could not tail pod {}/{}: {:#}", namespace, pod, e),
            }
        })
    }

    /// Newest ready pod matching the selector, by creation timestamp
    pub async fn newest_ready_pod(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Option<String>> {
        let pods = self.cluster.list("Pod", &self.namespace).await?;
        let mut candidates: Vec<&serde_json::Value> = pods
            .iter()
            .filter(|pod| {
                let labels = resources::labels_of(pod);
                selector
                    .iter()
                    .all(|(k, v)| labels.get(k).map(|l| l == v).unwrap_or(false))
            })
            .filter(|pod| resources::pod_is_ready(pod))
            .collect();
        candidates.sort_by_key(|pod| {
            pod.pointer("/metadata/creationTimestamp")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string()
        });
        Ok(candidates
            .last()
            .and_then(|pod| resources::name_of(pod))
            .map(|name| name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use serde_json::json;

    fn pod(name: &str, created: &str, ready: bool) -> serde_json::Value {
        json!({
            "kind": "Pod",
            "metadata": {
                "name": name,
                "labels": {"app": "demo"},
                "creationTimestamp": created
            },
            "status": {"conditions": [
                {"type": "Ready", "status": if ready { "True" } else { "False" }}
            ]}
        })
    }

    #[tokio::test]
    async fn test_newest_ready_pod_wins() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert("demo", pod("app-old", "2024-01-01T00:00:00Z", true));
        fake.insert("demo", pod("app-new", "2024-06-01T00:00:00Z", true));
        fake.insert("demo", pod("app-newest-but-not-ready", "2024-07-01T00:00:00Z", false));

        let cluster: Arc<dyn ClusterOps> = fake.clone();
        let svc = PodLogService::new(cluster, "demo");
        let selector = BTreeMap::from([("app".to_string(), "demo".to_string())]);
        assert_eq!(
            svc.newest_ready_pod(&selector).await.unwrap().as_deref(),
            Some("app-new")
        );
    }

    #[tokio::test]
    async fn test_selector_mismatch_is_none() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert("demo", pod("app-1", "2024-01-01T00:00:00Z", true));

        let cluster: Arc<dyn ClusterOps> = fake.clone();
        let svc = PodLogService::new(cluster, "demo");
        let selector = BTreeMap::from([("app".to_string(), "other".to_string())]);
        assert_eq!(svc.newest_ready_pod(&selector).await.unwrap(), None);
    }
}
