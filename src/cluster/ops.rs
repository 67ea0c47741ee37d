//! Cluster operations seam
//!
//! Every service in this crate talks to the cluster through [`ClusterOps`]
//! rather than holding a `kube::Client` directly. The trait keeps the apply,
//! undeploy and build paths testable against an in-memory cluster, and keeps
//! the kind-to-API plumbing in one place.
//!
//! Objects cross the seam as `serde_json::Value`: generated manifests arrive
//! as YAML documents, and the patch and cascade logic all works structurally,
//! so a typed model per kind would only add conversion noise.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams, WatchEvent, WatchParams};
use kube::core::DynamicObject;
use kube::{Api, Client};
use serde_json::Value;
use tokio::sync::mpsc;

use super::gvk::{api_resource_for_kind, gvk_for_kind, is_cluster_scoped};

/// Adapt an unbounded channel receiver into a stream that ends when the
/// sending task does
fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
        .boxed()
}

/// Typed CRUD, watch and discovery operations against one cluster
///
/// `get` returns `None` for an absent object; every other miss is an error.
/// Mutation errors are not retried here - callers decide batch-level behavior.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Fetch a resource, `None` if it does not exist
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<Option<Value>>;

    /// Create a resource from its manifest
    async fn create(&self, namespace: &str, resource: &Value) -> Result<Value>;

    /// Apply a JSON merge patch to an existing resource
    async fn merge_patch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Value>;

    /// Delete a resource
    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<()>;

    /// List all resources of a kind in a namespace
    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<Value>>;

    /// Watch a single named resource; the stream yields the object on every
    /// change and ends when the server closes the watch channel
    async fn watch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<BoxStream<'static, Value>>;

    /// Follow a pod's log output line by line
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        follow: bool,
    ) -> Result<BoxStream<'static, String>>;

    /// Names of the API groups the cluster serves
    async fn api_groups(&self) -> Result<Vec<String>>;

    /// Start a binary build by streaming an archive to a BuildConfig's
    /// `instantiatebinary` subresource; returns the created Build
    async fn instantiate_binary_build(
        &self,
        namespace: &str,
        build_config: &str,
        archive: &Path,
    ) -> Result<Value>;
}

/// [`ClusterOps`] backed by a `kube::Client`
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, kind: &str, namespace: &str) -> Result<Api<DynamicObject>> {
        let resource = api_resource_for_kind(kind)?;
        let api = if is_cluster_scoped(kind) {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        };
        Ok(api)
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<Option<Value>> {
        let api = self.api_for(kind, namespace)?;
        let obj = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to fetch {} {}/{}", kind, namespace, name))?;
        obj.map(|o| serde_json::to_value(&o).map_err(Into::into))
            .transpose()
    }

    async fn create(&self, namespace: &str, resource: &Value) -> Result<Value> {
        let kind = crate::resources::kind_of(resource)
            .ok_or_else(|| anyhow::anyhow!("Resource has no kind: {}", resource))?
            .to_string();
        let obj: DynamicObject = serde_json::from_value(resource.clone())
            .with_context(|| format!("Invalid {} manifest", kind))?;
        let api = self.api_for(&kind, namespace)?;
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .with_context(|| {
                format!(
                    "Failed to create {} {}/{}",
                    kind,
                    namespace,
                    obj.metadata.name.as_deref().unwrap_or("<unnamed>")
                )
            })?;
        Ok(serde_json::to_value(&created)?)
    }

    async fn merge_patch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Value> {
        let api = self.api_for(kind, namespace)?;
        let patched = api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch.clone()))
            .await
            .with_context(|| format!("Failed to patch {} {}/{}", kind, namespace, name))?;
        Ok(serde_json::to_value(&patched)?)
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        let api = self.api_for(kind, namespace)?;
        api.delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .with_context(|| format!("Failed to delete {} {}/{}", kind, namespace, name))
    }

    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<Value>> {
        let api = self.api_for(kind, namespace)?;
        let listed = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list {} in {}", kind, namespace))?;
        listed
            .items
            .iter()
            .map(|o| serde_json::to_value(o).map_err(Into::into))
            .collect()
    }

    async fn watch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<BoxStream<'static, Value>> {
        let api = self.api_for(kind, namespace)?;
        let params = WatchParams::default().fields(&format!("metadata.name={}", name));
        // A plain watch, not the auto-restarting runtime watcher: callers need
        // to observe the channel closing so they can fall back to a direct
        // fetch of current state. The watch task owns the Api and feeds a
        // channel; dropping the stream tears the task down on its next send.
        let kind = kind.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let stream = match api.watch(&params, "0").await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Failed to watch {}: {}", kind, e);
                    return;
                }
            };
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(WatchEvent::Added(obj)) | Ok(WatchEvent::Modified(obj)) => {
                        let Ok(value) = serde_json::to_value(&obj) else {
                            continue;
                        };
                        if tx.send(value).is_err() {
                            return;
                        }
                    }
                    Ok(WatchEvent::Deleted(_)) | Ok(WatchEvent::Bookmark(_)) => {}
                    Ok(WatchEvent::Error(status)) => {
                        tracing::warn!("Watch error for {}: {}", kind, status.message);
                    }
                    Err(e) => {
                        tracing::warn!("Watch stream error for {}: {}", kind, e);
                        return;
                    }
                }
            }
        });
        Ok(receiver_stream(rx))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        follow: bool,
    ) -> Result<BoxStream<'static, String>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow,
            ..LogParams::default()
        };
        let pod = pod.to_string();
        let namespace = namespace.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let reader = match api.log_stream(&pod, &params).await {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::warn!("Failed to stream logs for pod {}/{}: {}", namespace, pod, e);
                    return;
                }
            };
            let mut lines = Box::pin(reader).lines();
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        });
        Ok(receiver_stream(rx))
    }

    async fn api_groups(&self) -> Result<Vec<String>> {
        let groups = self
            .client
            .list_api_groups()
            .await
            .context("Failed to discover API groups")?;
        Ok(groups.groups.into_iter().map(|g| g.name).collect())
    }

    async fn instantiate_binary_build(
        &self,
        namespace: &str,
        build_config: &str,
        archive: &Path,
    ) -> Result<Value> {
        let (group, version, plural) = gvk_for_kind("BuildConfig")?;
        let body = tokio::fs::read(archive).await.with_context(|| {
            format!("Failed to read build archive {}", archive.display())
        })?;
        let path = format!(
            "/apis/{}/{}/namespaces/{}/{}/{}/instantiatebinary",
            group, version, namespace, plural, build_config
        );
        let request = http::Request::builder()
            .method("POST")
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .context("Failed to build instantiatebinary request")?;
        let build: Value = self.client.request(request).await.with_context(|| {
            format!(
                "Failed to instantiate binary build for BuildConfig {}/{}",
                namespace, build_config
            )
        })?;
        Ok(build)
    }
}
