//! Undeploy with OpenShift cascade
//!
//! Deletes every resource recorded in a generated manifest, in reverse apply
//! order. On OpenShift, deleting an ImageStream or DeploymentConfig also
//! removes the Builds and BuildConfigs whose output feeds it - scoped by the
//! provider label so an unrelated resource sharing an output tag string is
//! left alone. Deletion is best-effort throughout: one failure is logged and
//! the walk continues.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::cluster::{self, ClusterOps};
use crate::manifest;
use crate::resources::{self, flatten};

pub struct UndeployService {
    cluster: Arc<dyn ClusterOps>,
    namespace: String,
}

impl UndeployService {
    pub fn new(cluster: Arc<dyn ClusterOps>, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    /// Undeploy everything recorded in the given manifest files
    pub async fn undeploy_files(&self, manifests: &[impl AsRef<Path>]) -> Result<()> {
        let mut docs = Vec::new();
        for path in manifests {
            let path = path.as_ref();
            if !path.exists() {
                tracing::warn!("Manifest {} does not exist, skipping", path.display());
                continue;
            }
            docs.extend(manifest::load(path)?);
        }
        let doc_refs: Vec<&Value> = docs.iter().collect();
        self.undeploy_resources(&flatten::flatten_values(&doc_refs))
            .await
    }

    /// Delete the given resources, dependents first, in reverse apply order
    pub async fn undeploy_resources(&self, applied: &[Value]) -> Result<()> {
        let openshift = cluster::is_openshift(self.cluster.as_ref()).await?;
        for resource in applied.iter().rev() {
            self.delete_with_cascade(resource, openshift).await;
        }
        Ok(())
    }

    /// Delete one resource and, on OpenShift, its build artifacts
    async fn delete_with_cascade(&self, resource: &Value, openshift: bool) {
        let kind = resources::kind_of(resource).unwrap_or_default().to_string();
        let name = resources::name_of(resource).unwrap_or_default().to_string();
        let namespace = resources::namespace_of(resource)
            .unwrap_or(&self.namespace)
            .to_string();

        if openshift {
            let tags = derive_image_stream_tags(resource);
            if !tags.is_empty() {
                self.delete_dependent_builds(&namespace, &tags, resources::provider_of(resource))
                    .await;
            }
        }

        tracing::info!("Deleting {} {}/{}", kind, namespace, name);
        if let Err(e) = self.cluster.delete(&kind, &namespace, &name).await {
            tracing::warn!("Failed to delete {} {}/{}: {:#}", kind, namespace, name, e);
        }
    }

    /// Delete Builds and BuildConfigs whose output targets one of the given
    /// image stream tags, scoped by the origin's provider label
    async fn delete_dependent_builds(
        &self,
        namespace: &str,
        tags: &[String],
        origin_provider: Option<String>,
    ) {
        for kind in ["Build", "BuildConfig"] {
            let dependents = match self.cluster.list(kind, namespace).await {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!("Failed to list {}s in {}: {:#}", kind, namespace, e);
                    continue;
                }
            };
            for dependent in dependents {
                if !targets_any_tag(&dependent, tags) {
                    continue;
                }
                if !provider_matches(&origin_provider, &dependent) {
                    continue;
                }
                let name = resources::name_of(&dependent).unwrap_or_default();
                tracing::info!(
                    "Deleting {} {}/{} owned via image stream tag",
                    kind,
                    namespace,
                    name
                );
                if let Err(e) = self.cluster.delete(kind, namespace, name).await {
                    tracing::warn!("Failed to delete {} {}/{}: {:#}", kind, namespace, name, e);
                }
            }
        }
    }
}

/// Image stream tag identifiers (`name:tag`) whose builds belong to this
/// resource
///
/// An ImageStream owns every tag in its spec; a DeploymentConfig owns the
/// tags referenced by its ImageChange triggers.
pub fn derive_image_stream_tags(resource: &Value) -> Vec<String> {
    match resources::kind_of(resource) {
        Some("ImageStream") => {
            let name = resources::name_of(resource).unwrap_or_default();
            resource
                .pointer("/spec/tags")
                .and_then(|t| t.as_array())
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                        .map(|tag| format!("{}:{}", name, tag))
                        .collect()
                })
                .unwrap_or_default()
        }
        Some("DeploymentConfig") => resource
            .pointer("/spec/triggers")
            .and_then(|t| t.as_array())
            .map(|triggers| {
                triggers
                    .iter()
                    .filter(|t| t.get("type").and_then(|ty| ty.as_str()) == Some("ImageChange"))
                    .filter_map(trigger_image_stream_tag)
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// The `name:tag` of an ImageChange trigger pointing at an ImageStreamTag
fn trigger_image_stream_tag(trigger: &Value) -> Option<String> {
    let from = trigger
        .pointer("/imageChangeParams/from")
        .or_else(|| trigger.get("from"))?;
    if from.get("kind").and_then(|k| k.as_str()) != Some("ImageStreamTag") {
        return None;
    }
    from.get("name")
        .and_then(|n| n.as_str())
        .map(|n| n.to_string())
}

/// Whether a Build/BuildConfig writes its output to one of the given tags
fn targets_any_tag(dependent: &Value, tags: &[String]) -> bool {
    let to = match dependent.pointer("/spec/output/to") {
        Some(to) => to,
        None => return false,
    };
    if to.get("kind").and_then(|k| k.as_str()) != Some("ImageStreamTag") {
        return false;
    }
    match to.get("name").and_then(|n| n.as_str()) {
        Some(target) => tags.iter().any(|t| t == target),
        None => false,
    }
}

/// Provider-label scoping: when the origin carries a provider label, the
/// dependent must carry the same value
fn provider_matches(origin_provider: &Option<String>, dependent: &Value) -> bool {
    match origin_provider {
        Some(provider) => resources::provider_of(dependent).as_deref() == Some(provider),
        None => true,
    }
}
