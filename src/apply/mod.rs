//! Resource apply engine
//!
//! Takes a desired manifest (single object or arbitrarily nested collection),
//! fetches current cluster state per resource, and decides create / update /
//! recreate / skip. Updates are delegated to the kind-keyed [`PatchService`].
//!
//! Resources are processed sequentially; an API error aborts the batch for
//! the failing resource and propagates. Prior successful applies are NOT
//! rolled back - partial application is expected and the caller owns
//! batch-level recovery.

pub mod patch;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::cluster::{self, ClusterOps};
use crate::resources::{self, flatten, sanitize};
pub use patch::{PatchError, PatchService};

/// Per-resource apply decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Recreated,
    Skipped,
    Unsupported,
}

/// One outcome per input resource
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub outcome: Outcome,
}

/// Apply behavior switches, fixed for one service instance
#[derive(Debug, Clone)]
pub struct ApplyOpts {
    /// Create resources that do not exist yet
    pub allow_create: bool,
    /// Delete-then-create existing resources instead of patching
    pub recreate: bool,
    /// Restrict mutation to Service resources
    pub services_only: bool,
}

impl Default for ApplyOpts {
    fn default() -> Self {
        Self {
            allow_create: true,
            recreate: false,
            services_only: false,
        }
    }
}

pub struct ApplyService {
    cluster: Arc<dyn ClusterOps>,
    patch: PatchService,
    opts: ApplyOpts,
    openshift: OnceCell<bool>,
}

impl ApplyService {
    pub fn new(cluster: Arc<dyn ClusterOps>, opts: ApplyOpts) -> Self {
        Self {
            cluster,
            patch: PatchService::new(),
            opts,
            openshift: OnceCell::new(),
        }
    }

    /// Apply a manifest value against the cluster
    ///
    /// `manifest` may be a single resource, a plain list, a typed List
    /// wrapper, or nested combinations; it is flattened first. `source` names
    /// where the manifest came from and only feeds log lines.
    pub async fn apply(
        &self,
        manifest: &Value,
        namespace: &str,
        source: &str,
    ) -> Result<Vec<ApplyOutcome>> {
        let resources = flatten::flatten_value(manifest);
        let mut outcomes = Vec::with_capacity(resources.len());
        for resource in &resources {
            outcomes.push(self.apply_resource(resource, namespace, source).await?);
        }
        Ok(outcomes)
    }

    /// Apply a single resource
    pub async fn apply_resource(
        &self,
        resource: &Value,
        namespace: &str,
        source: &str,
    ) -> Result<ApplyOutcome> {
        let kind = resources::kind_of(resource)
            .ok_or_else(|| anyhow::anyhow!("Resource from {} has no kind", source))?
            .to_string();
        let name = resources::name_of(resource)
            .ok_or_else(|| anyhow::anyhow!("{} from {} has no name", kind, source))?
            .to_string();
        let namespace = resources::namespace_of(resource)
            .unwrap_or(namespace)
            .to_string();

        let outcome = |outcome| ApplyOutcome {
            kind: kind.clone(),
            namespace: namespace.clone(),
            name: name.clone(),
            outcome,
        };

        if self.opts.services_only && kind != "Service" {
            // Excluded from mutation entirely - not even an existence check.
            tracing::debug!(
                "Services-only mode, ignoring {} {}/{} from {}",
                kind,
                namespace,
                name,
                source
            );
            return Ok(outcome(Outcome::Skipped));
        }

        if kind == "Project" {
            return self.apply_project(&name, source).await;
        }

        let existing = self.cluster.get(&kind, &namespace, &name).await?;

        match existing {
            None if self.opts.allow_create => {
                self.cluster
                    .create(&namespace, &sanitize(resource))
                    .await
                    .with_context(|| {
                        format!("Failed to create {} {}/{} from {}", kind, namespace, name, source)
                    })?;
                tracing::info!("Created {} {}/{} from {}", kind, namespace, name, source);
                Ok(outcome(Outcome::Created))
            }
            None => {
                tracing::info!(
                    "Creation disabled, skipping missing {} {}/{} from {}",
                    kind,
                    namespace,
                    name,
                    source
                );
                Ok(outcome(Outcome::Skipped))
            }
            Some(_) if self.opts.recreate => {
                self.cluster.delete(&kind, &namespace, &name).await?;
                self.cluster.create(&namespace, &sanitize(resource)).await?;
                tracing::info!("Recreated {} {}/{} from {}", kind, namespace, name, source);
                Ok(outcome(Outcome::Recreated))
            }
            Some(live) => {
                let updated = self
                    .patch
                    .patch(&self.cluster, &namespace, resource, &live)
                    .await?;
                match updated {
                    Some(_) => tracing::info!("Updated {} {}/{} from {}", kind, namespace, name, source),
                    None => tracing::info!("Using existing {} {}/{}", kind, namespace, name),
                }
                Ok(outcome(Outcome::Updated))
            }
        }
    }

    /// Projects only exist on OpenShift, and even there direct creation is
    /// not permitted - the API expects a ProjectRequest instead.
    async fn apply_project(&self, name: &str, source: &str) -> Result<ApplyOutcome> {
        let outcome = |outcome| ApplyOutcome {
            kind: "Project".to_string(),
            namespace: String::new(),
            name: name.to_string(),
            outcome,
        };

        if !self.is_openshift().await? {
            tracing::warn!(
                "Project {} from {} is only supported on OpenShift, ignoring",
                name,
                source
            );
            return Ok(outcome(Outcome::Unsupported));
        }

        if self.cluster.get("Project", "", name).await?.is_some() {
            tracing::info!("Using existing Project {}", name);
            return Ok(outcome(Outcome::Updated));
        }

        if !self.opts.allow_create {
            tracing::info!("Creation disabled, skipping missing Project {}", name);
            return Ok(outcome(Outcome::Skipped));
        }

        let request = json!({
            "apiVersion": "project.openshift.io/v1",
            "kind": "ProjectRequest",
            "metadata": {"name": name}
        });
        self.cluster
            .create("", &request)
            .await
            .with_context(|| format!("Failed to request project {}", name))?;
        tracing::info!("Requested Project {} from {}", name, source);
        Ok(outcome(Outcome::Created))
    }

    async fn is_openshift(&self) -> Result<bool> {
        self.openshift
            .get_or_try_init(|| async { cluster::is_openshift(self.cluster.as_ref()).await })
            .await
            .map(|openshift| *openshift)
    }
}
