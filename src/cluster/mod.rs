//! Cluster access
//!
//! Handles connection to the Kubernetes API server, default-namespace
//! resolution, and platform detection (OpenShift vs vanilla Kubernetes).
//! All resource traffic goes through the [`ClusterOps`] seam in `ops`.

pub mod gvk;
pub mod ops;

#[cfg(test)]
pub mod fake;

use anyhow::Result;
use kube::{Client, Config};

pub use ops::{ClusterOps, KubeCluster};

/// API group that marks a cluster as OpenShift
pub const OPENSHIFT_BUILD_GROUP: &str = "build.openshift.io";

/// Initialize and return a Kubernetes client
///
/// Uses the default kubeconfig loading strategy:
/// 1. In-cluster config (if running in a pod)
/// 2. KUBECONFIG environment variable
/// 3. ~/.kube/config
pub async fn create_client() -> Result<Client> {
    let config = Config::infer().await?;
    let client = Client::try_from(config)?;
    Ok(client)
}

/// Resolve the namespace operations should run against
///
/// An explicit namespace from resource configuration wins; otherwise the
/// NAMESPACE environment variable, otherwise "default".
pub fn default_namespace(configured: Option<&str>) -> String {
    if let Some(ns) = configured {
        if !ns.is_empty() {
            return ns.to_string();
        }
    }
    if let Ok(ns) = std::env::var("NAMESPACE") {
        if !ns.is_empty() {
            return ns;
        }
    }
    "default".to_string()
}

/// Detect whether the cluster is OpenShift
///
/// OpenShift is identified by the presence of the `build.openshift.io` API
/// group; vanilla Kubernetes does not serve it.
pub async fn is_openshift(cluster: &dyn ClusterOps) -> Result<bool> {
    let groups = cluster.api_groups().await?;
    Ok(groups.iter().any(|g| g == OPENSHIFT_BUILD_GROUP))
}
