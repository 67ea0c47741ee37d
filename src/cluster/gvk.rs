//! Kind to API coordinate mapping
//!
//! Manifests generated by build descriptors carry only `kind` and `apiVersion`;
//! all cluster traffic goes through `DynamicObject`, so every supported kind
//! needs its (group, version, plural) coordinates to build an `ApiResource`.

use anyhow::Result;
use kube::core::ApiResource;

/// Get (group, version, plural) for a resource kind
///
/// Unknown kinds are a hard error: the apply and undeploy paths must not guess
/// at API coordinates.
pub fn gvk_for_kind(kind: &str) -> Result<(&'static str, &'static str, &'static str)> {
    let coords = match kind {
        // Core v1
        "Pod" => ("", "v1", "pods"),
        "Service" => ("", "v1", "services"),
        "ServiceAccount" => ("", "v1", "serviceaccounts"),
        "ConfigMap" => ("", "v1", "configmaps"),
        "Secret" => ("", "v1", "secrets"),
        "Namespace" => ("", "v1", "namespaces"),
        "PersistentVolumeClaim" => ("", "v1", "persistentvolumeclaims"),
        "ReplicationController" => ("", "v1", "replicationcontrollers"),

        // apps/v1 workloads
        "Deployment" => ("apps", "v1", "deployments"),
        "ReplicaSet" => ("apps", "v1", "replicasets"),
        "StatefulSet" => ("apps", "v1", "statefulsets"),
        "DaemonSet" => ("apps", "v1", "daemonsets"),

        // batch/v1
        "Job" => ("batch", "v1", "jobs"),
        "CronJob" => ("batch", "v1", "cronjobs"),

        // networking.k8s.io/v1
        "Ingress" => ("networking.k8s.io", "v1", "ingresses"),

        // OpenShift API groups
        "Route" => ("route.openshift.io", "v1", "routes"),
        "Build" => ("build.openshift.io", "v1", "builds"),
        "BuildConfig" => ("build.openshift.io", "v1", "buildconfigs"),
        "ImageStream" => ("image.openshift.io", "v1", "imagestreams"),
        "ImageStreamTag" => ("image.openshift.io", "v1", "imagestreamtags"),
        "DeploymentConfig" => ("apps.openshift.io", "v1", "deploymentconfigs"),
        "Project" => ("project.openshift.io", "v1", "projects"),
        "ProjectRequest" => ("project.openshift.io", "v1", "projectrequests"),

        _ => return Err(anyhow::anyhow!("Unknown resource kind: {}", kind)),
    };

    Ok(coords)
}

/// Build an `ApiResource` for a supported kind
pub fn api_resource_for_kind(kind: &str) -> Result<ApiResource> {
    let (group, version, plural) = gvk_for_kind(kind)?;
    let api_version = if group.is_empty() {
        version.to_string()
    } else {
        format!("{}/{}", group, version)
    };
    Ok(ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version,
        kind: kind.to_string(),
        plural: plural.to_string(),
    })
}

/// Whether a kind is cluster-scoped (no namespace in its API path)
pub fn is_cluster_scoped(kind: &str) -> bool {
    matches!(kind, "Namespace" | "Project" | "ProjectRequest")
}
