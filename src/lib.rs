//! kforge library
//!
//! Turns generated build descriptors and manifests into container images and
//! live cluster state: OpenShift binary builds, manifest apply/patch,
//! cascading undeploy, and the debug/port-forward/log-tail runtime services.
//! The CLI in `main.rs` is a thin shell over these services.

pub mod apply;
pub mod build;
pub mod cluster;
pub mod debug;
pub mod manifest;
pub mod podlog;
pub mod portforward;
pub mod registry;
pub mod resources;
pub mod undeploy;
pub mod util;

// Re-export commonly used types for convenience
pub use apply::{ApplyOpts, ApplyOutcome, ApplyService, Outcome, PatchService};
pub use build::{BuildDescriptor, BuildService, BuildServiceConfig, ImageConfig, ImageName};
pub use cluster::{ClusterOps, KubeCluster, create_client, default_namespace, is_openshift};
pub use debug::DebugService;
pub use podlog::PodLogService;
pub use undeploy::UndeployService;
