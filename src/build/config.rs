//! Build configuration
//!
//! One immutable configuration per build invocation, loaded from a YAML
//! descriptor. Nothing here is mutated once a build starts.

use std::path::PathBuf;

use serde::Deserialize;

use crate::registry::RegistryAuthConfig;

/// How the image is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStrategy {
    /// Source-to-image: builder image + archive, no Dockerfile
    #[default]
    S2i,
    /// Dockerfile build inside the cluster
    Docker,
    /// Local daemonless build - not driven through OpenShift
    Jib,
}

/// Which build objects to delete and recreate before building
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildRecreateMode {
    #[default]
    None,
    BuildConfig,
    ImageStream,
    All,
}

impl BuildRecreateMode {
    pub fn build_config(self) -> bool {
        matches!(self, Self::BuildConfig | Self::All)
    }

    pub fn image_stream(self) -> bool {
        matches!(self, Self::ImageStream | Self::All)
    }
}

/// Where the built image lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutputKind {
    /// Tag in an ImageStream managed alongside the BuildConfig
    #[default]
    ImageStreamTag,
    /// Direct push to an external registry
    DockerImage,
}

/// The image a build invocation produces
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Full image reference, e.g. `quay.io/demo/app:1.2.3`
    pub name: String,
    /// Base or builder image (required for s2i)
    #[serde(default)]
    pub from: Option<String>,
}

/// Immutable configuration for one build run
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildServiceConfig {
    #[serde(default)]
    pub strategy: BuildStrategy,
    #[serde(default)]
    pub recreate: BuildRecreateMode,
    #[serde(default)]
    pub output_kind: BuildOutputKind,
    /// Namespace override; falls back to the cluster default
    #[serde(default)]
    pub namespace: Option<String>,
    /// Directory the image stream record file is written to
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Stem of the `<artifact>-is.yml` record file; defaults to the image
    /// simple name
    #[serde(default)]
    pub artifact_id: Option<String>,
    /// Name of the pull secret to synthesize or update
    #[serde(default)]
    pub pull_secret: Option<String>,
    /// Extra tags aliased to the built image
    #[serde(default)]
    pub additional_tags: Vec<String>,
    /// Enable local image lookup on a created ImageStream
    #[serde(default)]
    pub local_image_lookup: bool,
    #[serde(default)]
    pub cpu_request: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub memory_request: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    /// Bound on the build pod readiness wait; the build watch itself is
    /// unbounded
    #[serde(default = "default_pod_ready_timeout")]
    pub pod_ready_timeout_seconds: u64,
    #[serde(default)]
    pub registry_auth: RegistryAuthConfig,
}

fn default_pod_ready_timeout() -> u64 {
    120
}

impl Default for BuildServiceConfig {
    fn default() -> Self {
        Self {
            strategy: BuildStrategy::default(),
            recreate: BuildRecreateMode::default(),
            output_kind: BuildOutputKind::default(),
            namespace: None,
            output_dir: None,
            artifact_id: None,
            pull_secret: None,
            additional_tags: Vec::new(),
            local_image_lookup: false,
            cpu_request: None,
            cpu_limit: None,
            memory_request: None,
            memory_limit: None,
            pod_ready_timeout_seconds: default_pod_ready_timeout(),
            registry_auth: RegistryAuthConfig::default(),
        }
    }
}

/// Build descriptor file: image plus service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDescriptor {
    pub image: ImageConfig,
    #[serde(default)]
    pub build: BuildServiceConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recreate_mode_scopes() {
        assert!(!BuildRecreateMode::None.build_config());
        assert!(BuildRecreateMode::BuildConfig.build_config());
        assert!(!BuildRecreateMode::BuildConfig.image_stream());
        assert!(BuildRecreateMode::ImageStream.image_stream());
        assert!(BuildRecreateMode::All.build_config());
        assert!(BuildRecreateMode::All.image_stream());
    }

    #[test]
    fn test_descriptor_defaults() {
        let descriptor: BuildDescriptor = serde_yaml::from_str(
            "image:\n  name: quay.io/demo/app:1.0\n",
        )
        .unwrap();
        assert_eq!(descriptor.build.strategy, BuildStrategy::S2i);
        assert_eq!(descriptor.build.recreate, BuildRecreateMode::None);
        assert_eq!(descriptor.build.output_kind, BuildOutputKind::ImageStreamTag);
        assert_eq!(descriptor.build.pod_ready_timeout_seconds, 120);
    }

    #[test]
    fn test_descriptor_full() {
        let descriptor: BuildDescriptor = serde_yaml::from_str(
            concat!(
                "image:\n",
                "  name: quay.io/demo/app:1.0\n",
                "  from: registry.access.redhat.com/ubi9/openjdk-17\n",
                "build:\n",
                "  strategy: docker\n",
                "  recreate: all\n",
                "  outputKind: dockerimage\n",
                "  pullSecret: quay-pull\n",
                "  additionalTags: [stable, \"1.0\"]\n",
                "  memoryLimit: 1Gi\n",
            ),
        )
        .unwrap();
        assert_eq!(descriptor.build.strategy, BuildStrategy::Docker);
        assert_eq!(descriptor.build.output_kind, BuildOutputKind::DockerImage);
        assert_eq!(descriptor.build.additional_tags, ["stable", "1.0"]);
        assert_eq!(descriptor.build.memory_limit.as_deref(), Some("1Gi"));
        assert_eq!(descriptor.image.from.as_deref().unwrap(), "registry.access.redhat.com/ubi9/openjdk-17");
    }
}
