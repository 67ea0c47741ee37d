//! OpenShift binary build orchestration
//!
//! Drives one build invocation end to end: pull secret, BuildConfig and
//! ImageStream reconciliation, archive upload, pod readiness, build watch,
//! and post-build tagging. The caller supplies the build context archive;
//! producing it is an archiving concern, not a cluster one.
//!
//! The completion wait is a single-shot latch fulfilled exactly once by
//! whichever happens first: a terminal watch event, the attach-time terminal
//! pre-check, or the watch channel closing (in which case current state is
//! re-fetched directly). The pod readiness wait before it is soft-bounded -
//! on timeout the build watch is still authoritative.

pub mod config;
pub mod image_name;
pub mod imagestream;
pub mod secrets;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::cluster::{self, ClusterOps};
use crate::manifest;
use crate::registry::RegistryAuthResolver;
use crate::resources::{self, PROVIDER_LABEL, PROVIDER_NAME};

pub use config::{BuildDescriptor, BuildOutputKind, BuildRecreateMode, BuildServiceConfig, BuildStrategy, ImageConfig};
pub use image_name::ImageName;
pub use imagestream::{ImageStreamTagResolver, TagResolveError};

const TERMINAL_PHASES: [&str; 4] = ["Complete", "Failed", "Error", "Cancelled"];

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Build {build} ended in phase {phase}: {reason}")]
    Failed {
        build: String,
        phase: String,
        reason: String,
    },
    #[error("Build strategy {0} cannot drive an OpenShift binary build")]
    UnsupportedStrategy(String),
}

pub struct BuildService {
    cluster: Arc<dyn ClusterOps>,
    config: BuildServiceConfig,
    namespace: String,
}

impl BuildService {
    pub fn new(cluster: Arc<dyn ClusterOps>, config: BuildServiceConfig, fallback_namespace: &str) -> Self {
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| fallback_namespace.to_string());
        Self {
            cluster,
            config,
            namespace,
        }
    }

    /// Run one binary build from the given context archive
    ///
    /// Returns the name of the Build that ran.
    pub async fn build(&self, image: &ImageConfig, archive: &Path) -> Result<String> {
        if !cluster::is_openshift(self.cluster.as_ref()).await? {
            return Err(anyhow::anyhow!(
                "Binary builds need an OpenShift cluster; the {} API group is not served",
                cluster::OPENSHIFT_BUILD_GROUP
            ));
        }
        let image_name = ImageName::parse(&image.name)?;
        let bc_name = self.build_config_name(&image_name)?;
        tracing::info!(
            "Building {} via BuildConfig {}/{}",
            image.name,
            self.namespace,
            bc_name
        );

        self.ensure_pull_secret(image).await?;
        self.reconcile_build_config(&bc_name, &image_name, image).await?;
        if self.config.output_kind == BuildOutputKind::ImageStreamTag {
            self.reconcile_image_stream(&image_name).await?;
        }

        let build = self
            .cluster
            .instantiate_binary_build(&self.namespace, &bc_name, archive)
            .await
            .map_err(|e| self.classify_upload_error(e, &bc_name, image))?;
        let build_name = resources::name_of(&build).unwrap_or(&bc_name).to_string();
        tracing::info!("Started build {}/{}", self.namespace, build_name);

        self.wait_for_build_pod(&build_name).await;
        self.wait_for_build_completion(&build_name).await?;

        if self.config.output_kind == BuildOutputKind::ImageStreamTag {
            self.record_image_stream(&image_name).await?;
            self.apply_additional_tags(&image_name).await?;
        }
        Ok(build_name)
    }

    /// BuildConfig name: image simple name plus the strategy suffix
    fn build_config_name(&self, image_name: &ImageName) -> Result<String> {
        let suffix = match self.config.strategy {
            BuildStrategy::S2i => "s2i",
            BuildStrategy::Docker => "docker",
            BuildStrategy::Jib => {
                return Err(BuildError::UnsupportedStrategy("jib".to_string()).into());
            }
        };
        Ok(format!("{}-{}", image_name.simple_name(), suffix))
    }

    /// Synthesize or update the configured pull secret
    ///
    /// Nothing happens without a configured secret name, a base image, or
    /// resolvable credentials for the base image's registry.
    async fn ensure_pull_secret(&self, image: &ImageConfig) -> Result<()> {
        let Some(secret_name) = &self.config.pull_secret else {
            return Ok(());
        };
        let Some(from) = &image.from else {
            return Ok(());
        };
        let registry = ImageName::parse(from)?
            .registry
            .unwrap_or_else(|| "docker.io".to_string());
        let resolver = RegistryAuthResolver::new(self.config.registry_auth.clone());
        match resolver.resolve(&registry)? {
            Some(auth) => {
                secrets::ensure_pull_secret(
                    &self.cluster,
                    &self.namespace,
                    secret_name,
                    &registry,
                    &auth,
                    PROVIDER_NAME,
                )
                .await?;
            }
            None => {
                tracing::debug!(
                    "No registry credentials for {}, not creating pull secret {}",
                    registry,
                    secret_name
                );
            }
        }
        Ok(())
    }

    async fn reconcile_build_config(
        &self,
        name: &str,
        image_name: &ImageName,
        image: &ImageConfig,
    ) -> Result<()> {
        let strategy = self.strategy_spec(image)?;
        let output = self.output_spec(image_name);
        let desired = self.build_config_manifest(name, &strategy, &output);

        match self.cluster.get("BuildConfig", &self.namespace, name).await? {
            Some(existing) => {
                let source_type = existing
                    .pointer("/spec/source/type")
                    .and_then(|t| t.as_str());
                if source_type != Some("Binary") {
                    tracing::warn!(
                        "BuildConfig {}/{} has source type {}, expected Binary",
                        self.namespace,
                        name,
                        source_type.unwrap_or("<unset>")
                    );
                }
                if self.config.recreate.build_config() {
                    self.cluster.delete("BuildConfig", &self.namespace, name).await?;
                    self.cluster.create(&self.namespace, &desired).await?;
                    tracing::info!("Recreated BuildConfig {}/{}", self.namespace, name);
                } else {
                    let live_strategy = existing.pointer("/spec/strategy");
                    let live_output = existing.pointer("/spec/output");
                    if live_strategy != Some(&strategy) || live_output != Some(&output) {
                        let patch = json!({"spec": {"strategy": strategy, "output": output}});
                        self.cluster
                            .merge_patch("BuildConfig", &self.namespace, name, &patch)
                            .await?;
                        tracing::info!("Updated BuildConfig {}/{}", self.namespace, name);
                    } else {
                        tracing::info!("Using existing BuildConfig {}/{}", self.namespace, name);
                    }
                }
            }
            None => {
                self.cluster.create(&self.namespace, &desired).await?;
                tracing::info!("Created BuildConfig {}/{}", self.namespace, name);
            }
        }
        Ok(())
    }

    fn strategy_spec(&self, image: &ImageConfig) -> Result<Value> {
        match self.config.strategy {
            BuildStrategy::S2i => {
                let from = image.from.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("s2i build of {} needs a builder image (from)", image.name)
                })?;
                Ok(json!({
                    "type": "Source",
                    "sourceStrategy": {"from": {"kind": "DockerImage", "name": from}}
                }))
            }
            BuildStrategy::Docker => {
                let mut strategy = json!({"type": "Docker", "dockerStrategy": {}});
                if let Some(from) = &image.from {
                    strategy["dockerStrategy"]["from"] =
                        json!({"kind": "DockerImage", "name": from});
                }
                Ok(strategy)
            }
            BuildStrategy::Jib => Err(BuildError::UnsupportedStrategy("jib".to_string()).into()),
        }
    }

    fn output_spec(&self, image_name: &ImageName) -> Value {
        match self.config.output_kind {
            BuildOutputKind::ImageStreamTag => json!({
                "to": {
                    "kind": "ImageStreamTag",
                    "name": format!("{}:{}", image_name.simple_name(), image_name.tag())
                }
            }),
            BuildOutputKind::DockerImage => json!({
                "to": {"kind": "DockerImage", "name": image_name.full()}
            }),
        }
    }

    fn build_config_manifest(&self, name: &str, strategy: &Value, output: &Value) -> Value {
        let mut spec = json!({
            "source": {"type": "Binary"},
            "strategy": strategy,
            "output": output
        });
        if let Some(resources) = self.resources_spec() {
            spec["resources"] = resources;
        }
        json!({
            "apiVersion": "build.openshift.io/v1",
            "kind": "BuildConfig",
            "metadata": {
                "name": name,
                "labels": { PROVIDER_LABEL: PROVIDER_NAME }
            },
            "spec": spec
        })
    }

    fn resources_spec(&self) -> Option<Value> {
        let mut requests = serde_json::Map::new();
        if let Some(cpu) = &self.config.cpu_request {
            requests.insert("cpu".to_string(), json!(cpu));
        }
        if let Some(memory) = &self.config.memory_request {
            requests.insert("memory".to_string(), json!(memory));
        }
        let mut limits = serde_json::Map::new();
        if let Some(cpu) = &self.config.cpu_limit {
            limits.insert("cpu".to_string(), json!(cpu));
        }
        if let Some(memory) = &self.config.memory_limit {
            limits.insert("memory".to_string(), json!(memory));
        }
        if requests.is_empty() && limits.is_empty() {
            return None;
        }
        let mut resources = serde_json::Map::new();
        if !requests.is_empty() {
            resources.insert("requests".to_string(), Value::Object(requests));
        }
        if !limits.is_empty() {
            resources.insert("limits".to_string(), Value::Object(limits));
        }
        Some(Value::Object(resources))
    }

    async fn reconcile_image_stream(&self, image_name: &ImageName) -> Result<()> {
        let name = image_name.simple_name();
        if self.config.recreate.image_stream()
            && self
                .cluster
                .get("ImageStream", &self.namespace, name)
                .await?
                .is_some()
        {
            self.cluster.delete("ImageStream", &self.namespace, name).await?;
            tracing::info!("Deleted ImageStream {}/{} for recreation", self.namespace, name);
        }

        match self.cluster.get("ImageStream", &self.namespace, name).await? {
            Some(_) => {
                tracing::info!("Using existing ImageStream {}/{}", self.namespace, name);
            }
            None => {
                let stream = json!({
                    "apiVersion": "image.openshift.io/v1",
                    "kind": "ImageStream",
                    "metadata": {
                        "name": name,
                        "labels": { PROVIDER_LABEL: PROVIDER_NAME }
                    },
                    "spec": {
                        "lookupPolicy": {"local": self.config.local_image_lookup}
                    }
                });
                self.cluster.create(&self.namespace, &stream).await?;
                tracing::info!("Created ImageStream {}/{}", self.namespace, name);
            }
        }
        Ok(())
    }

    /// Archive upload failures with a closed stream are build failures; the
    /// diagnostic hints are logged before the error is rewrapped. Everything
    /// else propagates as-is.
    fn classify_upload_error(
        &self,
        error: anyhow::Error,
        bc_name: &str,
        image: &ImageConfig,
    ) -> anyhow::Error {
        let chain = format!("{:#}", error);
        if !chain.contains("Stream Closed") {
            return error;
        }
        tracing::warn!(
            "Build archive upload stream closed for BuildConfig {}/{} (output kind {:?})",
            self.namespace,
            bc_name,
            self.config.output_kind
        );
        if let Some(from) = &image.from {
            tracing::warn!(
                "Check whether the builder image {} can be pulled from namespace {}",
                from,
                self.namespace
            );
        }
        BuildError::Failed {
            build: bc_name.to_string(),
            phase: "Failed".to_string(),
            reason: "build archive upload stream closed".to_string(),
        }
        .into()
    }

    /// Soft-bounded wait for the build driver pod to come up
    ///
    /// On timeout the overall build continues - the build watch below is
    /// authoritative.
    async fn wait_for_build_pod(&self, build_name: &str) {
        let pod_name = format!("{}-build", build_name);
        let bound = Duration::from_secs(self.config.pod_ready_timeout_seconds);
        let waited = tokio::time::timeout(bound, self.watch_pod_until_ready(&pod_name)).await;
        if waited.is_err() {
            tracing::warn!(
                "Waiting for build pod {}/{} to become ready failed, continuing",
                self.namespace,
                pod_name
            );
        }
    }

    async fn watch_pod_until_ready(&self, pod_name: &str) {
        if let Ok(Some(pod)) = self.cluster.get("Pod", &self.namespace, pod_name).await {
            if resources::pod_is_ready(&pod) {
                return;
            }
        }
        if let Ok(mut stream) = self.cluster.watch("Pod", &self.namespace, pod_name).await {
            while let Some(pod) = stream.next().await {
                if resources::pod_is_ready(&pod) {
                    return;
                }
            }
        }
        // Watch closed before the pod became ready; hold until the caller's
        // bound expires.
        std::future::pending::<()>().await
    }

    /// Block until the build reaches a terminal phase
    ///
    /// Logs are tailed concurrently; both the watch task and the log task are
    /// shut down when this returns, on every path.
    async fn wait_for_build_completion(&self, build_name: &str) -> Result<()> {
        let (latch, receiver) = CompletionLatch::new();

        let watch_stream = self
            .cluster
            .watch("Build", &self.namespace, build_name)
            .await?;
        let watch_latch = latch.clone();
        let watched_name = build_name.to_string();
        let watch_task = tokio::spawn(async move {
            let mut stream = watch_stream;
            let mut last_phase = String::new();
            while let Some(build) = stream.next().await {
                let phase = build_phase(&build).unwrap_or_default();
                if phase != last_phase {
                    tracing::info!("Build {} is {}", watched_name, phase);
                    last_phase = phase.clone();
                }
                if is_terminal_phase(&phase) {
                    watch_latch.fulfil(Some(build));
                    return;
                }
            }
            // Watch channel closed without a terminal event
            watch_latch.fulfil(None);
        });

        let log_task = {
            let cluster = self.cluster.clone();
            let namespace = self.namespace.clone();
            let pod_name = format!("{}-build", build_name);
            tokio::spawn(async move {
                match cluster.pod_logs(&namespace, &pod_name, true).await {
                    Ok(mut lines) => {
                        while let Some(line) = lines.next().await {
                            tracing::info!(target: "kforge::build::log", "{}", line);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(
                            "Could not tail logs of pod {}/{}: {:#}",
                            namespace,
                            pod_name,
                            e
                        );
                    }
                }
            })
        };

        // The build may have reached a terminal phase between instantiation
        // and watch attach; without this check the watch would never fire.
        if let Ok(Some(build)) = self.cluster.get("Build", &self.namespace, build_name).await {
            if is_terminal_phase(&build_phase(&build).unwrap_or_default()) {
                latch.fulfil(Some(build));
            }
        }

        let outcome = receiver.await.unwrap_or(None);
        watch_task.abort();
        log_task.abort();

        let build = match outcome {
            Some(build) => Some(build),
            // Close-without-result: fall back to a direct fetch
            None => self
                .cluster
                .get("Build", &self.namespace, build_name)
                .await
                .ok()
                .flatten(),
        };

        let phase = build.as_ref().map(|b| build_phase(b).unwrap_or_default()).unwrap_or_default();
        match phase.as_str() {
            "Complete" => {
                tracing::info!("Build {}/{} completed", self.namespace, build_name);
                Ok(())
            }
            "Failed" | "Error" | "Cancelled" => {
                let reason = build
                    .as_ref()
                    .and_then(|b| {
                        b.pointer("/status/message")
                            .or_else(|| b.pointer("/status/reason"))
                    })
                    .and_then(|r| r.as_str())
                    .unwrap_or("no reason reported")
                    .to_string();
                self.log_build_diagnostics(build_name).await;
                Err(BuildError::Failed {
                    build: build_name.to_string(),
                    phase,
                    reason,
                }
                .into())
            }
            other => {
                tracing::warn!(
                    "Could not wait for build {}/{} to complete, last observed phase {}",
                    self.namespace,
                    build_name,
                    if other.is_empty() { "<unknown>" } else { other }
                );
                Ok(())
            }
        }
    }

    /// Best-effort context for a failed build; its own failure must not mask
    /// the build error
    async fn log_build_diagnostics(&self, build_name: &str) {
        let stem = build_name
            .rsplit_once('-')
            .map(|(stem, _)| stem)
            .unwrap_or(build_name);
        match self.cluster.list("Build", &self.namespace).await {
            Ok(builds) => {
                for build in builds {
                    let name = resources::name_of(&build).unwrap_or_default();
                    if !name.starts_with(stem) {
                        continue;
                    }
                    tracing::warn!(
                        "Recent build {}/{} phase {}",
                        self.namespace,
                        name,
                        build_phase(&build).unwrap_or_default()
                    );
                }
            }
            Err(e) => tracing::debug!("Could not list recent builds: {:#}", e),
        }
    }

    /// Resolve the built digest and merge the image stream record file
    async fn record_image_stream(&self, image_name: &ImageName) -> Result<()> {
        let simple = image_name.simple_name();
        let resolver = ImageStreamTagResolver::new(self.cluster.clone());
        let digest = resolver
            .resolve_tag_digest(simple, &self.namespace)
            .await
            .context("Resolving built image digest")?;

        let record = json!({
            "apiVersion": "image.openshift.io/v1",
            "kind": "ImageStream",
            "metadata": {
                "name": simple,
                "labels": { PROVIDER_LABEL: PROVIDER_NAME }
            },
            "spec": {
                "tags": [{
                    "name": image_name.tag(),
                    "from": {
                        "kind": "ImageStreamImage",
                        "name": format!("{}@{}", simple, digest)
                    }
                }]
            }
        });

        let dir = self
            .config
            .output_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let stem = self
            .config
            .artifact_id
            .clone()
            .unwrap_or_else(|| simple.to_string());
        let path = dir.join(format!("{}-is.yml", stem));
        manifest::write_merged(&path, &[record])?;
        tracing::info!("Wrote image stream record {}", path.display());
        Ok(())
    }

    /// Create alias tags requested in the configuration, skipping any alias
    /// equal to the primary tag
    async fn apply_additional_tags(&self, image_name: &ImageName) -> Result<()> {
        let simple = image_name.simple_name();
        let primary = image_name.tag();
        for tag in &self.config.additional_tags {
            if tag == primary {
                continue;
            }
            let alias_name = format!("{}:{}", simple, tag);
            let reference = json!({
                "from": {
                    "kind": "ImageStreamTag",
                    "name": format!("{}:{}", simple, primary)
                }
            });
            let existing = self
                .cluster
                .get("ImageStreamTag", &self.namespace, &alias_name)
                .await?;
            if existing.is_some() {
                self.cluster
                    .merge_patch(
                        "ImageStreamTag",
                        &self.namespace,
                        &alias_name,
                        &json!({"tag": reference}),
                    )
                    .await?;
            } else {
                let alias = json!({
                    "apiVersion": "image.openshift.io/v1",
                    "kind": "ImageStreamTag",
                    "metadata": {"name": alias_name},
                    "tag": reference
                });
                self.cluster.create(&self.namespace, &alias).await?;
            }
            tracing::info!("Tagged {}:{} as {}", simple, primary, alias_name);
        }
        Ok(())
    }
}

/// Single-shot completion latch
///
/// Fulfilled exactly once by whichever of the watch event, the attach-time
/// pre-check, or the close-without-result path gets there first.
struct CompletionLatch {
    tx: Mutex<Option<oneshot::Sender<Option<Value>>>>,
}

impl CompletionLatch {
    fn new() -> (Arc<Self>, oneshot::Receiver<Option<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn fulfil(&self, value: Option<Value>) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(value);
        }
    }
}

fn build_phase(build: &Value) -> Option<String> {
    build
        .pointer("/status/phase")
        .and_then(|p| p.as_str())
        .map(|p| p.to_string())
}

fn is_terminal_phase(phase: &str) -> bool {
    TERMINAL_PHASES.contains(&phase)
}
