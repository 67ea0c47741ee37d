//! In-memory cluster for tests
//!
//! Implements [`ClusterOps`] over a map of objects and records every call in
//! order, so tests can assert not just final state but the exact traffic a
//! service produced (e.g. a skip must issue a GET and nothing else).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{Value, json};

use super::ops::ClusterOps;
use crate::resources;
use crate::util::apply_merge_patch;

type Key = (String, String, String);

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<Key, Value>>,
    calls: Mutex<Vec<String>>,
    groups: Vec<String>,
    watch_events: Mutex<BTreeMap<Key, Vec<Value>>>,
    log_lines: Mutex<BTreeMap<(String, String), Vec<String>>>,
    instantiate_phase: Mutex<String>,
    uid_counter: AtomicU64,
}

impl FakeCluster {
    /// A vanilla Kubernetes cluster
    pub fn new() -> Self {
        Self {
            groups: vec![
                "apps".to_string(),
                "batch".to_string(),
                "networking.k8s.io".to_string(),
            ],
            instantiate_phase: Mutex::new("New".to_string()),
            ..Self::default()
        }
    }

    /// A cluster that serves the OpenShift API groups
    pub fn openshift() -> Self {
        let mut cluster = Self::new();
        for group in [
            "build.openshift.io",
            "image.openshift.io",
            "apps.openshift.io",
            "project.openshift.io",
            "route.openshift.io",
        ] {
            cluster.groups.push(group.to_string());
        }
        cluster
    }

    /// Seed an object; a uid is assigned if the manifest has none
    pub fn insert(&self, namespace: &str, resource: Value) {
        let mut resource = resource;
        if resources::uid_of(&resource).is_none() {
            self.assign_uid(&mut resource);
        }
        let kind = resources::kind_of(&resource).expect("seeded object needs a kind").to_string();
        let name = resources::name_of(&resource).expect("seeded object needs a name").to_string();
        self.objects
            .lock()
            .unwrap()
            .insert((kind, namespace.to_string(), name), resource);
    }

    /// Queue events a subsequent watch of (kind, namespace, name) will yield;
    /// the stream ends after the queued events are drained
    pub fn queue_watch_events(&self, kind: &str, namespace: &str, name: &str, events: Vec<Value>) {
        self.watch_events.lock().unwrap().insert(
            (kind.to_string(), namespace.to_string(), name.to_string()),
            events,
        );
    }

    /// Canned log lines for a pod
    pub fn set_log_lines(&self, namespace: &str, pod: &str, lines: Vec<String>) {
        self.log_lines
            .lock()
            .unwrap()
            .insert((namespace.to_string(), pod.to_string()), lines);
    }

    /// Phase the Build created by `instantiate_binary_build` starts in
    pub fn set_instantiate_phase(&self, phase: &str) {
        *self.instantiate_phase.lock().unwrap() = phase.to_string();
    }

    /// All recorded calls, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls starting with the given verb (GET, POST, ...)
    pub fn calls_with_verb(&self, verb: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(verb))
            .collect()
    }

    /// Fetch a stored object directly, bypassing call recording
    pub fn stored(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn assign_uid(&self, resource: &mut Value) {
        let uid = format!("uid-{}", self.uid_counter.fetch_add(1, Ordering::SeqCst));
        resource["metadata"]["uid"] = json!(uid);
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<Option<Value>> {
        self.record(format!("GET {} {}/{}", kind, namespace, name));
        Ok(self.stored(kind, namespace, name))
    }

    async fn create(&self, namespace: &str, resource: &Value) -> Result<Value> {
        let kind = resources::kind_of(resource)
            .ok_or_else(|| anyhow::anyhow!("Resource has no kind"))?
            .to_string();
        let name = resources::name_of(resource)
            .ok_or_else(|| anyhow::anyhow!("Resource has no name"))?
            .to_string();
        self.record(format!("POST {} {}/{}", kind, namespace, name));
        let mut created = resource.clone();
        self.assign_uid(&mut created);
        let key = (kind.clone(), namespace.to_string(), name.clone());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(anyhow::anyhow!("{} {}/{} already exists", kind, namespace, name));
        }
        objects.insert(key, created.clone());
        Ok(created)
    }

    async fn merge_patch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Value> {
        self.record(format!("PATCH {} {}/{}", kind, namespace, name));
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock().unwrap();
        let existing = objects
            .get_mut(&key)
            .ok_or_else(|| anyhow::anyhow!("{} {}/{} not found", kind, namespace, name))?;
        apply_merge_patch(existing, patch);
        Ok(existing.clone())
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("DELETE {} {}/{}", kind, namespace, name));
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        self.objects
            .lock()
            .unwrap()
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("{} {}/{} not found", kind, namespace, name))
    }

    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<Value>> {
        self.record(format!("LIST {} {}", kind, namespace));
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, ns, _), _)| k == kind && ns == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn watch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<BoxStream<'static, Value>> {
        self.record(format!("WATCH {} {}/{}", kind, namespace, name));
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        let events = self
            .watch_events
            .lock()
            .unwrap()
            .remove(&key)
            .unwrap_or_default();
        Ok(futures::stream::iter(events).boxed())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        _follow: bool,
    ) -> Result<BoxStream<'static, String>> {
        self.record(format!("LOGS Pod {}/{}", namespace, pod));
        let lines = self
            .log_lines
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(futures::stream::iter(lines).boxed())
    }

    async fn api_groups(&self) -> Result<Vec<String>> {
        Ok(self.groups.clone())
    }

    async fn instantiate_binary_build(
        &self,
        namespace: &str,
        build_config: &str,
        _archive: &Path,
    ) -> Result<Value> {
        self.record(format!("INSTANTIATE BuildConfig {}/{}", namespace, build_config));
        let build_name = format!("{}-1", build_config);
        let phase = self.instantiate_phase.lock().unwrap().clone();
        let build = json!({
            "apiVersion": "build.openshift.io/v1",
            "kind": "Build",
            "metadata": {"name": build_name, "namespace": namespace},
            "status": {"phase": phase}
        });
        self.insert(namespace, build.clone());
        Ok(self.stored("Build", namespace, &build_name).unwrap_or(build))
    }
}
