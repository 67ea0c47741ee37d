//! Generated manifest files
//!
//! Reads the YAML files produced by manifest generation (kubernetes.yml,
//! openshift.yml, the per-build image stream record) and writes collections
//! back, merging with pre-existing content by (kind, name) so repeated build
//! invocations accumulate rather than clobber.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::resources::{self, flatten};

/// Load a manifest file into its YAML documents
///
/// Handles single objects, plain lists, typed List wrappers and multi-doc
/// streams; empty documents are dropped. Flattening is left to the caller.
pub fn load(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&content) {
        let yaml = serde_yaml::Value::deserialize(doc)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?;
        if yaml.is_null() {
            continue;
        }
        docs.push(serde_json::to_value(yaml)?);
    }
    Ok(docs)
}

/// Load a manifest file and flatten it into concrete resources
pub fn load_resources(path: &Path) -> Result<Vec<Value>> {
    let docs = load(path)?;
    let refs: Vec<&Value> = docs.iter().collect();
    Ok(flatten::flatten_values(&refs))
}

/// Write resources to a manifest file, merging with existing content
///
/// Existing entries keep their position; an incoming resource with the same
/// (kind, name) replaces the stored one (last write wins), new names are
/// appended. The file is written as a `kind: List` wrapper.
pub fn write_merged(path: &Path, incoming: &[Value]) -> Result<()> {
    let mut merged = if path.exists() {
        load_resources(path)?
    } else {
        Vec::new()
    };

    for resource in incoming {
        let key = (
            resources::kind_of(resource).unwrap_or_default().to_string(),
            resources::name_of(resource).unwrap_or_default().to_string(),
        );
        let position = merged.iter().position(|existing| {
            resources::kind_of(existing).unwrap_or_default() == key.0
                && resources::name_of(existing).unwrap_or_default() == key.1
        });
        match position {
            Some(i) => merged[i] = resource.clone(),
            None => merged.push(resource.clone()),
        }
    }

    let list = json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": merged
    });
    let yaml = serde_yaml::to_string(&list)
        .with_context(|| format!("Failed to serialize manifest {}", path.display()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write manifest {}", path.display()))?;
    Ok(())
}
