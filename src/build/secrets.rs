//! Pull secret synthesis
//!
//! Builds pulling from an authenticated registry need a
//! `kubernetes.io/dockerconfigjson` secret in the build namespace. An
//! existing secret is merged (other registries' entries are kept), a missing
//! one is synthesized from resolved credentials, and no secret is touched
//! when no credentials apply.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::cluster::ClusterOps;
use crate::registry::RegistryAuth;
use crate::resources::PROVIDER_LABEL;

const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Ensure a pull secret for `registry` exists and carries `auth`
///
/// Returns whether a secret was created or updated.
pub async fn ensure_pull_secret(
    cluster: &Arc<dyn ClusterOps>,
    namespace: &str,
    secret_name: &str,
    registry: &str,
    auth: &RegistryAuth,
    provider: &str,
) -> Result<bool> {
    let existing = cluster.get("Secret", namespace, secret_name).await?;

    match existing {
        Some(secret) => {
            let mut config = decode_docker_config(&secret)?;
            config["auths"][registry] = auth_entry(auth);
            let patch = json!({
                "data": { DOCKER_CONFIG_KEY: encode_docker_config(&config)? }
            });
            cluster
                .merge_patch("Secret", namespace, secret_name, &patch)
                .await
                .with_context(|| {
                    format!("Failed to update pull secret {}/{}", namespace, secret_name)
                })?;
            tracing::info!(
                "Updated pull secret {}/{} with credentials for {}",
                namespace,
                secret_name,
                registry
            );
            Ok(true)
        }
        None => {
            let config = json!({"auths": { registry: auth_entry(auth) }});
            let secret = json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {
                    "name": secret_name,
                    "labels": { PROVIDER_LABEL: provider }
                },
                "type": DOCKER_CONFIG_SECRET_TYPE,
                "data": { DOCKER_CONFIG_KEY: encode_docker_config(&config)? }
            });
            cluster.create(namespace, &secret).await.with_context(|| {
                format!("Failed to create pull secret {}/{}", namespace, secret_name)
            })?;
            tracing::info!(
                "Created pull secret {}/{} for {}",
                namespace,
                secret_name,
                registry
            );
            Ok(true)
        }
    }
}

fn auth_entry(auth: &RegistryAuth) -> Value {
    json!({
        "username": auth.username,
        "password": auth.password,
        "auth": BASE64.encode(format!("{}:{}", auth.username, auth.password))
    })
}

/// Decode the `.dockerconfigjson` payload of a secret, empty when absent
fn decode_docker_config(secret: &Value) -> Result<Value> {
    let encoded = secret
        .get("data")
        .and_then(|d| d.get(DOCKER_CONFIG_KEY))
        .and_then(|v| v.as_str());
    let Some(encoded) = encoded else {
        return Ok(json!({"auths": {}}));
    };
    let bytes = BASE64
        .decode(encoded)
        .context("Pull secret .dockerconfigjson is not valid base64")?;
    let mut config: Value =
        serde_json::from_slice(&bytes).context("Pull secret .dockerconfigjson is not JSON")?;
    if config.get("auths").is_none() {
        config["auths"] = json!({});
    }
    Ok(config)
}

fn encode_docker_config(config: &Value) -> Result<String> {
    Ok(BASE64.encode(serde_json::to_vec(config)?))
}
