//! Registry credentials
//!
//! Resolves pull credentials for a registry host: explicitly configured
//! settings win, otherwise the local docker config (`$DOCKER_CONFIG` or
//! `~/.docker/config.json`) is consulted. A registry without credentials is
//! `None`, not an error - unauthenticated registries are common.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use url::Url;

/// Credentials for one registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

/// Configured credentials keyed by registry host
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryAuthConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
}

pub struct RegistryAuthResolver {
    configured: RegistryAuthConfig,
    docker_config_path: Option<PathBuf>,
}

impl RegistryAuthResolver {
    pub fn new(configured: RegistryAuthConfig) -> Self {
        Self {
            configured,
            docker_config_path: default_docker_config_path(),
        }
    }

    /// Override the docker config location (tests, non-standard setups)
    pub fn with_docker_config(mut self, path: PathBuf) -> Self {
        self.docker_config_path = Some(path);
        self
    }

    /// Resolve credentials for a registry host
    pub fn resolve(&self, registry: &str) -> Result<Option<RegistryAuth>> {
        if let (Some(username), Some(password)) = (
            self.configured.username.as_ref(),
            self.configured.password.as_ref(),
        ) {
            let scope_matches = match self.configured.registry.as_deref() {
                Some(configured_registry) => host_of(configured_registry) == host_of(registry),
                None => true,
            };
            if scope_matches {
                return Ok(Some(RegistryAuth {
                    username: username.clone(),
                    password: password.clone(),
                }));
            }
        }

        let Some(path) = &self.docker_config_path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read docker config {}", path.display()))?;
        let config: DockerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid docker config {}", path.display()))?;

        let wanted = host_of(registry);
        for (key, entry) in &config.auths {
            if host_of(key) != wanted {
                continue;
            }
            if let Some(auth) = entry.credentials()? {
                return Ok(Some(auth));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl DockerAuthEntry {
    fn credentials(&self) -> Result<Option<RegistryAuth>> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Some(RegistryAuth {
                username: username.clone(),
                password: password.clone(),
            }));
        }
        if let Some(auth) = &self.auth {
            let decoded = BASE64
                .decode(auth)
                .context("Invalid base64 in docker config auth entry")?;
            let decoded = String::from_utf8(decoded).context("Docker config auth is not UTF-8")?;
            if let Some((username, password)) = decoded.split_once(':') {
                return Ok(Some(RegistryAuth {
                    username: username.to_string(),
                    password: password.to_string(),
                }));
            }
        }
        Ok(None)
    }
}

/// Normalize a registry reference to its bare host
///
/// Docker config keys vary: `quay.io`, `https://index.docker.io/v1/`, a host
/// with a port. Compare on the host (plus port when present).
fn host_of(registry: &str) -> String {
    if registry.contains("://") {
        if let Ok(url) = Url::parse(registry) {
            if let Some(host) = url.host_str() {
                return match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
            }
        }
    }
    registry
        .trim_end_matches('/')
        .split('/')
        .next()
        .unwrap_or(registry)
        .to_string()
}

fn default_docker_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".docker").join("config.json"))
}
