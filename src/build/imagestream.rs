//! Image stream tag resolution
//!
//! After a build completes, the digest it pushed shows up in the
//! ImageStream status with some lag. The resolver polls with a fixed delay
//! and picks the most recently created tag event across all tag lists.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::cluster::ClusterOps;
use crate::util::retry;

/// Tag events carry `created` timestamps in this fixed format
const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const RESOLVE_ATTEMPTS: usize = 15;
pub const RESOLVE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum TagResolveError {
    #[error("Could not find ImageStream {namespace}/{name}")]
    StreamMissing { namespace: String, name: String },
    #[error("Could not find a tag in ImageStream {namespace}/{name}")]
    TagMissing { namespace: String, name: String },
}

pub struct ImageStreamTagResolver {
    cluster: Arc<dyn ClusterOps>,
    attempts: usize,
    delay: Duration,
}

impl ImageStreamTagResolver {
    pub fn new(cluster: Arc<dyn ClusterOps>) -> Self {
        Self {
            cluster,
            attempts: RESOLVE_ATTEMPTS,
            delay: RESOLVE_DELAY,
        }
    }

    /// Shorter retry policy for tests
    pub fn with_policy(mut self, attempts: usize, delay: Duration) -> Self {
        self.attempts = attempts;
        self.delay = delay;
        self
    }

    /// Resolve the digest of the latest image pushed to an ImageStream
    ///
    /// Exhaustion distinguishes a stream that never appeared from one that
    /// appeared without a resolvable tag.
    pub async fn resolve_tag_digest(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<String, TagResolveError> {
        let found = &AtomicBool::new(false);
        let digest = retry::with_fixed_delay(self.attempts, self.delay, || async move {
            let stream = match self.cluster.get("ImageStream", namespace, name).await {
                Ok(Some(stream)) => stream,
                Ok(None) => return None,
                Err(e) => {
                    tracing::debug!(
                        "Fetching ImageStream {}/{} failed, retrying: {:#}",
                        namespace,
                        name,
                        e
                    );
                    return None;
                }
            };
            found.store(true, Ordering::SeqCst);
            select_latest_tag_event(&stream)
        })
        .await;

        match digest {
            Some(digest) => Ok(digest),
            None if found.load(Ordering::SeqCst) => Err(TagResolveError::TagMissing {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            None => Err(TagResolveError::StreamMissing {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

/// Pick the digest of the tag event with the most recent `created` timestamp
///
/// An event with an unparsable or missing timestamp loses against any valid
/// one; between two invalid timestamps the first seen wins. Events without an
/// image digest are skipped.
pub fn select_latest_tag_event(stream: &Value) -> Option<String> {
    let tags = stream.pointer("/status/tags")?.as_array()?;

    let mut best: Option<(Option<NaiveDateTime>, String)> = None;
    for tag in tags {
        let Some(items) = tag.get("items").and_then(|i| i.as_array()) else {
            continue;
        };
        for item in items {
            let Some(digest) = item.get("image").and_then(|i| i.as_str()) else {
                continue;
            };
            let created = item
                .get("created")
                .and_then(|c| c.as_str())
                .and_then(|c| NaiveDateTime::parse_from_str(c, CREATED_FORMAT).ok());
            let wins = match &best {
                None => true,
                Some((best_created, _)) => match (&created, best_created) {
                    (Some(candidate), Some(best)) => candidate > best,
                    (Some(_), None) => true,
                    (None, _) => false,
                },
            };
            if wins {
                best = Some((created, digest.to_string()));
            }
        }
    }

    best.map(|(_, digest)| digest)
}
