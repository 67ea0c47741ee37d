//! Image reference parsing
//!
//! Splits a full image reference (`registry/user/repo:tag@digest`) into its
//! parts. The simple name (last path segment, no tag) names the BuildConfig
//! and ImageStream a build produces.

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageName {
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(anyhow::anyhow!("Image name must not be empty"));
        }

        let (rest, digest) = match name.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (name, None),
        };

        // A colon after the last slash is a tag separator; before it, it can
        // only be a registry port.
        let last_slash = rest.rfind('/');
        let tag_colon = match rest.rfind(':') {
            Some(i) if last_slash.is_none_or(|s| i > s) => Some(i),
            _ => None,
        };
        let (path, tag) = match tag_colon {
            Some(i) => (&rest[..i], Some(rest[i + 1..].to_string())),
            None => (rest, None),
        };

        // The first segment is a registry only if it looks like a host.
        let mut segments: Vec<&str> = path.split('/').collect();
        let registry = match segments.first() {
            Some(first)
                if segments.len() > 1
                    && (first.contains('.') || first.contains(':') || *first == "localhost") =>
            {
                Some(segments.remove(0).to_string())
            }
            _ => None,
        };

        let repository = segments.join("/");
        if repository.is_empty() {
            return Err(anyhow::anyhow!("Image name {} has no repository", name));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Last path segment, without tag or digest
    pub fn simple_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Tag, defaulting to `latest`
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// The full reference, normalized
    pub fn full(&self) -> String {
        let mut out = String::new();
        if let Some(registry) = &self.registry {
            out.push_str(registry);
            out.push('/');
        }
        out.push_str(&self.repository);
        out.push(':');
        out.push_str(self.tag());
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}
