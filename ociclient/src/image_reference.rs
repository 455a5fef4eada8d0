use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Registry host assumed when a reference names none
pub const DOCKER_HUB: &str = "docker.io";

const DEFAULT_TAG: &str = "latest";
const OFFICIAL_NAMESPACE: &str = "library";

/// Error type for image reference parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageReferenceError {
    #[error("Invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// Represents a normalized image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, when the reference names one other than Docker Hub
    pub hostname: Option<String>,
    /// Repository path, e.g. `library/alpine`
    pub name: String,
    /// Tag or digest
    pub reference: String,
}

impl ImageReference {
    /// Whether the reference pins a digest rather than a tag
    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }

    /// Base URL of the registry named in the reference, if any.
    ///
    /// Loopback registries are reached over plain http, everything else over https.
    pub fn registry_url(&self) -> Option<String> {
        self.hostname
            .as_ref()
            .map(|host| format!("{}://{}", scheme_for(host), host))
    }

    /// Last path segment of the repository, used as default output directory
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

fn scheme_for(host: &str) -> &'static str {
    let name = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    if LOOPBACK_HOSTS.contains(&name) {
        "http"
    } else {
        "https"
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ImageReferenceError::InvalidFormat(s.to_string());

        // Parse image reference in the format: [hostname/]name[:tag|@digest]
        let (hostname, remainder) = match s.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (Some(first.to_string()), rest),
            _ => (None, s),
        };

        let (name, reference) = if let Some((name, digest)) = remainder.split_once('@') {
            (name, digest)
        } else {
            // A ':' before the last '/' would belong to a host, never a tag
            let tag_start = remainder.rfind('/').map(|idx| idx + 1).unwrap_or(0);
            match remainder[tag_start..].rfind(':') {
                Some(idx) => {
                    let split = tag_start + idx;
                    (&remainder[..split], &remainder[split + 1..])
                }
                None => (remainder, DEFAULT_TAG),
            }
        };

        if name.is_empty() || reference.is_empty() || name.starts_with('/') || name.ends_with('/') {
            return Err(invalid());
        }

        let hostname = hostname.filter(|host| host != DOCKER_HUB);
        let name = if hostname.is_none() && !name.contains('/') {
            format!("{}/{}", OFFICIAL_NAMESPACE, name)
        } else {
            name.to_string()
        };

        Ok(ImageReference {
            hostname,
            name,
            reference: reference.to_string(),
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(hostname) = &self.hostname {
            write!(f, "{}/", hostname)?;
        }
        let separator = if self.is_digest() { '@' } else { ':' };
        write!(f, "{}{}{}", self.name, separator, self.reference)
    }
}
