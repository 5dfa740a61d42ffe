use super::error::ReferenceParseError;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Canonical name of the public registry used when a reference names no host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

const DEFAULT_TAG: &str = "latest";

/// Hostnames that all address Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &[
    "docker.io",
    "index.docker.io",
    "registry-1.docker.io",
    "registry.hub.docker.com",
];

lazy_static! {
    static ref PATH_COMPONENT: Regex =
        Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*$").unwrap();
    static ref TAG: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap();
    static ref DIGEST: Regex =
        Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[A-Za-z0-9=_-]{32,}$").unwrap();
    static ref HOST: Regex =
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]{1,5})?$").unwrap();
}

/// Tag or digest part of an image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagOrDigest {
    Tag(String),
    Digest(String),
}

impl TagOrDigest {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(tag) => tag,
            Self::Digest(digest) => digest,
        }
    }
}

/// Parsed container image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub host: String,
    pub repository: String,
    pub reference: TagOrDigest,
}

impl ImageReference {
    /// Parse a raw image string, defaulting the host to Docker Hub.
    ///
    /// Accepted forms are `[host/]repository[:tag]` and `[host/]repository@digest`.
    /// When both a tag and a digest are present the digest wins.
    pub fn parse(raw: &str) -> Result<Self, ReferenceParseError> {
        Self::parse_with_default_host(raw, DEFAULT_REGISTRY)
    }

    /// Parse a raw image string, using `default_host` when none is given.
    pub fn parse_with_default_host(
        raw: &str,
        default_host: &str,
    ) -> Result<Self, ReferenceParseError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(ReferenceParseError::Empty);
        }

        if let Some(c) = input.chars().find(|c| {
            !(c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '-' | '_' | '@' | '='))
        }) {
            return Err(ReferenceParseError::InvalidCharacter(input.to_string(), c));
        }

        let invalid = || ReferenceParseError::InvalidFormat(input.to_string());

        let (name_and_tag, digest) = match input.split_once('@') {
            Some((_, after)) if after.contains('@') => return Err(invalid()),
            Some((before, after)) => {
                if !DIGEST.is_match(after) {
                    return Err(invalid());
                }
                (before, Some(after))
            }
            None => (input, None),
        };

        // A colon after the last slash separates the tag; one before it is a port.
        let last_slash = name_and_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                let tag = &name_and_tag[split + 1..];
                if !TAG.is_match(tag) {
                    return Err(invalid());
                }
                (&name_and_tag[..split], Some(tag))
            }
            None => (name_and_tag, None),
        };

        let (host, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                if !HOST.is_match(first) {
                    return Err(invalid());
                }
                (normalize_registry_host(first), rest)
            }
            _ => (normalize_registry_host(default_host), name),
        };

        if repository.is_empty() || !repository.split('/').all(|c| PATH_COMPONENT.is_match(c)) {
            return Err(invalid());
        }

        let reference = match (tag, digest) {
            (_, Some(digest)) => TagOrDigest::Digest(digest.to_string()),
            (Some(tag), None) => TagOrDigest::Tag(tag.to_string()),
            (None, None) => TagOrDigest::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            host,
            repository: repository.to_string(),
            reference,
        })
    }

    /// Prefix a single-component repository with `namespace`.
    ///
    /// `nginx` becomes `library/nginx`; repositories that already carry a
    /// namespace are returned unchanged.
    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        if !namespace.is_empty() && !self.repository.contains('/') {
            self.repository = format!("{}/{}", namespace, self.repository);
        }
        self
    }

    pub fn is_digest(&self) -> bool {
        matches!(self.reference, TagOrDigest::Digest(_))
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.repository)?;
        match &self.reference {
            TagOrDigest::Tag(tag) => write!(f, ":{}", tag),
            TagOrDigest::Digest(digest) => write!(f, "@{}", digest),
        }
    }
}

/// Reduce a registry address to the host key used for credentials and clients.
///
/// Strips a URL scheme and any path, lowercases, and folds the Docker Hub
/// aliases onto [`DEFAULT_REGISTRY`].
///
/// - `"https://index.docker.io/v1/"` → `"docker.io"`
/// - `"Registry.Example.com:5000"` → `"registry.example.com:5000"`
pub fn normalize_registry_host(address: &str) -> String {
    let without_scheme = match address.find("://") {
        Some(pos) => &address[pos + 3..],
        None => address,
    };
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DEFAULT_REGISTRY.to_string()
    } else {
        host
    }
}
