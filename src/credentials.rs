//! Registry credentials loaded once at startup from a docker config document.
//!
//! The document has the shape written by `kubectl create secret docker-registry`:
//!
//! ```json
//! {"auths": {"registry.example.com": {"auth": "dXNlcjpwYXNz"}}}
//! ```
//!
//! A malformed document is fatal; a malformed entry is reported and skipped.

use crate::oci::reference::normalize_registry_host;
use base64::Engine;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

/// Username and password for a registry host
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Empty credentials mean anonymous pulls against a trusted host
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single `auths` entry that could not be turned into a credential
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credential for {host}: auth field is not valid base64: {reason}")]
    InvalidBase64 { host: String, reason: String },

    #[error("credential for {host}: auth field is not valid UTF-8")]
    InvalidUtf8 { host: String },

    #[error("credential for {host}: expected exactly one ':' in decoded auth, found {colons}")]
    InvalidFormat { host: String, colons: usize },

    #[error("credential for {host}: entry has neither auth nor username/password")]
    Missing { host: String },
}

/// Failure to read or parse the credentials document as a whole
#[derive(Debug, Error)]
pub enum CredentialDocumentError {
    #[error("failed to read credentials document {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed credentials document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Read-only host → credential lookup
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    credentials: HashMap<String, Credential>,
    warnings: Vec<CredentialError>,
}

impl CredentialStore {
    /// Build a store from already-resolved credentials, keyed by any host form
    pub fn from_credentials<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = (S, Credential)>,
        S: AsRef<str>,
    {
        Self {
            credentials: credentials
                .into_iter()
                .map(|(host, credential)| (normalize_registry_host(host.as_ref()), credential))
                .collect(),
            warnings: Vec::new(),
        }
    }

    /// Load the credentials document at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialDocumentError> {
        let path = path.as_ref();
        let document = std::fs::read(path).map_err(|source| CredentialDocumentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::from_json(&document)?;

        tracing::info!(
            path = %path.display(),
            hosts = store.credentials.len(),
            skipped = store.warnings.len(),
            "Loaded registry credentials"
        );
        Ok(store)
    }

    /// Parse a credentials document, collecting every malformed entry as a warning
    pub fn from_json(document: &[u8]) -> Result<Self, CredentialDocumentError> {
        let config: DockerConfig = serde_json::from_slice(document)?;

        let mut store = Self::default();
        for (host, entry) in config.auths {
            match decode_entry(&host, &entry) {
                Ok(credential) => {
                    store
                        .credentials
                        .insert(normalize_registry_host(&host), credential);
                }
                Err(warning) => {
                    tracing::warn!("Skipping registry credential: {}", warning);
                    store.warnings.push(warning);
                }
            }
        }
        Ok(store)
    }

    pub fn lookup(&self, host: &str) -> Option<&Credential> {
        self.credentials.get(&normalize_registry_host(host))
    }

    /// Malformed entries encountered while loading
    pub fn warnings(&self) -> &[CredentialError] {
        &self.warnings
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.credentials.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

fn decode_entry(host: &str, entry: &AuthEntry) -> Result<Credential, CredentialError> {
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth.trim())
            .map_err(|e| CredentialError::InvalidBase64 {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let decoded = String::from_utf8(decoded).map_err(|_| CredentialError::InvalidUtf8 {
            host: host.to_string(),
        })?;

        let colons = decoded.matches(':').count();
        return match decoded.split_once(':') {
            Some((username, password)) if colons == 1 => Ok(Credential::new(username, password)),
            _ => Err(CredentialError::InvalidFormat {
                host: host.to_string(),
                colons,
            }),
        };
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Credential::new(username, password)),
        _ => Err(CredentialError::Missing {
            host: host.to_string(),
        }),
    }
}
