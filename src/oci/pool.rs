use super::client::{ClientOptions, OciRegistryClient, RegistryClient};
use super::error::RegistryError;
use super::reference::normalize_registry_host;
use crate::credentials::{Credential, CredentialStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// Builds a registry session for a host
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        credential: Option<&Credential>,
    ) -> Result<Arc<dyn RegistryClient>, RegistryError>;
}

/// Connector producing [`OciRegistryClient`] sessions
pub struct OciConnector {
    options: ClientOptions,
}

impl OciConnector {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RegistryConnector for OciConnector {
    async fn connect(
        &self,
        host: &str,
        credential: Option<&Credential>,
    ) -> Result<Arc<dyn RegistryClient>, RegistryError> {
        Ok(Arc::new(OciRegistryClient::new(
            host,
            credential,
            &self.options,
        )))
    }
}

type ClientSlot = Arc<OnceCell<Arc<dyn RegistryClient>>>;

/// Lazily built, process-lifetime registry sessions, one per host.
///
/// Only hosts with a credential entry, or listed as anonymous registries, are
/// considered known. Everything else resolves to `None` so callers can tell
/// "no trust relationship" apart from a failing registry.
pub struct RegistryClientPool {
    credentials: Arc<CredentialStore>,
    anonymous_hosts: HashSet<String>,
    connector: Arc<dyn RegistryConnector>,
    clients: RwLock<HashMap<String, ClientSlot>>,
}

impl RegistryClientPool {
    pub fn new(
        credentials: Arc<CredentialStore>,
        anonymous_hosts: impl IntoIterator<Item = String>,
        connector: Arc<dyn RegistryConnector>,
    ) -> Self {
        Self {
            credentials,
            anonymous_hosts: anonymous_hosts
                .into_iter()
                .map(|host| normalize_registry_host(&host))
                .collect(),
            connector,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Whether lookups against `host` are allowed at all
    pub fn is_known(&self, host: &str) -> bool {
        let host = normalize_registry_host(host);
        self.credentials.lookup(&host).is_some() || self.anonymous_hosts.contains(&host)
    }

    /// Get the session for `host`, building it on first use.
    ///
    /// Concurrent first requests for the same host share one construction.
    /// The map lock is only held to find or insert the slot, never while a
    /// session is being built.
    pub async fn get(&self, host: &str) -> Result<Option<Arc<dyn RegistryClient>>, RegistryError> {
        let host = normalize_registry_host(host);
        if !self.is_known(&host) {
            return Ok(None);
        }

        let slot = self.slot(&host).await;
        let client = slot
            .get_or_try_init(|| async {
                let credential = self.credentials.lookup(&host);
                tracing::info!(
                    host = %host,
                    anonymous = credential.map_or(true, Credential::is_anonymous),
                    "Creating registry client"
                );
                self.connector.connect(&host, credential).await
            })
            .await?;

        Ok(Some(client.clone()))
    }

    async fn slot(&self, host: &str) -> ClientSlot {
        if let Some(slot) = self.clients.read().await.get(host) {
            return slot.clone();
        }

        self.clients
            .write()
            .await
            .entry(host.to_string())
            .or_default()
            .clone()
    }

    /// Number of sessions constructed so far
    pub async fn len(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
