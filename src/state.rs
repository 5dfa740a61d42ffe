use crate::credentials::CredentialStore;
use crate::labels::{LabelCache, LabelResolver};
use crate::oci::{ManifestFetcher, OciConnector, RegistryClientPool, RegistryConnector};
use crate::settings::{Settings, WebhookSettings};
use anyhow::{Context, Result};
use std::sync::Arc;

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<LabelResolver>,
    pub webhook_settings: Arc<WebhookSettings>,
}

impl AppState {
    /// Load the credentials document and build the engine against real registries
    pub fn new_for_server(settings: &Settings) -> Result<Self> {
        let credentials = CredentialStore::load(&settings.credentials.path).with_context(|| {
            format!(
                "Failed to load registry credentials from {}",
                settings.credentials.path
            )
        })?;

        let connector = Arc::new(OciConnector::new(settings.registry.client_options()));
        Ok(Self::with_connector(settings, credentials, connector))
    }

    /// Build the engine around an arbitrary registry connector
    pub fn with_connector(
        settings: &Settings,
        credentials: CredentialStore,
        connector: Arc<dyn RegistryConnector>,
    ) -> Self {
        let pool = RegistryClientPool::new(
            Arc::new(credentials),
            settings.registry.anonymous_registries.clone(),
            connector,
        );
        let cache = LabelCache::new(settings.cache.ttl(), settings.cache.max_capacity);
        let fetcher = ManifestFetcher::new(settings.registry.max_config_size_bytes);

        let resolver = LabelResolver::new(
            Arc::new(pool),
            cache,
            fetcher,
            settings.registry.resolver_options(),
        );

        Self {
            resolver: Arc::new(resolver),
            webhook_settings: Arc::new(settings.webhook.clone()),
        }
    }
}
