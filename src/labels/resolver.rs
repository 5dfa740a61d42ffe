use super::{filter_labels, LabelCache, LabelSet};
use crate::oci::reference::{normalize_registry_host, DEFAULT_REGISTRY};
use crate::oci::{
    ImageReference, ManifestFetcher, ReferenceParseError, RegistryClient, RegistryClientPool,
    ResolveError,
};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for [`LabelResolver`]
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Registry assumed when a reference names no host
    pub default_registry: String,
    /// Namespace inserted before single-component repositories on the default registry
    pub default_namespace: Option<String>,
    /// Extra attempts after a transient registry failure
    pub retry_attempts: u32,
    /// Delay before the first retry, doubled on each further attempt
    pub retry_backoff: Duration,
    /// Answer with no labels instead of failing when a known registry errors
    pub fallback_to_empty: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            default_registry: DEFAULT_REGISTRY.to_string(),
            default_namespace: Some("library".to_string()),
            retry_attempts: 0,
            retry_backoff: Duration::from_millis(200),
            fallback_to_empty: false,
        }
    }
}

/// Get the delay before retry number `attempt` (exponential, capped at 16x the base)
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    base * 2_u32.pow(attempt.min(4))
}

/// Turns raw image strings into validated label sets.
///
/// Owns the shared client pool and label cache; one instance serves every
/// request for the lifetime of the process.
pub struct LabelResolver {
    pool: Arc<RegistryClientPool>,
    cache: LabelCache,
    fetcher: ManifestFetcher,
    options: ResolverOptions,
}

impl LabelResolver {
    pub fn new(
        pool: Arc<RegistryClientPool>,
        cache: LabelCache,
        fetcher: ManifestFetcher,
        mut options: ResolverOptions,
    ) -> Self {
        // Parsed hosts are always normalized, so the default must be too
        options.default_registry = normalize_registry_host(&options.default_registry);
        Self {
            pool,
            cache,
            fetcher,
            options,
        }
    }

    /// Parse `raw` and apply the default host and namespace rules
    pub fn parse(&self, raw: &str) -> Result<ImageReference, ReferenceParseError> {
        let image = ImageReference::parse_with_default_host(raw, &self.options.default_registry)?;

        match self.options.default_namespace.as_deref() {
            Some(namespace) if image.host == self.options.default_registry => {
                Ok(image.with_default_namespace(namespace))
            }
            _ => Ok(image),
        }
    }

    /// Resolve the filtered labels of the image named by `raw`
    pub async fn resolve(&self, raw: &str) -> Result<LabelSet, ResolveError> {
        let image = self.parse(raw)?;
        let key = image.to_string();

        match self.cache.resolve(&key, self.fetch(&image)).await {
            Ok(labels) => Ok(filter_labels(labels)),
            Err(e) if self.options.fallback_to_empty => {
                tracing::warn!(image = %key, "Failed to resolve labels, answering with none: {}", e);
                Ok(LabelSet::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, image: &ImageReference) -> Result<LabelSet, ResolveError> {
        let Some(client) = self.pool.get(&image.host).await? else {
            tracing::debug!(
                image = %image,
                host = %image.host,
                "No credentials for registry, skipping lookup"
            );
            return Ok(LabelSet::new());
        };

        self.fetch_with_retry(client.as_ref(), image).await
    }

    async fn fetch_with_retry(
        &self,
        client: &dyn RegistryClient,
        image: &ImageReference,
    ) -> Result<LabelSet, ResolveError> {
        let mut attempt = 0;
        loop {
            match self.fetcher.fetch_labels(client, image).await {
                Ok(labels) => {
                    tracing::debug!(image = %image, count = labels.len(), "Fetched image labels");
                    return Ok(labels);
                }
                Err(ResolveError::Registry(e))
                    if e.is_transient() && attempt < self.options.retry_attempts =>
                {
                    let delay = retry_delay(attempt, self.options.retry_backoff);
                    attempt += 1;
                    tracing::warn!(
                        image = %image,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient registry failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
