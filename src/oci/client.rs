use super::error::{classify_distribution_error, RegistryError, ResolveError};
use super::reference::{ImageReference, TagOrDigest};
use crate::credentials::Credential;
use crate::labels::LabelSet;
use async_trait::async_trait;
use oci_distribution::client::{linux_amd64_resolver, ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::{secrets::RegistryAuth, Client, Reference};
use serde::Deserialize;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Content descriptor of a blob referenced by a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub digest: String,
    pub size: u64,
    pub media_type: String,
}

/// The parts of an image manifest needed to locate its config blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    /// Content digest of the manifest itself
    pub digest: String,
    pub config: BlobDescriptor,
}

/// Authenticated session with a single registry host.
///
/// Implementations are immutable once built and shared by every lookup
/// against their host.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Registry host this session talks to
    fn host(&self) -> &str;

    /// Retrieve the image manifest for `repository` at `reference`
    async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &TagOrDigest,
    ) -> Result<ManifestDescriptor, RegistryError>;

    /// Download a blob, giving up once more than `max_size` bytes arrive
    async fn download_blob(
        &self,
        repository: &str,
        blob: &BlobDescriptor,
        max_size: u64,
    ) -> Result<Vec<u8>, ResolveError>;
}

/// Options shared by every registry session the service creates
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Hosts reached over plain HTTP instead of HTTPS
    pub insecure_registries: Vec<String>,
    /// Upper bound for a single registry call
    pub timeout: Duration,
}

/// [`RegistryClient`] backed by the OCI distribution API
pub struct OciRegistryClient {
    host: String,
    client: Client,
    auth: RegistryAuth,
    timeout: Duration,
}

impl OciRegistryClient {
    pub fn new(host: &str, credential: Option<&Credential>, options: &ClientOptions) -> Self {
        let protocol = if options.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(options.insecure_registries.clone())
        };

        let client = Client::new(ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_amd64_resolver)),
            ..Default::default()
        });

        let auth = match credential {
            Some(credential) if !credential.is_anonymous() => {
                RegistryAuth::Basic(credential.username.clone(), credential.password.clone())
            }
            _ => RegistryAuth::Anonymous,
        };

        Self {
            host: host.to_string(),
            client,
            auth,
            timeout: options.timeout,
        }
    }

    fn reference(&self, repository: &str, reference: &TagOrDigest) -> Reference {
        match reference {
            TagOrDigest::Tag(tag) => {
                Reference::with_tag(self.host.clone(), repository.to_string(), tag.clone())
            }
            TagOrDigest::Digest(digest) => {
                Reference::with_digest(self.host.clone(), repository.to_string(), digest.clone())
            }
        }
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &TagOrDigest,
    ) -> Result<ManifestDescriptor, RegistryError> {
        let image = self.reference(repository, reference);

        let (manifest, digest) = tokio::time::timeout(
            self.timeout,
            self.client.pull_image_manifest(&image, &self.auth),
        )
        .await
        .map_err(|_| {
            RegistryError::Timeout(format!("manifest {} after {:?}", image.whole(), self.timeout))
        })?
        .map_err(|e| classify_distribution_error(&e, &image.whole()))?;

        Ok(ManifestDescriptor {
            digest,
            config: BlobDescriptor {
                digest: manifest.config.digest,
                size: manifest.config.size.max(0) as u64,
                media_type: manifest.config.media_type,
            },
        })
    }

    async fn download_blob(
        &self,
        repository: &str,
        blob: &BlobDescriptor,
        max_size: u64,
    ) -> Result<Vec<u8>, ResolveError> {
        let image = self.reference(repository, &TagOrDigest::Digest(blob.digest.clone()));
        let descriptor = OciDescriptor {
            media_type: blob.media_type.clone(),
            digest: blob.digest.clone(),
            size: blob.size as i64,
            ..Default::default()
        };

        let mut buffer = BoundedBuffer::new(max_size);
        let pulled = tokio::time::timeout(
            self.timeout,
            self.client.pull_blob(&image, &descriptor, &mut buffer),
        )
        .await;

        if buffer.exceeded {
            return Err(ResolveError::BlobTooLarge {
                digest: blob.digest.clone(),
                size: buffer.attempted,
                limit: max_size,
            });
        }

        match pulled {
            Err(_) => Err(RegistryError::Timeout(format!(
                "blob {} after {:?}",
                blob.digest, self.timeout
            ))
            .into()),
            Ok(Err(e)) => Err(classify_distribution_error(&e, &image.whole()).into()),
            Ok(Ok(())) => Ok(buffer.data),
        }
    }
}

/// In-memory sink that refuses to grow past a fixed size
struct BoundedBuffer {
    data: Vec<u8>,
    limit: u64,
    attempted: u64,
    exceeded: bool,
}

impl BoundedBuffer {
    fn new(limit: u64) -> Self {
        Self {
            data: Vec::new(),
            limit,
            attempted: 0,
            exceeded: false,
        }
    }
}

impl AsyncWrite for BoundedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.attempted = this.data.len() as u64 + buf.len() as u64;
        if this.attempted > this.limit {
            this.exceeded = true;
            return Poll::Ready(Err(io::Error::other("blob exceeds configured size limit")));
        }
        this.data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Deserialize)]
struct ImageConfigDocument {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<LabelSet>,
}

/// Read `config.Labels` from an image config document.
///
/// A missing or null label field is an empty set, not an error.
pub fn extract_labels(bytes: &[u8]) -> Result<LabelSet, ResolveError> {
    let document: ImageConfigDocument =
        serde_json::from_slice(bytes).map_err(|e| ResolveError::BlobDecode(e.to_string()))?;

    Ok(document
        .config
        .and_then(|config| config.labels)
        .unwrap_or_default())
}

/// Manifest and config blob retrieval with a bounded config size
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    max_config_size: u64,
}

impl ManifestFetcher {
    pub fn new(max_config_size: u64) -> Self {
        Self { max_config_size }
    }

    pub async fn fetch_manifest(
        &self,
        client: &dyn RegistryClient,
        repository: &str,
        reference: &TagOrDigest,
    ) -> Result<ManifestDescriptor, ResolveError> {
        Ok(client.fetch_manifest(repository, reference).await?)
    }

    /// Download a config blob fully into memory, refusing anything over the limit
    pub async fn download_config_blob(
        &self,
        client: &dyn RegistryClient,
        repository: &str,
        blob: &BlobDescriptor,
    ) -> Result<Vec<u8>, ResolveError> {
        let too_large = |size: u64| ResolveError::BlobTooLarge {
            digest: blob.digest.clone(),
            size,
            limit: self.max_config_size,
        };

        if blob.size > self.max_config_size {
            return Err(too_large(blob.size));
        }

        let bytes = client
            .download_blob(repository, blob, self.max_config_size)
            .await?;

        if bytes.len() as u64 > self.max_config_size {
            return Err(too_large(bytes.len() as u64));
        }
        Ok(bytes)
    }

    /// Resolve the raw label set of `image` through `client`
    pub async fn fetch_labels(
        &self,
        client: &dyn RegistryClient,
        image: &ImageReference,
    ) -> Result<LabelSet, ResolveError> {
        let manifest = self
            .fetch_manifest(client, &image.repository, &image.reference)
            .await?;

        tracing::debug!(
            image = %image,
            manifest_digest = %manifest.digest,
            config_digest = %manifest.config.digest,
            "Fetched manifest"
        );

        let bytes = self
            .download_config_blob(client, &image.repository, &manifest.config)
            .await?;

        extract_labels(&bytes)
    }
}
