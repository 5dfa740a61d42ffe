use oci_distribution::errors::{OciDistributionError, OciEnvelope, OciErrorCode};
use thiserror::Error;

/// Failure to split a raw image string into host, repository and reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceParseError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character {1:?} in image reference: {0}")]
    InvalidCharacter(String, char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// Remote interaction with a registry we hold a trust relationship with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("registry denied access: {0}")]
    Unauthorized(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry request timed out: {0}")]
    Timeout(String),
}

impl RegistryError {
    /// Whether a retry has any chance of producing a different outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Everything that can stop an image reference from resolving to a label set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid image reference: {0}")]
    InvalidReference(#[from] ReferenceParseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("config blob {digest} is {size} bytes, limit is {limit}")]
    BlobTooLarge { digest: String, size: u64, limit: u64 },

    #[error("unexpected image config document: {0}")]
    BlobDecode(String),
}

/// Map an oci-distribution failure onto the registry error taxonomy.
///
/// Classification follows the error variant and the status or OCI error codes
/// it carries, never the rendered message.
pub fn classify_distribution_error(err: &OciDistributionError, image: &str) -> RegistryError {
    let detail = format!("{}: {}", image, err);

    match err {
        OciDistributionError::UnauthorizedError { .. }
        | OciDistributionError::AuthenticationFailure(_) => RegistryError::Unauthorized(detail),
        OciDistributionError::ImageManifestNotFoundError(_) => RegistryError::NotFound(detail),
        OciDistributionError::RegistryError { envelope, .. } => classify_envelope(envelope, detail),
        OciDistributionError::ServerError { code, .. } => classify_status(*code, detail),
        OciDistributionError::RequestError(e) if e.is_timeout() => RegistryError::Timeout(detail),
        OciDistributionError::RequestError(e) => match e.status() {
            Some(status) => classify_status(status.as_u16(), detail),
            None => RegistryError::Unavailable(detail),
        },
        _ => RegistryError::Unavailable(detail),
    }
}

fn classify_status(code: u16, detail: String) -> RegistryError {
    match code {
        404 => RegistryError::NotFound(detail),
        401 | 403 => RegistryError::Unauthorized(detail),
        408 | 504 => RegistryError::Timeout(detail),
        _ => RegistryError::Unavailable(detail),
    }
}

fn classify_envelope(envelope: &OciEnvelope, detail: String) -> RegistryError {
    let has_code = |codes: &[OciErrorCode]| envelope.errors.iter().any(|e| codes.contains(&e.code));

    if has_code(&[
        OciErrorCode::ManifestUnknown,
        OciErrorCode::BlobUnknown,
        OciErrorCode::NameUnknown,
    ]) {
        RegistryError::NotFound(detail)
    } else if has_code(&[OciErrorCode::Unauthorized, OciErrorCode::Denied]) {
        RegistryError::Unauthorized(detail)
    } else {
        RegistryError::Unavailable(detail)
    }
}
