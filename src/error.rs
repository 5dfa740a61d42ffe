use crate::oci::{RegistryError, ResolveError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Server error type that provides automatic logging and clean error responses.
///
/// This type:
/// - Automatically logs errors when converted to HTTP responses (via IntoResponse)
/// - Preserves full error chains from anyhow::Error for debugging
/// - Allows attaching structured context (image references, registry hosts)
///
/// # Example
///
/// ```rust,ignore
/// use crate::error::{ServerError, ServerErrorExt};
///
/// let pod: serde_json::Value = serde_json::from_slice(&body)
///     .internal_err("Request body is not valid JSON")?;
///
/// let err = ServerError::internal("Pod has no container image")
///     .with_context("pointer", "/spec/containers/0/image");
/// ```
#[derive(Debug)]
pub struct ServerError {
    /// HTTP status code to return
    pub status: StatusCode,
    /// User-facing error message (returned in response)
    pub message: String,
    /// Internal error with full chain (logged but not exposed to client)
    pub source: Option<anyhow::Error>,
    /// Structured context for logging (key-value pairs)
    pub context: Vec<(&'static str, String)>,
}

impl ServerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
            context: Vec::new(),
        }
    }

    /// Create an error from an anyhow::Error with full error chain
    pub fn from_anyhow(
        source: anyhow::Error,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            source: Some(source),
            context: Vec::new(),
        }
    }

    /// Add a context field for logging (chainable)
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Create a 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Create a 500 Internal Server Error from an anyhow::Error
    pub fn internal_anyhow(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Log server errors (5xx) with full context using structured fields
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    error = ?source,
                    "Server error"
                );
            } else {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    "Server error"
                );
            }
        }

        let body = Json(json!({
            "error": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_anyhow(err, "Internal server error")
    }
}

/// Malformed caller input is a request failure, never an empty answer
impl From<ResolveError> for ServerError {
    fn from(err: ResolveError) -> Self {
        let status = match &err {
            ResolveError::InvalidReference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ResolveError::Registry(RegistryError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ResolveError::Registry(_)
            | ResolveError::BlobTooLarge { .. }
            | ResolveError::BlobDecode(_) => StatusCode::BAD_GATEWAY,
        };
        let message = err.to_string();
        Self::from_anyhow(err.into(), status, message)
    }
}

/// Extension trait for Result types to easily convert to ServerError
///
/// # Example
///
/// ```rust,ignore
/// use crate::error::ServerErrorExt;
///
/// let labels = pod_labels(&pod).internal_err("Pod labels are not a string map")?;
/// ```
pub trait ServerErrorExt<T> {
    /// Convert error to internal server error (500)
    fn internal_err(self, message: impl Into<String>) -> Result<T, ServerError>;
}

impl<T, E> ServerErrorExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn internal_err(self, message: impl Into<String>) -> Result<T, ServerError> {
        self.map_err(|e| ServerError::internal_anyhow(e.into(), message))
    }
}
