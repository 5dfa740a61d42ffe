use super::models::{container_image, pod_labels, LabelsResponse, IMAGE_POINTER};
use crate::error::{ServerError, ServerErrorExt};
use crate::state::AppState;
use axum::{body::Bytes, extract::State, Json};

/// Liveness probe
pub async fn ping() -> &'static str {
    "OK"
}

/// Resolve the labels of the first container image of the posted pod
pub async fn resolve_labels(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<LabelsResponse>, ServerError> {
    let pod: serde_json::Value =
        serde_json::from_slice(&body).internal_err("Request body is not valid JSON")?;

    let image = container_image(&pod).ok_or_else(|| {
        ServerError::internal("Pod document has no container image")
            .with_context("pointer", IMAGE_POINTER)
    })?;

    let image_labels = state
        .resolver
        .resolve(image)
        .await
        .map_err(|e| ServerError::from(e).with_context("image", image))?;

    let labels = if state.webhook_settings.merge_pod_labels {
        let mut labels = pod_labels(&pod).internal_err("Pod labels are not a string map")?;
        labels.extend(image_labels);
        labels
    } else {
        image_labels
    };

    tracing::debug!(image = %image, count = labels.len(), "Resolved labels");
    Ok(Json(LabelsResponse { labels }))
}
