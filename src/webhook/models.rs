use crate::labels::LabelSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON pointer of the image inspected for labels
pub const IMAGE_POINTER: &str = "/spec/containers/0/image";

/// JSON pointer of the pod's own labels
pub const POD_LABELS_POINTER: &str = "/metadata/labels";

/// Response body of `POST /`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelsResponse {
    pub labels: LabelSet,
}

/// Read the first container's image reference from a pod document
pub fn container_image(pod: &Value) -> Option<&str> {
    pod.pointer(IMAGE_POINTER).and_then(Value::as_str)
}

/// Read the pod's `metadata.labels`.
///
/// A missing or null label map is empty; anything other than a string-valued
/// object is an error.
pub fn pod_labels(pod: &Value) -> Result<LabelSet, serde_json::Error> {
    match pod.pointer(POD_LABELS_POINTER) {
        None | Some(Value::Null) => Ok(LabelSet::new()),
        Some(labels) => LabelSet::deserialize(labels),
    }
}
