//! Label resolution: image reference in, filtered Kubernetes labels out.

pub mod cache;
pub mod resolver;
pub mod validation;

use std::collections::BTreeMap;

/// Label key to value mapping, ordered for stable responses
pub type LabelSet = BTreeMap<String, String>;

pub use cache::LabelCache;
pub use resolver::{LabelResolver, ResolverOptions};
pub use validation::{filter_labels, is_valid_label_key, is_valid_label_value};
