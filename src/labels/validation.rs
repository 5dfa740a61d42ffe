use super::LabelSet;
use lazy_static::lazy_static;
use regex::Regex;

const MAX_NAME_LENGTH: usize = 63;
const MAX_PREFIX_LENGTH: usize = 253;
const MAX_VALUE_LENGTH: usize = 63;

lazy_static! {
    static ref NAME: Regex = Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap();
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

/// Why a label key or value is not acceptable as a Kubernetes label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelViolation {
    EmptyName,
    NameTooLong(usize),
    InvalidName,
    TooManySlashes,
    EmptyPrefix,
    PrefixTooLong(usize),
    InvalidPrefix,
    ValueTooLong(usize),
    InvalidValue,
}

impl std::fmt::Display for LabelViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "name part must not be empty"),
            Self::NameTooLong(len) => write!(
                f,
                "name part is {} characters, must be at most {}",
                len, MAX_NAME_LENGTH
            ),
            Self::InvalidName => write!(
                f,
                "name part must consist of alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric"
            ),
            Self::TooManySlashes => write!(f, "key may contain at most one '/'"),
            Self::EmptyPrefix => write!(f, "prefix must not be empty"),
            Self::PrefixTooLong(len) => write!(
                f,
                "prefix is {} characters, must be at most {}",
                len, MAX_PREFIX_LENGTH
            ),
            Self::InvalidPrefix => write!(f, "prefix must be a lowercase DNS subdomain"),
            Self::ValueTooLong(len) => write!(
                f,
                "value is {} characters, must be at most {}",
                len, MAX_VALUE_LENGTH
            ),
            Self::InvalidValue => write!(
                f,
                "value must be empty or consist of alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric"
            ),
        }
    }
}

fn validate_name(name: &str) -> Result<(), LabelViolation> {
    if name.is_empty() {
        return Err(LabelViolation::EmptyName);
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(LabelViolation::NameTooLong(name.len()));
    }
    if !NAME.is_match(name) {
        return Err(LabelViolation::InvalidName);
    }
    Ok(())
}

fn validate_prefix(prefix: &str) -> Result<(), LabelViolation> {
    if prefix.is_empty() {
        return Err(LabelViolation::EmptyPrefix);
    }
    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err(LabelViolation::PrefixTooLong(prefix.len()));
    }
    let valid = prefix
        .split('.')
        .all(|segment| segment.len() <= MAX_NAME_LENGTH && DNS_LABEL.is_match(segment));
    if !valid {
        return Err(LabelViolation::InvalidPrefix);
    }
    Ok(())
}

/// Check a label key of the form `[prefix/]name`
pub fn validate_key(key: &str) -> Result<(), LabelViolation> {
    match key.split_once('/') {
        Some((_, name)) if name.contains('/') => Err(LabelViolation::TooManySlashes),
        Some((prefix, name)) => {
            validate_prefix(prefix)?;
            validate_name(name)
        }
        None => validate_name(key),
    }
}

/// Check a label value; the empty string is allowed
pub fn validate_value(value: &str) -> Result<(), LabelViolation> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_VALUE_LENGTH {
        return Err(LabelViolation::ValueTooLong(value.len()));
    }
    if !NAME.is_match(value) {
        return Err(LabelViolation::InvalidValue);
    }
    Ok(())
}

pub fn is_valid_label_key(key: &str) -> bool {
    validate_key(key).is_ok()
}

pub fn is_valid_label_value(value: &str) -> bool {
    validate_value(value).is_ok()
}

/// Keep only the pairs whose key and value are both valid.
///
/// Dropped pairs are logged at debug level with the reason.
pub fn filter_labels(labels: LabelSet) -> LabelSet {
    labels
        .into_iter()
        .filter(|(key, value)| {
            match validate_key(key).and_then(|_| validate_value(value)) {
                Ok(()) => true,
                Err(violation) => {
                    tracing::debug!(key = %key, value = %value, "Dropping label: {}", violation);
                    false
                }
            }
        })
        .collect()
}
