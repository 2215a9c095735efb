//! Field validation shared by the configuration builders.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::ConfigurationError;

/// Longest DNS-1123 label Kubernetes accepts.
pub const MAX_NAME_LEN: usize = 63;

/// Room left for the `-xxxxxxxx` suffix appended to generated names.
pub const MAX_PREFIX_LEN: usize = MAX_NAME_LEN - 9;

static DNS_LABEL_RE: LazyLock<Option<regex::Regex>> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok());

static STORAGE_RE: LazyLock<Option<regex::Regex>> = LazyLock::new(|| {
    regex::Regex::new(r"^([0-9]+)(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").ok()
});

/// Check that `value` is a DNS-1123 label no longer than `max_len`.
pub fn dns_label(field: &'static str, value: &str, max_len: usize) -> Result<(), ConfigurationError> {
    if value.is_empty() {
        return Err(ConfigurationError::MissingField { field });
    }
    if value.len() > max_len {
        return Err(ConfigurationError::InvalidName {
            field,
            value: value.to_string(),
            reason: format!("must be at most {max_len} characters"),
        });
    }
    let valid = DNS_LABEL_RE
        .as_ref()
        .map(|re| re.is_match(value))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidName {
            field,
            value: value.to_string(),
            reason: "must consist of lower case alphanumeric characters or '-', \
                     and start and end with an alphanumeric character"
                .to_string(),
        })
    }
}

/// Check that a required string field is present.
pub fn required(field: &'static str, value: &str) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        Err(ConfigurationError::MissingField { field })
    } else {
        Ok(())
    }
}

/// Check that a port is in `1..=65535`.
pub fn port(field: &'static str, value: i32) -> Result<(), ConfigurationError> {
    if (1..=65535).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::OutOfRange {
            field,
            value: value.to_string(),
            reason: "port must be between 1 and 65535".to_string(),
        })
    }
}

/// A strictly positive storage quantity such as `5Gi`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageSize(String);

impl StorageSize {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.0.clone())
    }
}

impl Default for StorageSize {
    fn default() -> Self {
        Self("5Gi".to_string())
    }
}

impl fmt::Display for StorageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorageSize {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let out_of_range = |reason: &str| ConfigurationError::OutOfRange {
            field: "storage_size",
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let caps = STORAGE_RE
            .as_ref()
            .and_then(|re| re.captures(s.trim()))
            .ok_or_else(|| out_of_range("not a Kubernetes quantity such as 5Gi"))?;
        let amount: u64 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| out_of_range("amount does not fit in 64 bits"))?;
        if amount == 0 {
            return Err(out_of_range("must be greater than zero"));
        }
        Ok(Self(s.trim().to_string()))
    }
}
