//! Fixture configurations and the bundles they provision.
//!
//! Each `*Config` is an immutable, validated description of desired state
//! and implements [`Blueprint`](crate::factory::Blueprint); each `*Bundle`
//! owns what one provisioning run created and knows how to release it.

pub mod database;
pub mod dsc;
pub mod manifest;
pub mod namespace;
pub mod registry;
pub mod validation;

pub use database::{AccessMode, DatabaseBundle, DatabaseConfig, DatabaseConfigBuilder, DatabaseTls};
pub use dsc::{ComponentPatchBundle, ComponentPatchConfig, ComponentPatchConfigBuilder};
pub use manifest::{ManifestBundle, ManifestConfig, ManifestConfigBuilder};
pub use namespace::{NamespaceBundle, NamespaceConfig, NamespaceConfigBuilder};
pub use registry::{
    AuthMode, DatabaseSource, RegistryBundle, RegistryConfig, RegistryConfigBuilder,
};
pub use validation::StorageSize;

use std::fmt;

use crate::error::ConfigurationError;
use validation::{MAX_NAME_LEN, MAX_PREFIX_LEN, dns_label};

/// How a fixture's object name is chosen.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NameStrategy {
    /// `{prefix}-{8 hex}`, unique per claim
    Prefix(String),
    /// Exactly this name; only one active bundle may hold it
    Exact(String),
}

impl NameStrategy {
    /// Validate as a DNS-1123 label, leaving room for the generated suffix.
    pub fn validate(&self, field: &'static str) -> Result<(), ConfigurationError> {
        match self {
            NameStrategy::Prefix(prefix) => dns_label(field, prefix, MAX_PREFIX_LEN),
            NameStrategy::Exact(name) => dns_label(field, name, MAX_NAME_LEN),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NameStrategy::Prefix(s) | NameStrategy::Exact(s) => s,
        }
    }
}

impl fmt::Display for NameStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameStrategy::Prefix(prefix) => write!(f, "{prefix}-*"),
            NameStrategy::Exact(name) => f.write_str(name),
        }
    }
}
