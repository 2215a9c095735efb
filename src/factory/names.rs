//! In-process registry of names claimed by active bundles.
//!
//! Isolation between concurrently running tests is naming-based: every
//! prefix-derived name gets a random 8-hex suffix, and an exact name can
//! only be held by one active bundle per namespace at a time. A claim is
//! released when its [`NameLease`] is dropped, i.e. when the bundle holding
//! it goes away.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ConfigurationError;

/// Attempts at finding a free generated name before giving up.
const MAX_SUFFIX_ATTEMPTS: usize = 8;

static GLOBAL: LazyLock<Arc<NameRegistry>> = LazyLock::new(NameRegistry::new);

/// Random 8-hex-character suffix.
pub fn unique_suffix() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct NameKey {
    /// Empty for cluster-scoped names
    namespace: String,
    name: String,
}

/// Names held by active bundles.
#[derive(Debug, Default)]
pub struct NameRegistry {
    active: Mutex<HashSet<NameKey>>,
}

impl NameRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by every factory in this process.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<NameKey>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim an exact name.
    pub fn claim(
        self: &Arc<Self>,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<NameLease, ConfigurationError> {
        let key = NameKey {
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        };
        if !self.lock().insert(key.clone()) {
            return Err(ConfigurationError::NameInUse {
                namespace: key.namespace,
                name: key.name,
            });
        }
        debug!(namespace = %key.namespace, name = %key.name, "Claimed name");
        Ok(NameLease {
            registry: Arc::clone(self),
            key,
            release_on_drop: true,
        })
    }

    /// Claim `{prefix}-{8 hex}` with a fresh suffix.
    pub fn claim_generated(
        self: &Arc<Self>,
        namespace: Option<&str>,
        prefix: &str,
    ) -> Result<NameLease, ConfigurationError> {
        let mut last_err = None;
        for _ in 0..MAX_SUFFIX_ATTEMPTS {
            match self.claim(namespace, &format!("{prefix}-{}", unique_suffix())) {
                Ok(lease) => return Ok(lease),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(ConfigurationError::NameInUse {
            namespace: namespace.unwrap_or_default().to_string(),
            name: prefix.to_string(),
        }))
    }

    pub fn is_claimed(&self, namespace: Option<&str>, name: &str) -> bool {
        self.lock().contains(&NameKey {
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        })
    }

    /// Number of names currently held.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, key: &NameKey) {
        if self.lock().remove(key) {
            debug!(namespace = %key.namespace, name = %key.name, "Released name");
        }
    }
}

/// A held name; released on drop unless [`retain`](NameLease::retain)ed.
pub struct NameLease {
    registry: Arc<NameRegistry>,
    key: NameKey,
    release_on_drop: bool,
}

impl NameLease {
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Keep the name claimed for the rest of the process. Used when objects
    /// carrying it could not be removed.
    pub fn retain(mut self) {
        warn!(
            namespace = %self.key.namespace,
            name = %self.key.name,
            "Name stays claimed, objects using it were left behind"
        );
        self.release_on_drop = false;
    }
}

impl fmt::Debug for NameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameLease")
            .field("namespace", &self.key.namespace)
            .field("name", &self.key.name)
            .finish()
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        if self.release_on_drop {
            self.registry.release(&self.key);
        }
    }
}
