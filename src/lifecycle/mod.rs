//! Bundle lifecycles and the scopes that guarantee their teardown.

mod owned;
mod scope;
pub mod state_machine;

pub use owned::OwnedResources;
pub use scope::{LifecycleScope, ScopeKind, ScopeReport, scoped};
pub use state_machine::{BundleEvent, BundlePhase, Lifecycle};

use async_trait::async_trait;

use crate::error::CleanupError;

/// Anything a [`LifecycleScope`] can tear down.
#[async_trait]
pub trait Cleanup: Send + Sync {
    /// Human-readable identity used in logs and leak reports.
    fn identity(&self) -> String;

    fn phase(&self) -> BundlePhase;

    /// Release every owned resource. Idempotent: only the first call on a
    /// ready bundle does any work.
    async fn cleanup(&self) -> Result<(), CleanupError>;
}
