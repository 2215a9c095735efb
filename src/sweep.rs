//! Removal of labelled leftovers.
//!
//! A crashed worker, or a run with teardown disabled, leaves objects behind.
//! Everything the factory creates carries the managed-by and run-id labels,
//! so the sweeper can find those objects without any in-process state and
//! delete them dependents first.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::lifecycle::OwnedResources;
use crate::platform::{Platform, ResourceHandle, ResourceKind};
use crate::resources::managed_selector;
use crate::wait::Timeouts;

/// Deletion order: owners before what they depend on, namespaces last.
pub const SWEEP_ORDER: [ResourceKind; 8] = [
    ResourceKind::ModelRegistry,
    ResourceKind::LlmInferenceService,
    ResourceKind::InferenceService,
    ResourceKind::Service,
    ResourceKind::Deployment,
    ResourceKind::PersistentVolumeClaim,
    ResourceKind::Secret,
    ResourceKind::Namespace,
];

/// What a sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<ResourceHandle>,
}

/// Delete every object labelled as created by this crate.
///
/// `namespace` limits the sweep to one namespace, in which case labelled
/// namespaces themselves are left alone. `run_id` limits it to one run.
/// Every object is attempted; failures come back as one
/// [`Error::Cleanup`] after the rest were removed.
pub async fn sweep(
    platform: Arc<dyn Platform>,
    namespace: Option<&str>,
    run_id: Option<&str>,
    timeouts: Timeouts,
) -> Result<SweepReport> {
    let selector = managed_selector(run_id);
    let mut found = Vec::new();
    for kind in SWEEP_ORDER {
        if !kind.is_namespaced() && namespace.is_some() {
            continue;
        }
        let scope = if kind.is_namespaced() { namespace } else { None };
        for object in platform.list(kind, scope, &selector).await? {
            match ResourceHandle::for_object(kind, &object) {
                Ok(handle) => found.push(handle),
                Err(e) => warn!(kind = %kind, error = %e, "Skipping unaddressable object"),
            }
        }
    }

    if found.is_empty() {
        info!(selector = %selector, "Nothing to sweep");
        return Ok(SweepReport::default());
    }
    info!(selector = %selector, count = found.len(), "Sweeping leftover resources");

    // Released newest first, so push in reverse sweep order
    let mut owned = OwnedResources::new(platform, timeouts);
    for handle in found.iter().rev() {
        owned.push(handle.clone());
    }

    match owned.release().await {
        Ok(()) => Ok(SweepReport { removed: found }),
        Err(failures) => {
            for leaked in failures.resources() {
                warn!(
                    kind = %leaked.kind(),
                    namespace = leaked.namespace().unwrap_or(""),
                    name = leaked.name(),
                    "Could not sweep resource"
                );
            }
            Err(Error::Cleanup(failures))
        }
    }
}
