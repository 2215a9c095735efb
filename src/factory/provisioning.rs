//! One provisioning run, and the state a bundle keeps afterwards.
//!
//! A [`Provisioning`] records every resource it creates so that a failed
//! step can remove what was already there before the error is returned.
//! [`Provisioning::finish`] hands the records over to a [`Provisioned`],
//! which the bundle keeps for its single teardown.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use kube::api::DynamicObject;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{ExistingPolicy, NameLease, ProvisionContext};
use crate::error::{
    CleanupError, Error, PlatformError, ProvisioningCause, ProvisioningError, Result,
};
use crate::lifecycle::{BundleEvent, BundlePhase, Cleanup, Lifecycle, OwnedResources};
use crate::platform::{Readiness, ResourceHandle, ResourceKind};
use crate::resources::common::to_dynamic;
use crate::wait::{WaitError, wait_for_condition};

/// Turn a failed wait into the provisioning error reported to the test.
pub fn wait_failure(handle: ResourceHandle, err: WaitError) -> ProvisioningError {
    match err {
        WaitError::Timeout { after, last_status } => {
            ProvisioningError::new(handle, ProvisioningCause::Timeout(after))
                .with_last_status(last_status)
        }
        WaitError::ResourceDeleted => ProvisioningError::new(handle, ProvisioningCause::Deleted),
        WaitError::Failed(reason) => {
            ProvisioningError::new(handle, ProvisioningCause::Failed(reason.clone()))
                .with_last_status(Some(reason))
        }
        WaitError::Platform(e) => ProvisioningError::new(handle, ProvisioningCause::Platform(e)),
    }
}

/// Resources created so far by one bundle's provisioning.
pub struct Provisioning<'a> {
    ctx: &'a ProvisionContext,
    owned: OwnedResources,
    children: Vec<Arc<dyn Cleanup>>,
    lifecycle: Lifecycle,
    lease: Option<NameLease>,
}

impl<'a> Provisioning<'a> {
    pub fn begin(
        ctx: &'a ProvisionContext,
        identity: impl Into<String>,
        lease: Option<NameLease>,
    ) -> Self {
        let lifecycle = Lifecycle::new(identity);
        if let Err(e) = lifecycle.fire(BundleEvent::ProvisioningStarted) {
            debug!(error = %e, "Fresh lifecycle refused to start");
        }
        info!(bundle = lifecycle.identity(), run_id = ctx.run_id(), "Provisioning bundle");
        Self {
            ctx,
            owned: OwnedResources::new(Arc::clone(ctx.platform()), *ctx.timeouts()),
            children: Vec::new(),
            lifecycle,
            lease,
        }
    }

    pub fn context(&self) -> &'a ProvisionContext {
        self.ctx
    }

    pub fn identity(&self) -> &str {
        self.lifecycle.identity()
    }

    /// Create `manifest` and record it as owned.
    ///
    /// A name clash is a `Conflict` unless the factory adopts existing
    /// objects, in which case the live object is taken over.
    pub async fn apply<T: Serialize>(
        &mut self,
        kind: ResourceKind,
        manifest: &T,
    ) -> Result<DynamicObject> {
        let object = to_dynamic(manifest)?;
        let handle = ResourceHandle::for_object(kind, &object)?;
        let ctx = self.ctx;
        let platform = ctx.platform();

        match platform.create(kind, &object).await {
            Ok(created) => {
                info!(
                    kind = %kind,
                    namespace = handle.namespace().unwrap_or(""),
                    name = handle.name(),
                    "Created resource"
                );
                self.owned.push(handle);
                Ok(created)
            }
            Err(PlatformError::AlreadyExists(_)) => match ctx.existing() {
                ExistingPolicy::Adopt => {
                    warn!(resource = %handle, "Resource already exists, adopting it");
                    let live = platform
                        .get(&handle)
                        .await
                        .map_err(|e| {
                            ProvisioningError::new(handle.clone(), ProvisioningCause::Platform(e))
                        })?
                        .ok_or_else(|| {
                            ProvisioningError::new(handle.clone(), ProvisioningCause::Deleted)
                        })?;
                    self.owned.push(handle);
                    Ok(live)
                }
                ExistingPolicy::Fail => {
                    Err(ProvisioningError::new(handle, ProvisioningCause::Conflict).into())
                }
            },
            Err(PlatformError::Rejected { reason, .. }) => {
                Err(ProvisioningError::new(handle, ProvisioningCause::Rejected(reason)).into())
            }
            Err(e) => Err(ProvisioningError::new(handle, ProvisioningCause::Platform(e)).into()),
        }
    }

    /// Create `manifest` and wait until its kind reports it ready.
    pub async fn apply_ready<T: Serialize>(
        &mut self,
        kind: ResourceKind,
        manifest: &T,
    ) -> Result<DynamicObject> {
        let created = self.apply(kind, manifest).await?;
        let handle = ResourceHandle::for_object(kind, &created)?;
        self.await_ready(&handle).await
    }

    pub async fn await_ready(&self, handle: &ResourceHandle) -> Result<DynamicObject> {
        let kind = handle.kind();
        self.await_condition(handle, move |o| kind.readiness(o)).await
    }

    /// Wait for a caller-supplied readiness predicate, bounded by the
    /// readiness timeout.
    pub async fn await_condition<F>(&self, handle: &ResourceHandle, condition: F) -> Result<DynamicObject>
    where
        F: Fn(&DynamicObject) -> Readiness + Sync,
    {
        let timeouts = self.ctx.timeouts();
        debug!(resource = %handle, timeout = ?timeouts.readiness, "Waiting for readiness");
        wait_for_condition(
            self.ctx.platform().as_ref(),
            handle,
            condition,
            timeouts.readiness,
            timeouts.poll_interval,
        )
        .await
        .map_err(|e| wait_failure(handle.clone(), e).into())
    }

    /// Record a resource this bundle must delete, created outside [`apply`](Self::apply).
    pub fn own(&mut self, handle: ResourceHandle) {
        self.owned.push(handle);
    }

    /// Record an operator-created dependent that should vanish with its owner.
    pub fn expect_cascade(&mut self, handle: ResourceHandle) {
        self.owned.expect_cascade(handle);
    }

    /// Record a child bundle to clean up if a later step fails.
    pub fn adopt_child(&mut self, child: Arc<dyn Cleanup>) {
        self.children.push(child);
    }

    /// Remove everything created so far and return `err`, annotated with
    /// the cleanup outcome.
    pub async fn abort(self, err: Error) -> Error {
        let attempted = !(self.owned.is_empty() && self.children.is_empty());
        let mut failures = CleanupError::default();
        if attempted {
            warn!(
                bundle = self.lifecycle.identity(),
                owned = self.owned.owned().len(),
                children = self.children.len(),
                error = %err,
                "Provisioning failed, removing partially created resources"
            );
            failures.absorb(self.owned.release().await);
            for child in self.children.iter().rev() {
                failures.absorb(child.cleanup().await);
            }
        }
        if let Err(e) = self.lifecycle.fire(BundleEvent::ProvisioningFailed {
            cleanup_attempted: attempted,
        }) {
            debug!(error = %e, "Lifecycle already left provisioning");
        }

        let outcome = failures.into_result();
        if outcome.is_err()
            && let Some(lease) = self.lease
        {
            lease.retain();
        }
        match err {
            Error::Provisioning(mut failed) => {
                if attempted {
                    failed.record_cleanup(outcome);
                }
                Error::Provisioning(failed)
            }
            other => {
                if let Err(cleanup) = outcome {
                    for leaked in cleanup.resources() {
                        error!(
                            kind = %leaked.kind(),
                            namespace = leaked.namespace().unwrap_or(""),
                            name = leaked.name(),
                            "Partially created resource left behind"
                        );
                    }
                }
                other
            }
        }
    }

    /// Mark the bundle ready and hand over what it owns.
    pub fn finish(self) -> Provisioned {
        if let Err(e) = self.lifecycle.fire(BundleEvent::ResourcesReady) {
            debug!(error = %e, "Lifecycle already left provisioning");
        }
        info!(
            bundle = self.lifecycle.identity(),
            resources = self.owned.owned().len(),
            "Bundle ready"
        );
        Provisioned {
            owned: self.owned,
            lifecycle: self.lifecycle,
            lease: Mutex::new(self.lease),
        }
    }
}

/// What a ready bundle owns, plus its lifecycle.
pub struct Provisioned {
    owned: OwnedResources,
    lifecycle: Lifecycle,
    lease: Mutex<Option<NameLease>>,
}

impl Provisioned {
    pub fn identity(&self) -> &str {
        self.lifecycle.identity()
    }

    pub fn phase(&self) -> BundlePhase {
        self.lifecycle.phase()
    }

    pub fn owned(&self) -> &OwnedResources {
        &self.owned
    }

    /// Run `release` if this is the first teardown of a ready bundle.
    ///
    /// The name claim is kept when something could not be removed, so a
    /// leftover object is never handed to a new bundle.
    pub async fn teardown<Fut>(&self, release: Fut) -> Result<(), CleanupError>
    where
        Fut: Future<Output = Result<(), CleanupError>>,
    {
        if !self.lifecycle.begin_teardown() {
            debug!(bundle = self.identity(), phase = %self.phase(), "Cleanup already done, skipping");
            return Ok(());
        }
        info!(bundle = self.identity(), "Cleaning up bundle");
        let outcome = release.await;
        let phase = self.lifecycle.finish_teardown(&outcome);
        match &outcome {
            Ok(()) => {
                self.lease
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                info!(bundle = self.identity(), %phase, "Bundle released");
            }
            Err(e) => warn!(bundle = self.identity(), %phase, error = %e, "Bundle cleanup incomplete"),
        }
        outcome
    }
}

impl std::fmt::Debug for Provisioned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioned")
            .field("lifecycle", &self.lifecycle)
            .field("owned", &self.owned)
            .finish()
    }
}
