//! Resources a bundle owns, and how they are released.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CleanupError, CleanupFailure};
use crate::platform::{DeleteOutcome, Platform, ResourceHandle};
use crate::wait::{Timeouts, WaitError, wait_for_deletion};

/// Handles created by one bundle, in creation order.
///
/// `owned` resources are deleted by us in reverse creation order.
/// `cascaded` resources were created by an operator on our behalf; they are
/// expected to disappear with their owner and are deleted explicitly only
/// when they outlive the cascade grace period.
#[derive(Clone)]
pub struct OwnedResources {
    platform: Arc<dyn Platform>,
    timeouts: Timeouts,
    owned: Vec<ResourceHandle>,
    cascaded: Vec<ResourceHandle>,
}

impl OwnedResources {
    pub fn new(platform: Arc<dyn Platform>, timeouts: Timeouts) -> Self {
        Self {
            platform,
            timeouts,
            owned: Vec::new(),
            cascaded: Vec::new(),
        }
    }

    pub fn push(&mut self, handle: ResourceHandle) {
        self.owned.push(handle);
    }

    pub fn expect_cascade(&mut self, handle: ResourceHandle) {
        self.cascaded.push(handle);
    }

    pub fn owned(&self) -> &[ResourceHandle] {
        &self.owned
    }

    pub fn cascaded(&self) -> &[ResourceHandle] {
        &self.cascaded
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty() && self.cascaded.is_empty()
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Delete everything, newest first, then make sure cascaded children
    /// are gone too. Every resource is attempted even if an earlier one
    /// fails; failures come back as one aggregate.
    pub async fn release(&self) -> Result<(), CleanupError> {
        let mut errors = CleanupError::default();
        for handle in self.owned.iter().rev() {
            if let Err(failure) = self.delete_and_wait(handle).await {
                errors.push(failure);
            }
        }
        for handle in &self.cascaded {
            if let Err(failure) = self.verify_cascade(handle).await {
                errors.push(failure);
            }
        }
        errors.into_result()
    }

    async fn delete_and_wait(&self, handle: &ResourceHandle) -> Result<(), CleanupFailure> {
        info!(
            kind = %handle.kind(),
            namespace = handle.namespace().unwrap_or(""),
            name = handle.name(),
            "Deleting resource"
        );
        match self.platform.delete(handle).await {
            Ok(DeleteOutcome::Deleted) => {}
            Ok(DeleteOutcome::AlreadyGone) => {
                debug!(resource = %handle, "Already deleted");
                return Ok(());
            }
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                warn!(resource = %handle, error = %e, "Delete request failed");
                return Err(CleanupFailure::new(handle.clone(), e.to_string()));
            }
        }

        wait_for_deletion(
            self.platform.as_ref(),
            handle,
            self.timeouts.deletion,
            self.timeouts.poll_interval,
        )
        .await
        .map_err(|e| {
            warn!(resource = %handle, error = %e, "Deletion not confirmed");
            CleanupFailure::new(handle.clone(), format!("deletion not confirmed: {e}"))
        })
    }

    async fn verify_cascade(&self, handle: &ResourceHandle) -> Result<(), CleanupFailure> {
        match wait_for_deletion(
            self.platform.as_ref(),
            handle,
            self.timeouts.cascade_grace,
            self.timeouts.poll_interval,
        )
        .await
        {
            Ok(()) => {
                debug!(resource = %handle, "Removed by owner cascade");
                Ok(())
            }
            Err(WaitError::Timeout { .. }) => {
                warn!(
                    resource = %handle,
                    grace = ?self.timeouts.cascade_grace,
                    "Dependent outlived its owner, deleting explicitly"
                );
                self.delete_and_wait(handle).await
            }
            Err(e) => Err(CleanupFailure::new(handle.clone(), e.to_string())),
        }
    }
}

impl std::fmt::Debug for OwnedResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedResources")
            .field("owned", &self.owned)
            .field("cascaded", &self.cascaded)
            .finish()
    }
}
