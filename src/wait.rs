//! Bounded polling waits against a [`Platform`].
//!
//! Every wait has an explicit timeout. The last status seen before giving
//! up is kept so a timeout can say what the resource looked like.
//! Transient platform errors keep the loop polling; anything else ends it.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kube::api::DynamicObject;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::error::PlatformError;
use crate::platform::{Platform, Readiness, ResourceHandle};

/// Error type for wait operations.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timeout waiting for condition after {after:?}")]
    Timeout {
        after: Duration,
        last_status: Option<String>,
    },

    #[error("Resource was deleted while waiting")]
    ResourceDeleted,

    #[error("Resource reported a terminal failure: {0}")]
    Failed(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl WaitError {
    pub fn last_status(&self) -> Option<&str> {
        match self {
            WaitError::Timeout { last_status, .. } => last_status.as_deref(),
            _ => None,
        }
    }
}

/// Timeouts applied by the factory and by bundle cleanup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Upper bound for each readiness wait during provisioning
    pub readiness: Duration,
    /// Upper bound for each deletion to be confirmed during cleanup
    pub deletion: Duration,
    /// How long operator-owned children get to disappear on their own
    pub cascade_grace: Duration,
    /// Delay between two status reads
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness: Duration::from_secs(300),
            deletion: Duration::from_secs(120),
            cascade_grace: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl Timeouts {
    pub fn with_readiness(mut self, readiness: Duration) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_deletion(mut self, deletion: Duration) -> Self {
        self.deletion = deletion;
        self
    }

    pub fn with_cascade_grace(mut self, cascade_grace: Duration) -> Self {
        self.cascade_grace = cascade_grace;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// What one observation in a polling loop found.
#[derive(Debug)]
pub enum Observation<T> {
    /// Condition met
    Done(T),
    /// Not yet; the string describes the current status
    Pending(String),
    /// Condition can no longer be met
    Failed(String),
}

/// Call `observe` every `interval` until it reports `Done`, reports
/// `Failed`, returns a non-transient error, or `limit` elapses.
pub async fn poll_until<T, F, Fut>(
    limit: Duration,
    interval: Duration,
    mut observe: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>, WaitError>>,
{
    let last_status: Mutex<Option<String>> = Mutex::new(None);
    let record = |status: String| {
        if let Ok(mut last) = last_status.lock() {
            *last = Some(status);
        }
    };

    let poll_future = async {
        loop {
            match observe().await {
                Ok(Observation::Done(value)) => return Ok(value),
                Ok(Observation::Pending(status)) => record(status),
                Ok(Observation::Failed(reason)) => return Err(WaitError::Failed(reason)),
                Err(WaitError::Platform(e)) if e.is_transient() => {
                    debug!(error = %e, "Transient error while polling, retrying");
                    record(e.to_string());
                }
                Err(e) => return Err(e),
            }
            sleep(interval).await;
        }
    };

    match timeout(limit, poll_future).await {
        Ok(outcome) => outcome,
        Err(_) => Err(WaitError::Timeout {
            after: limit,
            last_status: last_status.lock().ok().and_then(|mut s| s.take()),
        }),
    }
}

/// Wait until `condition` reports the object behind `handle` as ready.
///
/// A missing object is treated as "not created yet" until it has been seen
/// once; disappearing after that is [`WaitError::ResourceDeleted`].
pub async fn wait_for_condition<F>(
    platform: &dyn Platform,
    handle: &ResourceHandle,
    condition: F,
    limit: Duration,
    interval: Duration,
) -> Result<DynamicObject, WaitError>
where
    F: Fn(&DynamicObject) -> Readiness + Sync,
{
    let seen = AtomicBool::new(false);
    let seen = &seen;
    let condition = &condition;

    poll_until(limit, interval, move || async move {
        match platform.get(handle).await? {
            Some(object) => {
                seen.store(true, Ordering::Relaxed);
                Ok(match condition(&object) {
                    Readiness::Ready => Observation::Done(object),
                    Readiness::Pending(status) => Observation::Pending(status),
                    Readiness::Failed(reason) => Observation::Failed(reason),
                })
            }
            None if seen.load(Ordering::Relaxed) => Err(WaitError::ResourceDeleted),
            None => Ok(Observation::Pending("not found".to_string())),
        }
    })
    .await
}

/// Wait until the kind's own readiness predicate holds.
pub async fn wait_until_ready(
    platform: &dyn Platform,
    handle: &ResourceHandle,
    limit: Duration,
    interval: Duration,
) -> Result<DynamicObject, WaitError> {
    let kind = handle.kind();
    wait_for_condition(platform, handle, move |o| kind.readiness(o), limit, interval).await
}

/// Wait until the object behind `handle` no longer exists.
pub async fn wait_for_deletion(
    platform: &dyn Platform,
    handle: &ResourceHandle,
    limit: Duration,
    interval: Duration,
) -> Result<(), WaitError> {
    poll_until(limit, interval, move || async move {
        match platform.get(handle).await? {
            None => Ok(Observation::Done(())),
            Some(object) => {
                let status = match object.metadata.deletion_timestamp {
                    Some(_) => "terminating".to_string(),
                    None => "still present".to_string(),
                };
                Ok(Observation::Pending(status))
            }
        }
    })
    .await
}
