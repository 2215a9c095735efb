//! Lifecycle scopes: test, class or session boundaries that own bundles.
//!
//! Bundles registered with a scope are cleaned up in reverse registration
//! order exactly once, when the scope closes. [`scoped`] closes the scope on
//! every exit path of a test body, including panics.
//!
//! IMPORTANT: a scope that is dropped without being closed can only tear
//! down from a multi-threaded Tokio runtime (`block_in_place`). Elsewhere
//! it logs what leaked.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use jiff::Timestamp;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

use super::Cleanup;
use crate::error::{Error, Result, TeardownError};

/// Test-execution boundary a scope maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Function,
    Class,
    Session,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Function => write!(f, "function"),
            ScopeKind::Class => write!(f, "class"),
            ScopeKind::Session => write!(f, "session"),
        }
    }
}

pub struct LifecycleScope {
    kind: ScopeKind,
    name: String,
    opened_at: Timestamp,
    bundles: Mutex<Vec<Arc<dyn Cleanup>>>,
    closed: AtomicBool,
}

impl LifecycleScope {
    pub fn new(kind: ScopeKind, name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(scope = %name, %kind, "Opening scope");
        Self {
            kind,
            name,
            opened_at: Timestamp::now(),
            bundles: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::new(ScopeKind::Function, name)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(ScopeKind::Class, name)
    }

    pub fn session(name: impl Into<String>) -> Self {
        Self::new(ScopeKind::Session, name)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Cleanup>>> {
        self.bundles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of bundles awaiting teardown.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Identities of the registered bundles, in registration order.
    pub fn identities(&self) -> Vec<String> {
        self.lock().iter().map(|b| b.identity()).collect()
    }

    /// Bind a bundle's teardown to this scope.
    pub fn register(&self, bundle: Arc<dyn Cleanup>) -> Result<()> {
        let mut bundles = self.lock();
        // Checked under the lock so teardown cannot miss a late registration
        if self.is_closed() {
            return Err(Error::ScopeClosed(self.name.clone()));
        }
        debug!(scope = %self.name, bundle = %bundle.identity(), "Registered bundle");
        bundles.push(bundle);
        Ok(())
    }

    /// Tear down every registered bundle, newest first. Only the first call
    /// does any work.
    pub async fn close(&self) -> Result<(), TeardownError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.teardown().await
    }

    async fn teardown(&self) -> Result<(), TeardownError> {
        let bundles = std::mem::take(&mut *self.lock());
        if bundles.is_empty() {
            debug!(scope = %self.name, "Closing empty scope");
            return Ok(());
        }
        info!(
            scope = %self.name,
            kind = %self.kind,
            bundles = bundles.len(),
            opened_at = %self.opened_at,
            "Tearing down scope"
        );

        let mut failures = Vec::new();
        for bundle in bundles.iter().rev() {
            if let Err(e) = bundle.cleanup().await {
                warn!(scope = %self.name, bundle = %bundle.identity(), error = %e, "Bundle cleanup failed");
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let err = TeardownError {
                scope: self.name.clone(),
                failures,
            };
            for leaked in err.leaked() {
                error!(
                    scope = %self.name,
                    kind = %leaked.kind(),
                    namespace = leaked.namespace().unwrap_or(""),
                    name = leaked.name(),
                    "Resource left behind after teardown"
                );
            }
            Err(err)
        }
    }
}

impl fmt::Debug for LifecycleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleScope")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("bundles", &self.identities())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for LifecycleScope {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) || self.is_empty() {
            return;
        }

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                warn!(scope = %self.name, "Scope dropped without close(), tearing down synchronously");
                tokio::task::block_in_place(|| {
                    handle.block_on(async {
                        if let Err(e) = self.teardown().await {
                            error!(scope = %self.name, error = %e, "Teardown on drop failed");
                        }
                    });
                });
            }
            _ => {
                // No way to run async cleanup here; leave an actionable trail
                for identity in self.identities() {
                    error!(
                        scope = %self.name,
                        bundle = %identity,
                        "Scope dropped without close() outside a multi-threaded runtime, bundle leaked"
                    );
                }
            }
        }
    }
}

/// Outcome of a scoped test body, with teardown reported separately.
#[derive(Debug)]
pub struct ScopeReport<T> {
    pub outcome: T,
    pub teardown: Result<(), TeardownError>,
}

impl<T> ScopeReport<T> {
    pub fn teardown_failed(&self) -> bool {
        self.teardown.is_err()
    }
}

impl<U> ScopeReport<Result<U>> {
    /// Collapse into one result. A failed body wins; otherwise a failed
    /// teardown turns a passing body into an error.
    pub fn into_result(self) -> Result<U> {
        match (self.outcome, self.teardown) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(teardown)) => Err(teardown.into()),
            (Ok(value), Ok(())) => Ok(value),
        }
    }
}

/// Run `body` inside a fresh scope and close the scope on every exit path.
///
/// If `body` panics, the scope is torn down first and the panic is resumed.
pub async fn scoped<T, F, Fut>(kind: ScopeKind, name: &str, body: F) -> ScopeReport<T>
where
    F: FnOnce(Arc<LifecycleScope>) -> Fut,
    Fut: Future<Output = T>,
{
    let scope = Arc::new(LifecycleScope::new(kind, name));
    let outcome = AssertUnwindSafe(body(Arc::clone(&scope)))
        .catch_unwind()
        .await;
    let teardown = scope.close().await;

    match outcome {
        Ok(outcome) => ScopeReport { outcome, teardown },
        Err(panic) => {
            if let Err(e) = &teardown {
                error!(scope = name, error = %e, "Teardown after panic failed");
            }
            std::panic::resume_unwind(panic)
        }
    }
}
