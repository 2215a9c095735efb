//! Error types for fixture provisioning and teardown.
//!
//! Failures are split by the phase they belong to: invalid input is a
//! [`ConfigurationError`] and never reaches the platform, resources that do
//! not become usable produce a [`ProvisioningError`], and teardown problems
//! are collected into a [`CleanupError`] (per bundle) or a [`TeardownError`]
//! (per scope) so they can be reported next to the test's own result.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::platform::ResourceHandle;

/// Invalid configuration, raised before any platform call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required field is missing or empty
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// A numeric or quantity field is outside its accepted range
    #[error("Field {field} out of range ({value}): {reason}")]
    OutOfRange {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// A name is not a valid Kubernetes object name
    #[error("Invalid name for {field} ({value:?}): {reason}")]
    InvalidName {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Another active bundle already claimed the derived name
    #[error("Name {name:?} in namespace {namespace:?} is already claimed by an active bundle")]
    NameInUse { namespace: String, name: String },

    /// `create_many` was asked for zero bundles
    #[error("Batch size must be at least 1")]
    EmptyBatch,
}

/// Errors reported by a [`Platform`](crate::platform::Platform).
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Kubernetes API error that was not classified further
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The object already exists
    #[error("{0} already exists")]
    AlreadyExists(ResourceHandle),

    /// The object does not exist
    #[error("{0} not found")]
    NotFound(ResourceHandle),

    /// The platform refused the spec (validation, quota, admission)
    #[error("{resource} rejected: {reason}")]
    Rejected {
        resource: ResourceHandle,
        reason: String,
    },

    /// Error that is expected to clear up on retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// The object could not be built or decoded
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlatformError {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            PlatformError::NotFound(_) => true,
            PlatformError::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    /// Check if this error should be retried by a polling loop
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            PlatformError::Transient(_) => true,
            PlatformError::AlreadyExists(_)
            | PlatformError::NotFound(_)
            | PlatformError::Rejected { .. }
            | PlatformError::InvalidObject(_)
            | PlatformError::Serialization(_) => false,
        }
    }
}

/// Why a provisioning step failed.
#[derive(Debug)]
pub enum ProvisioningCause {
    /// The resource did not become ready within the readiness timeout
    Timeout(Duration),
    /// The platform refused the resource spec
    Rejected(String),
    /// The resource reported a terminal failure while waiting
    Failed(String),
    /// The resource disappeared while we were waiting for it
    Deleted,
    /// The name is taken on the platform and the factory does not adopt
    Conflict,
    /// The operator never exposed the expected Service or endpoint
    ServiceDiscovery(String),
    /// Any other platform error
    Platform(PlatformError),
}

impl fmt::Display for ProvisioningCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningCause::Timeout(after) => write!(f, "not ready after {after:?}"),
            ProvisioningCause::Rejected(reason) => write!(f, "rejected by the platform: {reason}"),
            ProvisioningCause::Failed(reason) => write!(f, "failed: {reason}"),
            ProvisioningCause::Deleted => write!(f, "deleted while waiting for readiness"),
            ProvisioningCause::Conflict => write!(f, "already exists"),
            ProvisioningCause::ServiceDiscovery(reason) => {
                write!(f, "service discovery failed: {reason}")
            }
            ProvisioningCause::Platform(e) => write!(f, "{e}"),
        }
    }
}

/// A resource failed to reach a usable state.
///
/// Carries the identity of the failing step, the last status observed before
/// giving up, and the outcome of the partial cleanup the factory ran before
/// returning the error.
#[derive(Debug)]
pub struct ProvisioningError {
    pub resource: ResourceHandle,
    pub cause: ProvisioningCause,
    pub last_status: Option<String>,
    pub cleanup_attempted: bool,
    pub cleanup_error: Option<CleanupError>,
    /// Position inside a `create_many` batch, when the failure came from one
    pub batch_index: Option<usize>,
}

impl ProvisioningError {
    pub fn new(resource: ResourceHandle, cause: ProvisioningCause) -> Self {
        Self {
            resource,
            cause,
            last_status: None,
            cleanup_attempted: false,
            cleanup_error: None,
            batch_index: None,
        }
    }

    pub fn with_last_status(mut self, status: Option<String>) -> Self {
        self.last_status = status;
        self
    }

    /// Whether the failing step ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, ProvisioningCause::Timeout(_))
    }

    /// Merge the outcome of a cleanup run into this error.
    pub fn record_cleanup(&mut self, outcome: Result<(), CleanupError>) {
        self.cleanup_attempted = true;
        if let Err(failures) = outcome {
            match self.cleanup_error.as_mut() {
                Some(existing) => existing.extend(failures),
                None => self.cleanup_error = Some(failures),
            }
        }
    }
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to provision {}: {}", self.resource, self.cause)?;
        if let Some(status) = &self.last_status {
            write!(f, "; last status: {status}")?;
        }
        if let Some(index) = self.batch_index {
            write!(f, "; batch index {index}")?;
        }
        match (&self.cleanup_error, self.cleanup_attempted) {
            (Some(cleanup), _) => write!(f, "; partial cleanup incomplete: {cleanup}"),
            (None, true) => write!(f, "; partially created resources were removed"),
            (None, false) => Ok(()),
        }
    }
}

impl std::error::Error for ProvisioningError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            ProvisioningCause::Platform(e) => Some(e),
            _ => None,
        }
    }
}

/// One resource that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub resource: ResourceHandle,
    pub reason: String,
}

impl CleanupFailure {
    pub fn new(resource: ResourceHandle, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.reason)
    }
}

/// Aggregate of every deletion that failed during one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupError {
    pub failures: Vec<CleanupFailure>,
}

impl fmt::Display for CleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cleanup failed for {} resource(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CleanupError {}

impl CleanupError {
    pub fn push(&mut self, failure: CleanupFailure) {
        self.failures.push(failure);
    }

    pub fn extend(&mut self, other: CleanupError) {
        self.failures.extend(other.failures);
    }

    /// Fold the result of a nested cleanup into this aggregate.
    pub fn absorb(&mut self, outcome: Result<(), CleanupError>) {
        if let Err(other) = outcome {
            self.extend(other);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Handles of every resource that could not be removed
    pub fn resources(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.failures.iter().map(|f| &f.resource)
    }

    pub fn into_result(self) -> Result<(), CleanupError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Scope-level teardown failure, reported separately from the test outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Teardown of scope {scope:?} failed for {} bundle(s)", .failures.len())]
pub struct TeardownError {
    pub scope: String,
    pub failures: Vec<CleanupError>,
}

impl TeardownError {
    /// Every resource left behind, across all bundles of the scope
    pub fn leaked(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.failures.iter().flat_map(CleanupError::resources)
    }
}

/// Top-level error type for factory and scope operations
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Provisioning(Box<ProvisioningError>),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Registration attempted on a scope that already tore down
    #[error("Scope {0:?} is already closed")]
    ScopeClosed(String),
}

impl From<ProvisioningError> for Error {
    fn from(e: ProvisioningError) -> Self {
        Error::Provisioning(Box::new(e))
    }
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    pub fn as_provisioning(&self) -> Option<&ProvisioningError> {
        match self {
            Error::Provisioning(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for factory operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
