//! odh-test-fixtures library crate
//!
//! Provisioning, lifecycle and teardown of the Kubernetes resources that
//! Open Data Hub end-to-end tests depend on: MySQL databases, ModelRegistry
//! instances, DataScienceCluster component toggles, namespaces and serving
//! manifests.
//!
//! The flow is Configuration -> [`Factory`] -> Bundle -> [`LifecycleScope`]:
//! a validated `*Config` is handed to the factory, which provisions a bundle
//! and registers it with a scope; closing the scope tears every bundle down
//! in reverse order.

pub mod crd;
pub mod error;
pub mod factory;
pub mod fixtures;
pub mod lifecycle;
pub mod platform;
pub mod probe;
pub mod resources;
pub mod settings;
pub mod sweep;
pub mod telemetry;
pub mod wait;

pub use error::{
    CleanupError, CleanupFailure, ConfigurationError, Error, PlatformError, ProvisioningCause,
    ProvisioningError, Result, TeardownError,
};
pub use factory::{Blueprint, ExistingPolicy, Factory, NameRegistry};
pub use lifecycle::{BundlePhase, Cleanup, LifecycleScope, ScopeKind, ScopeReport, scoped};
pub use platform::{InMemoryPlatform, KubePlatform, Platform, ResourceHandle, ResourceKind};
pub use probe::{ProbeClient, ProbeError};
pub use settings::Settings;
pub use wait::Timeouts;
