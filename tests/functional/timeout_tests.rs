//! Bounded waits, run under paused Tokio time so multi-minute timeouts
//! complete instantly.

use std::time::Duration;

use odh_test_fixtures::error::{Error, ProvisioningCause};
use odh_test_fixtures::fixtures::{DatabaseConfig, RegistryConfig};
use odh_test_fixtures::lifecycle::{BundlePhase, Cleanup, LifecycleScope};
use odh_test_fixtures::platform::ResourceKind;
use odh_test_fixtures::wait::Timeouts;

use crate::common::{TEST_NS, factory, kinds, platform};

fn production_timeouts() -> Timeouts {
    Timeouts::default()
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_reports_last_status() {
    let platform = platform();
    platform.never_ready(ResourceKind::Deployment);
    let factory = factory(&platform).with_timeouts(production_timeouts());
    let scope = LifecycleScope::function("never-ready");
    let config = DatabaseConfig::builder(TEST_NS).build().unwrap();

    let err = factory.create(&scope, &config).await.unwrap_err();

    let failed = err.as_provisioning().unwrap();
    assert!(failed.is_timeout());
    assert!(matches!(failed.cause, ProvisioningCause::Timeout(after) if after == Duration::from_secs(300)));
    assert_eq!(failed.resource.kind(), ResourceKind::Deployment);
    assert!(failed.last_status.is_some());
    assert!(failed.cleanup_attempted);
    assert_eq!(
        kinds(&platform.deleted()),
        vec![
            ResourceKind::Deployment,
            ResourceKind::PersistentVolumeClaim,
            ResourceKind::Secret,
        ]
    );
    assert_eq!(platform.len(), 1);
}

/// A registry whose database never comes up fails on the database step and
/// never creates the ModelRegistry.
#[tokio::test(start_paused = true)]
async fn test_registry_fails_on_database_timeout() {
    let platform = platform();
    platform.never_ready(ResourceKind::PersistentVolumeClaim);
    let factory = factory(&platform).with_timeouts(production_timeouts());
    let scope = LifecycleScope::function("db-never-ready");
    let config = RegistryConfig::builder(TEST_NS).build().unwrap();

    let err = factory.create(&scope, &config).await.unwrap_err();

    let failed = err.as_provisioning().unwrap();
    assert_eq!(failed.resource.kind(), ResourceKind::PersistentVolumeClaim);
    assert!(failed.is_timeout());
    assert!(!kinds(&platform.created()).contains(&ResourceKind::ModelRegistry));
    assert_eq!(platform.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_resource_within_timeout_succeeds() {
    let platform = platform();
    platform.ready_after_polls(ResourceKind::ModelRegistry, 30);
    let factory = factory(&platform).with_timeouts(production_timeouts());
    let scope = LifecycleScope::function("slow-registry");
    let config = RegistryConfig::builder(TEST_NS).build().unwrap();

    let bundle = factory.create(&scope, &config).await.unwrap();
    assert_eq!(bundle.phase(), BundlePhase::Ready);

    scope.close().await.unwrap();
}

/// No Service from the operator means no endpoints, which fails the bundle.
#[tokio::test(start_paused = true)]
async fn test_missing_operator_service_fails_discovery() {
    let platform = platform();
    platform.disable_operator_services();
    let factory = factory(&platform).with_timeouts(production_timeouts());
    let scope = LifecycleScope::function("no-service");
    let config = RegistryConfig::builder(TEST_NS).build().unwrap();

    let err = factory.create(&scope, &config).await.unwrap_err();

    let failed = err.as_provisioning().unwrap();
    assert_eq!(failed.resource.kind(), ResourceKind::Service);
    assert!(matches!(failed.cause, ProvisioningCause::ServiceDiscovery(_)));
    assert!(failed.last_status.as_deref().is_some_and(|s| s.contains("no Service matches")));
    assert!(failed.cleanup_attempted);
    assert_eq!(platform.len(), 1, "registry and database must be rolled back");
}

/// A finalizer that never completes turns into a teardown failure instead
/// of hanging the suite.
#[tokio::test(start_paused = true)]
async fn test_stuck_deletion_times_out() {
    let platform = platform();
    platform.stuck_deletes_of(ResourceKind::Namespace);
    let factory = factory(&platform).with_timeouts(production_timeouts());
    let scope = LifecycleScope::function("stuck");
    let bundle = factory.create_namespace(&scope, "finalizer").await.unwrap();

    let err = scope.close().await.unwrap_err();

    let leaked: Vec<_> = err.leaked().cloned().collect();
    assert_eq!(leaked, vec![bundle.handle().clone()]);
    assert!(err.failures[0].failures[0].reason.contains("deletion not confirmed"));
    assert_eq!(
        bundle.phase(),
        BundlePhase::Failed {
            cleanup_attempted: true
        }
    );
    assert!(matches!(Error::from(err), Error::Teardown(_)));
}
