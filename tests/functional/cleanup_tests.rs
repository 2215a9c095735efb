//! Bundle teardown: ordering, idempotency and failure aggregation.

use serde_json::json;

use odh_test_fixtures::error::{ConfigurationError, Error, ProvisioningCause};
use odh_test_fixtures::fixtures::{DatabaseConfig, ManifestConfig, RegistryConfig};
use odh_test_fixtures::lifecycle::{BundlePhase, Cleanup, LifecycleScope};
use odh_test_fixtures::platform::ResourceKind;

use crate::common::{TEST_NS, factory, kinds, platform};

/// Registry first so its operator-owned Service goes with it, then the
/// database in reverse creation order.
#[tokio::test]
async fn test_registry_cleanup_runs_in_reverse() {
    let platform = platform();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("reverse");
    let config = RegistryConfig::builder(TEST_NS).build().unwrap();
    let bundle = factory.create(&scope, &config).await.unwrap();
    let database = bundle.database().unwrap().clone();

    scope.close().await.unwrap();

    let deleted = platform.deleted();
    assert_eq!(
        kinds(&deleted),
        vec![
            ResourceKind::ModelRegistry,
            ResourceKind::Service,
            ResourceKind::Deployment,
            ResourceKind::PersistentVolumeClaim,
            ResourceKind::Secret,
        ]
    );
    assert_eq!(&deleted[1], database.service(), "operator Service must cascade, not be deleted");
    assert!(!platform.contains(bundle.service()));
    assert_eq!(bundle.phase(), BundlePhase::Released);
    assert_eq!(database.phase(), BundlePhase::Released);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let platform = platform();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("idempotent");
    let config = DatabaseConfig::builder(TEST_NS).build().unwrap();
    let bundle = factory.create(&scope, &config).await.unwrap();

    bundle.cleanup().await.unwrap();
    let calls = platform.journal().len();
    bundle.cleanup().await.unwrap();
    scope.close().await.unwrap();

    assert_eq!(platform.journal().len(), calls);
    assert_eq!(bundle.phase(), BundlePhase::Released);
}

/// One stuck PVC does not stop the other deletions, and is reported.
#[tokio::test]
async fn test_cleanup_failures_are_aggregated() {
    let platform = platform();
    platform.fail_deletes_of(ResourceKind::PersistentVolumeClaim, "forbidden");
    let factory = factory(&platform);
    let scope = LifecycleScope::function("aggregate");
    let config = DatabaseConfig::builder(TEST_NS).build().unwrap();
    let bundle = factory.create(&scope, &config).await.unwrap();

    let err = bundle.cleanup().await.unwrap_err();

    assert_eq!(err.failures.len(), 1);
    assert_eq!(&err.failures[0].resource, bundle.pvc());
    assert!(err.failures[0].reason.contains("forbidden"));
    assert!(!platform.contains(bundle.secret()));
    assert!(!platform.contains(bundle.deployment()));
    assert!(!platform.contains(bundle.service()));
    assert!(platform.contains(bundle.pvc()));
    assert_eq!(
        bundle.phase(),
        BundlePhase::Failed {
            cleanup_attempted: true
        }
    );

    // Failed bundles are not retried by the scope
    scope.close().await.unwrap();
}

/// Without garbage collection the operator's Service is deleted explicitly
/// once the grace period runs out.
#[tokio::test]
async fn test_dependent_outliving_owner_is_deleted() {
    let platform = platform();
    platform.disable_cascade();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("no-cascade");
    let config = RegistryConfig::builder(TEST_NS).build().unwrap();
    let bundle = factory.create(&scope, &config).await.unwrap();

    scope.close().await.unwrap();

    let deleted = platform.deleted();
    assert_eq!(deleted[0], *bundle.registry());
    assert_eq!(deleted[1], *bundle.service());
    assert!(!platform.contains(bundle.service()));
    assert_eq!(platform.len(), 1);
}

/// Without garbage collection every object of an operator-generated
/// database is deleted explicitly, after the registry.
#[tokio::test]
async fn test_generated_database_outliving_registry_is_deleted() {
    let platform = platform();
    platform.disable_cascade();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("no-cascade-operator-db");
    let config = RegistryConfig::builder(TEST_NS)
        .operator_database()
        .build()
        .unwrap();
    let bundle = factory.create(&scope, &config).await.unwrap();
    assert_eq!(platform.len(), 7);

    scope.close().await.unwrap();

    let deleted = platform.deleted();
    assert_eq!(deleted[0], *bundle.registry());
    assert_eq!(
        kinds(&deleted[1..]),
        vec![
            ResourceKind::Secret,
            ResourceKind::PersistentVolumeClaim,
            ResourceKind::Deployment,
            ResourceKind::Service,
            ResourceKind::Service,
        ]
    );
    assert_eq!(deleted.last(), Some(bundle.service()));
    assert_eq!(platform.len(), 1);
}

#[tokio::test]
async fn test_already_deleted_resource_is_not_an_error() {
    let platform = platform();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("already-gone");
    let config = ManifestConfig::builder(ResourceKind::Secret, json!({"stringData": {"k": "v"}}))
        .namespace(TEST_NS)
        .name_prefix("token")
        .build()
        .unwrap();
    let bundle = factory.create(&scope, &config).await.unwrap();

    platform.remove(bundle.handle()).unwrap();

    bundle.cleanup().await.unwrap();
    assert_eq!(bundle.phase(), BundlePhase::Released);
    scope.close().await.unwrap();
}

/// A rejected step removes what the bundle had already created.
#[tokio::test]
async fn test_failed_step_triggers_partial_cleanup() {
    let platform = platform();
    platform.reject_creates_of(ResourceKind::Deployment, "exceeded quota");
    let factory = factory(&platform);
    let scope = LifecycleScope::function("partial");
    let config = DatabaseConfig::builder(TEST_NS).build().unwrap();

    let err = factory.create(&scope, &config).await.unwrap_err();

    let failed = err.as_provisioning().unwrap();
    assert_eq!(failed.resource.kind(), ResourceKind::Deployment);
    assert!(matches!(&failed.cause, ProvisioningCause::Rejected(reason) if reason == "exceeded quota"));
    assert!(failed.cleanup_attempted);
    assert!(failed.cleanup_error.is_none());
    assert_eq!(
        kinds(&platform.deleted()),
        vec![ResourceKind::PersistentVolumeClaim, ResourceKind::Secret]
    );
    assert_eq!(platform.len(), 1);
    assert!(scope.is_empty());
}

/// When partial cleanup itself fails the error says what was left.
#[tokio::test]
async fn test_partial_cleanup_failure_is_reported() {
    let platform = platform();
    platform.reject_creates_of(ResourceKind::Deployment, "exceeded quota");
    platform.fail_deletes_of(ResourceKind::Secret, "forbidden");
    let factory = factory(&platform);
    let scope = LifecycleScope::function("partial-leak");
    let config = DatabaseConfig::builder(TEST_NS).build().unwrap();

    let err = factory.create(&scope, &config).await.unwrap_err();

    let failed = err.as_provisioning().unwrap();
    assert!(failed.cleanup_attempted);
    let leaked: Vec<_> = failed
        .cleanup_error
        .as_ref()
        .expect("cleanup error recorded")
        .resources()
        .map(|r| r.kind())
        .collect();
    assert_eq!(leaked, vec![ResourceKind::Secret]);
    assert!(err.to_string().contains("partial cleanup incomplete"));
}

/// Whichever of the five registry steps is rejected, nothing but the
/// seeded namespace survives.
#[tokio::test]
async fn test_failure_at_each_registry_step_leaves_nothing() {
    let steps = [
        ResourceKind::Secret,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::ModelRegistry,
    ];
    for (index, kind) in steps.into_iter().enumerate() {
        let platform = platform();
        platform.reject_create_at(index, "denied");
        let factory = factory(&platform);
        let scope = LifecycleScope::function("each-step");
        let config = RegistryConfig::builder(TEST_NS).build().unwrap();

        let err = factory.create(&scope, &config).await.unwrap_err();

        let failed = err.as_provisioning().unwrap();
        assert_eq!(failed.resource.kind(), kind, "step {index}");
        assert!(matches!(failed.cause, ProvisioningCause::Rejected(_)));
        assert_eq!(failed.cleanup_attempted, index > 0, "step {index}");
        assert!(failed.cleanup_error.is_none(), "step {index}");
        assert_eq!(platform.len(), 1, "step {index} left resources behind");
        assert!(scope.is_empty());
    }
}

/// A name whose objects could not be rolled back stays claimed.
#[tokio::test]
async fn test_leaked_name_stays_claimed_after_failed_rollback() {
    let platform = platform();
    platform.reject_creates_of(ResourceKind::Deployment, "exceeded quota");
    platform.fail_deletes_of(ResourceKind::Secret, "forbidden");
    let factory = factory(&platform);
    let scope = LifecycleScope::function("leaked-name");
    let config = DatabaseConfig::builder(TEST_NS)
        .exact_name("leaky-db")
        .build()
        .unwrap();

    let first = factory.create(&scope, &config).await.unwrap_err();
    assert!(first.as_provisioning().unwrap().cleanup_error.is_some());
    assert!(factory.context().names().is_claimed(Some(TEST_NS), "leaky-db"));
    let creates = platform.created().len();

    let second = factory.create(&scope, &config).await.unwrap_err();

    assert!(
        matches!(
            &second,
            Error::Configuration(ConfigurationError::NameInUse { name, .. }) if name == "leaky-db"
        ),
        "got {second}"
    );
    assert_eq!(platform.created().len(), creates);
}

/// A clean rollback gives the name back.
#[tokio::test]
async fn test_name_released_after_clean_rollback() {
    let platform = platform();
    platform.reject_creates_of(ResourceKind::Deployment, "exceeded quota");
    let factory = factory(&platform);
    let scope = LifecycleScope::function("released-name");
    let config = DatabaseConfig::builder(TEST_NS)
        .exact_name("retry-db")
        .build()
        .unwrap();

    factory.create(&scope, &config).await.unwrap_err();

    assert!(!factory.context().names().is_claimed(Some(TEST_NS), "retry-db"));
}
