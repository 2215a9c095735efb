//! DataScienceCluster component patches and their restore at scope exit.

use serde_json::json;

use odh_test_fixtures::crd::{DscComponent, ManagementState};
use odh_test_fixtures::error::{ConfigurationError, Error, ProvisioningCause};
use odh_test_fixtures::fixtures::ComponentPatchConfig;
use odh_test_fixtures::lifecycle::LifecycleScope;
use odh_test_fixtures::platform::{ResourceHandle, ResourceKind, Verb};

use crate::common::{dsc_object, factory, namespace_object, platform};

const REGISTRIES_NS: &str = "rhoai-model-registries";

fn dsc_handle() -> ResourceHandle {
    ResourceHandle::cluster_scoped(ResourceKind::DataScienceCluster, "default-dsc")
}

fn registries_ns() -> ResourceHandle {
    ResourceHandle::cluster_scoped(ResourceKind::Namespace, REGISTRIES_NS)
}

fn enable_model_registry() -> ComponentPatchConfig {
    ComponentPatchConfig::builder(DscComponent::ModelRegistry, ManagementState::Managed)
        .registries_namespace(REGISTRIES_NS)
        .build()
        .unwrap()
}

fn component_block(platform: &odh_test_fixtures::InMemoryPlatform, key: &str) -> serde_json::Value {
    let dsc = platform.object(&dsc_handle()).expect("DataScienceCluster present");
    dsc.data
        .pointer(&format!("/spec/components/{key}"))
        .cloned()
        .unwrap_or(serde_json::Value::Null)
}

fn patches(platform: &odh_test_fixtures::InMemoryPlatform) -> usize {
    platform
        .journal()
        .iter()
        .filter(|op| op.verb == Verb::Patch)
        .count()
}

/// Enabling the registry makes the operator create the registries
/// namespace; restore puts the block back and removes that namespace.
#[tokio::test]
async fn test_enable_model_registry_and_restore() {
    let platform = platform();
    platform
        .insert(
            ResourceKind::DataScienceCluster,
            dsc_object(json!({"modelregistry": {"managementState": "Removed"}})),
        )
        .unwrap();
    let factory = factory(&platform);
    let scope = LifecycleScope::class("enable-mr");

    let bundle = factory
        .patch_component(&scope, &enable_model_registry())
        .await
        .unwrap();

    assert_eq!(bundle.original_state(), Some(ManagementState::Removed));
    assert_eq!(bundle.created_namespace(), Some(&registries_ns()));
    assert!(bundle.applied_patch().is_some());
    assert!(platform.contains(&registries_ns()));
    assert_eq!(
        component_block(&platform, "modelregistry"),
        json!({"managementState": "Managed", "registriesNamespace": REGISTRIES_NS})
    );

    scope.close().await.unwrap();

    assert_eq!(
        component_block(&platform, "modelregistry"),
        json!({"managementState": "Removed"})
    );
    assert!(!platform.contains(&registries_ns()));
    assert!(platform.contains(&dsc_handle()), "the DataScienceCluster is never deleted");
}

#[tokio::test]
async fn test_component_already_in_desired_state_is_not_patched() {
    let platform = platform();
    platform
        .insert(
            ResourceKind::DataScienceCluster,
            dsc_object(json!({
                "modelregistry": {"managementState": "Managed", "registriesNamespace": REGISTRIES_NS}
            })),
        )
        .unwrap();
    platform
        .insert(ResourceKind::Namespace, namespace_object(REGISTRIES_NS))
        .unwrap();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("noop-patch");

    let bundle = factory
        .patch_component(&scope, &enable_model_registry())
        .await
        .unwrap();
    assert!(bundle.applied_patch().is_none());

    scope.close().await.unwrap();

    assert_eq!(patches(&platform), 0);
    assert!(platform.deleted().is_empty());
    assert!(platform.contains(&registries_ns()));
}

/// A namespace that existed before the patch belongs to someone else.
#[tokio::test]
async fn test_preexisting_registries_namespace_is_kept() {
    let platform = platform();
    platform
        .insert(
            ResourceKind::DataScienceCluster,
            dsc_object(json!({"modelregistry": {"managementState": "Removed"}})),
        )
        .unwrap();
    platform
        .insert(ResourceKind::Namespace, namespace_object(REGISTRIES_NS))
        .unwrap();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("keep-namespace");

    let bundle = factory
        .patch_component(&scope, &enable_model_registry())
        .await
        .unwrap();
    assert!(bundle.created_namespace().is_none());

    scope.close().await.unwrap();

    assert_eq!(patches(&platform), 2);
    assert!(platform.contains(&registries_ns()));
    assert_eq!(
        component_block(&platform, "modelregistry"),
        json!({"managementState": "Removed"})
    );
}

#[tokio::test]
async fn test_remove_component_and_restore() {
    let platform = platform();
    platform
        .insert(
            ResourceKind::DataScienceCluster,
            dsc_object(json!({"kserve": {"managementState": "Managed"}})),
        )
        .unwrap();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("remove-kserve");
    let config = ComponentPatchConfig::builder(DscComponent::Kserve, ManagementState::Removed)
        .build()
        .unwrap();

    factory.patch_component(&scope, &config).await.unwrap();
    assert_eq!(
        component_block(&platform, "kserve"),
        json!({"managementState": "Removed"})
    );

    scope.close().await.unwrap();
    assert_eq!(
        component_block(&platform, "kserve"),
        json!({"managementState": "Managed"})
    );
}

/// A component block the patch introduced is removed entirely on restore.
#[tokio::test]
async fn test_restore_removes_block_that_did_not_exist() {
    let platform = platform();
    platform
        .insert(ResourceKind::DataScienceCluster, dsc_object(json!({})))
        .unwrap();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("new-block");
    let config = ComponentPatchConfig::builder(DscComponent::TrustyAi, ManagementState::Managed)
        .build()
        .unwrap();

    let bundle = factory.patch_component(&scope, &config).await.unwrap();
    assert!(bundle.original().is_none());

    scope.close().await.unwrap();
    assert_eq!(component_block(&platform, "trustyai"), serde_json::Value::Null);
}

#[tokio::test]
async fn test_missing_dsc_is_a_provisioning_failure() {
    let platform = platform();
    let factory = factory(&platform);
    let scope = LifecycleScope::function("no-dsc");

    let err = factory
        .patch_component(&scope, &enable_model_registry())
        .await
        .unwrap_err();

    let failed = err.as_provisioning().unwrap();
    assert_eq!(failed.resource, dsc_handle());
    assert!(matches!(&failed.cause, ProvisioningCause::Failed(reason) if reason.contains("does not exist")));
    assert_eq!(patches(&platform), 0);
}

/// Two live patches of the same component would restore over each other.
#[tokio::test]
async fn test_concurrent_patch_of_same_component_refused() {
    let platform = platform();
    platform
        .insert(
            ResourceKind::DataScienceCluster,
            dsc_object(json!({"modelregistry": {"managementState": "Removed"}})),
        )
        .unwrap();
    let factory = factory(&platform);
    let scope = LifecycleScope::session("double-patch");

    factory
        .patch_component(&scope, &enable_model_registry())
        .await
        .unwrap();
    let err = factory
        .patch_component(&scope, &enable_model_registry())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Configuration(ConfigurationError::NameInUse { .. })
    ));
    scope.close().await.unwrap();
}
