// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for odh-test-fixtures.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

mod crd_tests {
    use odh_test_fixtures::crd::{
        Condition, DataScienceCluster, DscComponent, ManagementState, find_condition,
    };
    use serde_json::json;

    #[test]
    fn test_condition_describe() {
        let condition = Condition::new("Available", false, "DeploymentUnavailable", "0/1 pods ready");
        assert!(!condition.is_true());
        assert_eq!(
            condition.describe(),
            "Available=False (DeploymentUnavailable: 0/1 pods ready)"
        );
    }

    #[test]
    fn test_find_condition() {
        let conditions = vec![
            Condition::new("Available", true, "Ready", ""),
            Condition::new("OAuthProxyAvailable", false, "Pending", ""),
        ];
        assert!(find_condition(&conditions, "Available").unwrap().is_true());
        assert!(!find_condition(&conditions, "OAuthProxyAvailable").unwrap().is_true());
        assert!(find_condition(&conditions, "IstioAvailable").is_none());
    }

    #[test]
    fn test_management_state_parse() {
        assert_eq!("Managed".parse::<ManagementState>().unwrap(), ManagementState::Managed);
        assert_eq!("Removed".parse::<ManagementState>().unwrap(), ManagementState::Removed);
        assert!("managed".parse::<ManagementState>().is_err());
        assert_eq!(ManagementState::Unmanaged.to_string(), "Unmanaged");
    }

    #[test]
    fn test_component_keys_round_trip() {
        for component in DscComponent::ALL {
            assert_eq!(DscComponent::from_key(component.key()), Some(component));
        }
        assert!(DscComponent::ModelRegistry.owns_registries_namespace());
        assert!(!DscComponent::Kserve.owns_registries_namespace());
    }

    #[test]
    fn test_dsc_accessors() {
        let dsc: DataScienceCluster = serde_json::from_value(json!({
            "apiVersion": "datasciencecluster.opendatahub.io/v1",
            "kind": "DataScienceCluster",
            "metadata": {"name": "default-dsc"},
            "spec": {"components": {
                "modelregistry": {"managementState": "Managed", "registriesNamespace": "rhoai-model-registries"},
                "kserve": {"managementState": "Removed"}
            }},
            "status": {"phase": "Ready", "conditions": [
                {"type": "ModelRegistryReady", "status": "True"}
            ]}
        }))
        .unwrap();

        assert_eq!(
            dsc.management_state(DscComponent::ModelRegistry),
            Some(ManagementState::Managed)
        );
        assert_eq!(
            dsc.management_state(DscComponent::Kserve),
            Some(ManagementState::Removed)
        );
        assert_eq!(dsc.management_state(DscComponent::Dashboard), None);
        assert_eq!(dsc.registries_namespace(), Some("rhoai-model-registries"));
        assert_eq!(dsc.phase(), Some("Ready"));
        assert!(dsc.condition("ModelRegistryReady").unwrap().is_true());
    }
}

mod readiness_tests {
    use kube::api::DynamicObject;
    use odh_test_fixtures::platform::{Readiness, ResourceKind};
    use serde_json::{Value, json};

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_deployment_waits_for_replicas() {
        let deployment = object(json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": "db", "namespace": "ns", "generation": 1},
            "spec": {"replicas": 1},
            "status": {"observedGeneration": 1, "readyReplicas": 0}
        }));
        assert_eq!(
            ResourceKind::Deployment.readiness(&deployment),
            Readiness::Pending("0/1 replicas ready".to_string())
        );
    }

    #[test]
    fn test_deployment_progress_deadline_is_terminal() {
        let deployment = object(json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": "db", "namespace": "ns"},
            "status": {"conditions": [{
                "type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded"
            }]}
        }));
        assert!(matches!(
            ResourceKind::Deployment.readiness(&deployment),
            Readiness::Failed(_)
        ));
    }

    #[test]
    fn test_pvc_pending_counts_as_ready() {
        let pvc = object(json!({
            "apiVersion": "v1", "kind": "PersistentVolumeClaim",
            "metadata": {"name": "db", "namespace": "ns"},
            "status": {"phase": "Pending"}
        }));
        assert!(ResourceKind::PersistentVolumeClaim.readiness(&pvc).is_ready());
    }

    #[test]
    fn test_registry_needs_auth_condition() {
        let registry = object(json!({
            "apiVersion": "modelregistry.opendatahub.io/v1alpha1", "kind": "ModelRegistry",
            "metadata": {"name": "mr", "namespace": "ns"},
            "spec": {"oauthProxy": {"port": 8443, "routePort": 443, "serviceRoute": "enabled"}},
            "status": {"conditions": [{"type": "Available", "status": "True"}]}
        }));
        assert!(matches!(
            ResourceKind::ModelRegistry.readiness(&registry),
            Readiness::Pending(_)
        ));
    }

    #[test]
    fn test_secret_ready_on_existence() {
        let secret = object(json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "db", "namespace": "ns"}
        }));
        assert!(ResourceKind::Secret.readiness(&secret).is_ready());
    }
}

mod state_machine_tests {
    use odh_test_fixtures::lifecycle::state_machine::BundleStateMachine;
    use odh_test_fixtures::lifecycle::{BundleEvent, BundlePhase, Lifecycle};

    #[test]
    fn test_valid_events_from_ready() {
        let sm = BundleStateMachine::new();
        assert_eq!(sm.valid_events(BundlePhase::Ready), vec![BundleEvent::TeardownStarted]);
    }

    #[test]
    fn test_failed_provisioning_cannot_be_torn_down() {
        let sm = BundleStateMachine::new();
        for cleanup_attempted in [true, false] {
            assert!(!sm.can_transition(
                BundlePhase::Failed { cleanup_attempted },
                BundleEvent::TeardownStarted
            ));
        }
    }

    #[test]
    fn test_released_is_terminal() {
        let sm = BundleStateMachine::new();
        assert!(sm.valid_events(BundlePhase::Released).is_empty());
    }

    #[test]
    fn test_second_teardown_is_refused() {
        let lifecycle = Lifecycle::new("bundle");
        lifecycle.fire(BundleEvent::ProvisioningStarted).unwrap();
        lifecycle.fire(BundleEvent::ResourcesReady).unwrap();

        assert!(lifecycle.begin_teardown());
        assert!(!lifecycle.begin_teardown());
        assert_eq!(lifecycle.finish_teardown(&Ok(())), BundlePhase::Released);
        assert!(!lifecycle.begin_teardown());
    }
}

mod label_tests {
    use std::collections::BTreeMap;

    use odh_test_fixtures::resources::common::{
        MANAGED_BY_LABEL, MANAGED_BY_VALUE, RUN_ID_LABEL,
    };
    use odh_test_fixtures::resources::{label_selector, managed_selector, standard_labels};

    #[test]
    fn test_managed_selector() {
        assert_eq!(
            managed_selector(None),
            format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
        );
        assert_eq!(
            managed_selector(Some("abc")),
            format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE},{RUN_ID_LABEL}=abc")
        );
    }

    #[test]
    fn test_label_selector_is_sorted() {
        let labels = BTreeMap::from([
            ("component".to_string(), "model-registry".to_string()),
            ("app".to_string(), "mr".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "app=mr,component=model-registry");
    }

    #[test]
    fn test_standard_labels_keep_extras() {
        let extra = BTreeMap::from([("team".to_string(), "qe".to_string())]);
        let labels = standard_labels("mr", "model-registry", "run-1", &extra);
        assert_eq!(labels.get("team").map(String::as_str), Some("qe"));
        assert_eq!(labels.get(RUN_ID_LABEL).map(String::as_str), Some("run-1"));
    }
}

mod config_tests {
    use odh_test_fixtures::crd::{DscComponent, ManagementState};
    use odh_test_fixtures::error::ConfigurationError;
    use odh_test_fixtures::fixtures::{
        AuthMode, ComponentPatchConfig, DatabaseConfig, ManifestConfig, NamespaceConfig,
        RegistryConfig,
    };
    use odh_test_fixtures::platform::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_namespace_prefix_leaves_room_for_suffix() {
        let long = "a".repeat(55);
        assert!(NamespaceConfig::builder(long).build().is_err());
        assert!(NamespaceConfig::builder("a".repeat(54)).build().is_ok());
        assert!(
            NamespaceConfig::builder("x")
                .exact_name("a".repeat(63))
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_database_rejects_bad_storage() {
        for size in ["0Gi", "5 Gi", "lots"] {
            assert!(
                DatabaseConfig::builder("ns").storage_size(size).build().is_err(),
                "{size} accepted"
            );
        }
    }

    #[test]
    fn test_service_mesh_registry() {
        let config = RegistryConfig::builder("ns")
            .auth(AuthMode::ServiceMesh {
                auth_provider: "odh-auth".to_string(),
            })
            .build()
            .unwrap();
        assert!(matches!(config.auth(), AuthMode::ServiceMesh { auth_provider } if auth_provider == "odh-auth"));
    }

    #[test]
    fn test_cluster_scoped_manifest_rejects_namespace() {
        let err = ManifestConfig::builder(ResourceKind::Namespace, json!({}))
            .exact_name("ns")
            .namespace("other")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidName { field: "namespace", .. }));
    }

    #[test]
    fn test_manifest_kind_must_match() {
        let err = ManifestConfig::builder(
            ResourceKind::InferenceService,
            json!({"kind": "LLMInferenceService", "metadata": {"name": "m", "namespace": "ns"}}),
        )
        .build()
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidName { field: "kind", .. }));
    }

    #[test]
    fn test_registries_namespace_only_for_model_registry() {
        let err = ComponentPatchConfig::builder(DscComponent::Kserve, ManagementState::Managed)
            .registries_namespace("ns")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidName {
                field: "registries_namespace",
                ..
            }
        ));
    }
}

mod settings_tests {
    use config::{File, FileFormat};
    use odh_test_fixtures::settings::Settings;

    fn from_yaml(yaml: &str) -> Result<Settings, config::ConfigError> {
        Settings::from_builder(
            config::Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)),
        )
    }

    #[test]
    fn test_yaml_settings() {
        let settings = from_yaml(
            "model_registry_namespace: odh-model-registries\n\
             teardown_resources: false\n\
             probe:\n  token: secret\n  insecure_tls: false\n",
        )
        .unwrap();

        assert_eq!(settings.model_registry_namespace, "odh-model-registries");
        assert!(!settings.teardown_resources);
        assert_eq!(settings.probe.token.as_deref(), Some("secret"));
        assert!(!settings.probe.insecure_tls);
        assert_eq!(settings.applications_namespace, "redhat-ods-applications");
    }

    #[test]
    fn test_zero_readiness_rejected() {
        assert!(from_yaml("timeouts:\n  readiness_secs: 0\n").is_err());
    }
}
