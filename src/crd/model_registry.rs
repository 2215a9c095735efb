//! ModelRegistry custom resource, as served by the ODH model registry operator.
//!
//! Only the fields the fixtures set or read are modelled; the operator fills
//! in the rest with its own defaults.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::{Condition, find_condition};

/// ModelRegistry is an instance of the model registry server.
///
/// Example:
/// ```yaml
/// apiVersion: modelregistry.opendatahub.io/v1alpha1
/// kind: ModelRegistry
/// metadata:
///   name: model-registry
///   namespace: rhoai-model-registries
/// spec:
///   rest: {}
///   grpc: {}
///   oauthProxy:
///     port: 8443
///     routePort: 443
///     serviceRoute: enabled
///   mysql:
///     host: mr-db.rhoai-model-registries.svc.cluster.local
///     port: 3306
///     database: model_registry
///     username: mlmduser
///     passwordSecret:
///       name: mr-db
///       key: database-password
///     skipDBCreation: false
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "modelregistry.opendatahub.io",
    version = "v1alpha1",
    kind = "ModelRegistry",
    plural = "modelregistries",
    shortname = "mr",
    status = "ModelRegistryStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistrySpec {
    #[serde(default)]
    pub rest: RestSpec,
    #[serde(default)]
    pub grpc: GrpcSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MysqlConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_proxy: Option<OAuthProxySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio: Option<IstioSpec>,
}

/// REST server settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// gRPC server settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Connection settings for the MySQL metadata store.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MysqlConfig {
    pub host: String,
    pub port: i32,
    pub database: String,
    pub username: String,
    pub password_secret: SecretKeyRef,
    #[serde(rename = "skipDBCreation", default)]
    pub skip_db_creation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_root_certificate_config_map: Option<ConfigMapKeyRef>,
}

/// Operator-managed PostgreSQL metadata store.
///
/// With `generateDeployment` set the operator creates the database itself
/// and owns every object it creates for it; see [`default_database_names`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_deployment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl PostgresConfig {
    pub fn generated() -> Self {
        Self {
            generate_deployment: Some(true),
            database: None,
        }
    }
}

/// Names of the objects the operator creates for a registry's generated
/// PostgreSQL database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultDatabaseNames {
    /// Secret holding the generated credentials
    pub credentials: String,
    /// Deployment and Service of the database server
    pub server: String,
    /// PersistentVolumeClaim backing the data directory
    pub storage: String,
}

pub fn default_database_names(registry: &str) -> DefaultDatabaseNames {
    DefaultDatabaseNames {
        credentials: format!("{registry}-postgres-credentials"),
        server: format!("{registry}-postgres"),
        storage: format!("{registry}-postgres-storage"),
    }
}

/// Reference to one key of a Secret.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Reference to one key of a ConfigMap.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ConfigMapKeyRef {
    pub name: String,
    pub key: String,
}

/// OAuth proxy sidecar in front of the REST server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuthProxySpec {
    pub port: i32,
    pub route_port: i32,
    /// "enabled" or "disabled"
    pub service_route: String,
}

impl Default for OAuthProxySpec {
    fn default() -> Self {
        Self {
            port: 8443,
            route_port: 443,
            service_route: "enabled".to_string(),
        }
    }
}

/// Service mesh integration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IstioSpec {
    pub auth_provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IstioGatewaySpec>,
}

/// Ingress gateway exposing the registry outside the mesh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IstioGatewaySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Status reported by the operator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistryStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

/// Annotation on the operator-created Service carrying the external REST address.
pub const REST_ADDRESS_ANNOTATION: &str = "routing.opendatahub.io/external-address-rest";
/// Annotation on the operator-created Service carrying the external gRPC address.
pub const GRPC_ADDRESS_ANNOTATION: &str = "routing.opendatahub.io/external-address-grpc";

/// Condition types the operator reports on a ModelRegistry.
pub mod conditions {
    pub const AVAILABLE: &str = "Available";
    pub const OAUTH_PROXY_AVAILABLE: &str = "OAuthProxyAvailable";
    pub const ISTIO_AVAILABLE: &str = "IstioAvailable";
    pub const GATEWAY_AVAILABLE: &str = "GatewayAvailable";
}

impl ModelRegistry {
    /// Conditions that must be `True` before the instance is usable.
    ///
    /// `Available` always, plus the condition of whichever auth front end
    /// the spec enables.
    pub fn required_conditions(&self) -> Vec<&'static str> {
        let mut required = vec![conditions::AVAILABLE];
        if self.spec.oauth_proxy.is_some() {
            required.push(conditions::OAUTH_PROXY_AVAILABLE);
        }
        if self.spec.istio.is_some() {
            required.push(conditions::ISTIO_AVAILABLE);
        }
        required
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, condition_type))
    }
}
