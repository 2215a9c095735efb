//! ModelRegistry manifest generation.

use std::collections::BTreeMap;

use crate::crd::{
    GrpcSpec, IstioSpec, ModelRegistry, ModelRegistrySpec, MysqlConfig, PostgresConfig, RestSpec,
};
use crate::fixtures::{AuthMode, RegistryConfig};

/// Value of `app.kubernetes.io/component` on registry objects.
pub const REGISTRY_COMPONENT: &str = "model-registry";

/// Generate the ModelRegistry custom resource for `config`, backed by `mysql`.
///
/// Without a MySQL connection the operator is asked to generate its own
/// PostgreSQL database.
pub fn generate_model_registry(
    config: &RegistryConfig,
    mysql: Option<MysqlConfig>,
    labels: &BTreeMap<String, String>,
) -> ModelRegistry {
    let postgres = mysql.is_none().then(PostgresConfig::generated);
    let (oauth_proxy, istio) = match config.auth() {
        AuthMode::OAuthProxy(proxy) => (Some(proxy.clone()), None),
        AuthMode::ServiceMesh { auth_provider } => (
            None,
            Some(IstioSpec {
                auth_provider: auth_provider.clone(),
                gateway: None,
            }),
        ),
    };

    let mut registry = ModelRegistry::new(
        config.name(),
        ModelRegistrySpec {
            rest: RestSpec {
                port: Some(config.rest_port()),
                image: None,
            },
            grpc: GrpcSpec {
                port: Some(config.grpc_port()),
                image: None,
            },
            mysql,
            postgres,
            oauth_proxy,
            istio,
        },
    );
    registry.metadata.namespace = Some(config.namespace().to_string());
    registry.metadata.labels = Some(labels.clone());
    registry
}
