//! ModelRegistry fixture.
//!
//! Provisioning order: database bundle (unless an external or
//! operator-generated database is used), ModelRegistry CR, then discovery
//! of the Service the operator creates for it. The Service, like the objects
//! of an operator-generated database, is owned by the ModelRegistry and is
//! expected to disappear with it; teardown verifies that and removes them
//! explicitly if the platform did not.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{debug, info};

use super::validation::{MAX_NAME_LEN, MAX_PREFIX_LEN, dns_label, port, required};
use super::{DatabaseBundle, DatabaseConfig, NameStrategy};
use crate::crd::{
    GRPC_ADDRESS_ANNOTATION, MysqlConfig, OAuthProxySpec, REST_ADDRESS_ANNOTATION,
    default_database_names,
};
use crate::error::{
    CleanupError, ConfigurationError, ProvisioningCause, ProvisioningError, Result,
};
use crate::factory::{Blueprint, ProvisionContext, Provisioned, Provisioning};
use crate::lifecycle::{BundlePhase, Cleanup};
use crate::platform::{ResourceHandle, ResourceKind};
use crate::resources::label_selector;
use crate::resources::registry::{REGISTRY_COMPONENT, generate_model_registry};
use crate::wait::{Observation, WaitError, poll_until};

pub const DEFAULT_REGISTRY_NAME: &str = "model-registry";

/// REST collection of registered models, relative to the REST endpoint.
pub const REGISTERED_MODELS_PATH: &str = "/api/model_registry/v1alpha3/registered_models";

/// How clients authenticate to the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// OAuth proxy sidecar with its own Route
    OAuthProxy(OAuthProxySpec),
    /// Service mesh with an external authorization provider
    ServiceMesh { auth_provider: String },
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::OAuthProxy(OAuthProxySpec::default())
    }
}

/// Where the registry's metadata store comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseSource {
    /// Provision a database owned by the registry bundle
    Provision(DatabaseConfig),
    /// Use an existing database; never deleted by the bundle
    External(MysqlConfig),
    /// Let the operator generate a PostgreSQL database it owns
    OperatorDefault,
}

/// Validated description of one ModelRegistry instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    name: String,
    namespace: String,
    auth: AuthMode,
    teardown: bool,
    rest_port: i32,
    grpc_port: i32,
    database: DatabaseSource,
    labels: BTreeMap<String, String>,
    wait_for_conditions: bool,
}

impl RegistryConfig {
    pub fn builder(namespace: impl Into<String>) -> RegistryConfigBuilder {
        RegistryConfigBuilder::new(namespace)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn auth(&self) -> &AuthMode {
        &self.auth
    }

    pub fn rest_port(&self) -> i32 {
        self.rest_port
    }

    pub fn grpc_port(&self) -> i32 {
        self.grpc_port
    }

    pub fn database(&self) -> &DatabaseSource {
        &self.database
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn wait_for_conditions(&self) -> bool {
        self.wait_for_conditions
    }

    /// Same registry with another auth front end.
    pub fn with_auth(&self, auth: AuthMode) -> Result<Self, ConfigurationError> {
        let mut copy = self.clone();
        copy.auth = auth;
        copy.validate()?;
        Ok(copy)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        dns_label("name", &self.name, MAX_NAME_LEN)?;
        dns_label("namespace", &self.namespace, MAX_NAME_LEN)?;
        port("rest_port", self.rest_port)?;
        port("grpc_port", self.grpc_port)?;
        if self.rest_port == self.grpc_port {
            return Err(ConfigurationError::OutOfRange {
                field: "grpc_port",
                value: self.grpc_port.to_string(),
                reason: "must differ from rest_port".to_string(),
            });
        }
        match &self.auth {
            AuthMode::OAuthProxy(proxy) => {
                port("oauth_proxy.port", proxy.port)?;
                port("oauth_proxy.route_port", proxy.route_port)?;
            }
            AuthMode::ServiceMesh { auth_provider } => {
                required("auth_provider", auth_provider)?;
            }
        }
        if let DatabaseSource::External(mysql) = &self.database {
            required("mysql.host", &mysql.host)?;
            port("mysql.port", mysql.port)?;
            required("mysql.database", &mysql.database)?;
            required("mysql.username", &mysql.username)?;
            dns_label("mysql.password_secret", &mysql.password_secret.name, MAX_NAME_LEN)?;
        }
        Ok(())
    }

    async fn apply_all(&self, run: &mut Provisioning<'_>) -> Result<RegistryParts> {
        let ctx = run.context();
        let (database, mysql) = match &self.database {
            DatabaseSource::Provision(config) => {
                let bundle = Arc::new(config.provision(ctx).await?);
                let mysql = bundle.mysql_config();
                run.adopt_child(Arc::clone(&bundle) as Arc<dyn Cleanup>);
                (Some(bundle), Some(mysql))
            }
            DatabaseSource::External(mysql) => {
                debug!(host = %mysql.host, "Using external database");
                (None, Some(mysql.clone()))
            }
            DatabaseSource::OperatorDefault => {
                debug!("Using operator-generated database");
                (None, None)
            }
        };

        let labels = run
            .context()
            .labels(&self.name, REGISTRY_COMPONENT, &self.labels);
        let manifest = generate_model_registry(self, mysql.clone(), &labels);
        let created = run.apply(ResourceKind::ModelRegistry, &manifest).await?;
        let registry = ResourceHandle::for_object(ResourceKind::ModelRegistry, &created)?;
        if self.wait_for_conditions {
            run.await_ready(&registry).await?;
        } else {
            debug!(resource = %registry, "Not waiting for registry conditions");
        }
        if matches!(self.database, DatabaseSource::OperatorDefault) {
            self.track_default_database(run).await?;
        }

        let service = self.discover_service(run).await?;
        let service_handle = ResourceHandle::for_object(ResourceKind::Service, &service)?;
        run.expect_cascade(service_handle.clone());

        let annotation = |key: &str| {
            service
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(key))
                .cloned()
        };
        let in_cluster = |port: i32| {
            format!(
                "{}.{}.svc.cluster.local:{port}",
                service_handle.name(),
                self.namespace
            )
        };
        let rest_address =
            annotation(REST_ADDRESS_ANNOTATION).unwrap_or_else(|| in_cluster(self.rest_port));
        let grpc_address =
            annotation(GRPC_ADDRESS_ANNOTATION).unwrap_or_else(|| in_cluster(self.grpc_port));

        Ok(RegistryParts {
            registry,
            service: service_handle,
            database,
            mysql,
            rest_address,
            grpc_address,
        })
    }

    /// Handles of the objects the operator creates for a generated database.
    pub fn default_database_objects(&self) -> Vec<ResourceHandle> {
        let names = default_database_names(&self.name);
        let ns = self.namespace.as_str();
        vec![
            ResourceHandle::namespaced(ResourceKind::Secret, ns, &names.credentials),
            ResourceHandle::namespaced(ResourceKind::PersistentVolumeClaim, ns, &names.storage),
            ResourceHandle::namespaced(ResourceKind::Deployment, ns, &names.server),
            ResourceHandle::namespaced(ResourceKind::Service, ns, &names.server),
        ]
    }

    /// Expect the generated database to go away with the registry, and wait
    /// for it to come up unless conditions are skipped.
    async fn track_default_database(&self, run: &mut Provisioning<'_>) -> Result<()> {
        let objects = self.default_database_objects();
        for handle in &objects {
            run.expect_cascade(handle.clone());
        }
        if self.wait_for_conditions {
            for handle in &objects {
                run.await_ready(handle).await?;
            }
        }
        Ok(())
    }

    /// Wait for the single Service labelled `app={name},component=model-registry`.
    async fn discover_service(&self, run: &Provisioning<'_>) -> Result<DynamicObject> {
        let ctx = run.context();
        let platform = ctx.platform().as_ref();
        let timeouts = ctx.timeouts();
        let selector = label_selector(&BTreeMap::from([
            ("app".to_string(), self.name.clone()),
            ("component".to_string(), REGISTRY_COMPONENT.to_string()),
        ]));
        let selector = selector.as_str();
        let namespace = self.namespace.as_str();

        let found = poll_until(timeouts.readiness, timeouts.poll_interval, move || async move {
            let mut services = platform
                .list(ResourceKind::Service, Some(namespace), selector)
                .await?;
            Ok(match services.len() {
                0 => Observation::Pending(format!("no Service matches {selector}")),
                1 => match services.pop() {
                    Some(service) => Observation::Done(service),
                    None => Observation::Pending("Service list changed".to_string()),
                },
                n => Observation::Failed(format!("{n} Services match {selector}")),
            })
        })
        .await;

        found.map_err(|e| {
            let expected = ResourceHandle::namespaced(ResourceKind::Service, &self.namespace, &self.name);
            let last_status = e.last_status().map(str::to_string);
            let cause = match e {
                WaitError::Platform(p) => ProvisioningCause::Platform(p),
                other => ProvisioningCause::ServiceDiscovery(other.to_string()),
            };
            ProvisioningError::new(expected, cause)
                .with_last_status(last_status)
                .into()
        })
    }
}

struct RegistryParts {
    registry: ResourceHandle,
    service: ResourceHandle,
    database: Option<Arc<DatabaseBundle>>,
    mysql: Option<MysqlConfig>,
    rest_address: String,
    grpc_address: String,
}

/// Builder for [`RegistryConfig`].
#[derive(Clone, Debug)]
pub struct RegistryConfigBuilder {
    name: String,
    namespace: String,
    auth: AuthMode,
    teardown: bool,
    rest_port: i32,
    grpc_port: i32,
    database: Option<DatabaseSource>,
    labels: BTreeMap<String, String>,
    wait_for_conditions: bool,
}

impl RegistryConfigBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_REGISTRY_NAME.to_string(),
            namespace: namespace.into(),
            auth: AuthMode::default(),
            teardown: true,
            rest_port: 8080,
            grpc_port: 9090,
            database: None,
            labels: BTreeMap::new(),
            wait_for_conditions: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn teardown(mut self, teardown: bool) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn rest_port(mut self, port: i32) -> Self {
        self.rest_port = port;
        self
    }

    pub fn grpc_port(mut self, port: i32) -> Self {
        self.grpc_port = port;
        self
    }

    /// Provision this database as part of the registry bundle.
    pub fn database(mut self, config: DatabaseConfig) -> Self {
        self.database = Some(DatabaseSource::Provision(config));
        self
    }

    /// Point the registry at a database the bundle does not own.
    pub fn external_database(mut self, mysql: MysqlConfig) -> Self {
        self.database = Some(DatabaseSource::External(mysql));
        self
    }

    /// Have the operator generate the database; it is deleted with the
    /// registry.
    pub fn operator_database(mut self) -> Self {
        self.database = Some(DatabaseSource::OperatorDefault);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn wait_for_conditions(mut self, wait: bool) -> Self {
        self.wait_for_conditions = wait;
        self
    }

    /// Validate. Without an explicit database source, a default database is
    /// provisioned next to the registry.
    pub fn build(self) -> Result<RegistryConfig, ConfigurationError> {
        let database = match self.database {
            Some(source) => source,
            None => DatabaseSource::Provision(
                DatabaseConfig::builder(self.namespace.clone())
                    .teardown(self.teardown)
                    .build()?,
            ),
        };
        let config = RegistryConfig {
            name: self.name,
            namespace: self.namespace,
            auth: self.auth,
            teardown: self.teardown,
            rest_port: self.rest_port,
            grpc_port: self.grpc_port,
            database,
            labels: self.labels,
            wait_for_conditions: self.wait_for_conditions,
        };
        config.validate()?;
        Ok(config)
    }
}

#[async_trait]
impl Blueprint for RegistryConfig {
    type Bundle = RegistryBundle;

    fn describe(&self) -> String {
        format!("ModelRegistry {}/{}", self.namespace, self.name)
    }

    fn teardown(&self) -> bool {
        self.teardown
    }

    /// The registry is named `prefix`; a provisioned database gets the
    /// prefix `{prefix}-db`.
    fn with_name_prefix(&self, prefix: &str) -> Result<Self, ConfigurationError> {
        let mut copy = self.clone();
        copy.name = prefix.to_string();
        if let DatabaseSource::Provision(db) = &self.database {
            let db_prefix = format!("{prefix}-db");
            dns_label("database.name", &db_prefix, MAX_PREFIX_LEN)?;
            copy.database = DatabaseSource::Provision(db.with_name_prefix(&db_prefix)?);
        }
        copy.validate()?;
        Ok(copy)
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<RegistryBundle> {
        let lease = ctx.claim(Some(&self.namespace), &NameStrategy::Exact(self.name.clone()))?;
        let mut run = Provisioning::begin(
            ctx,
            format!("RegistryBundle {}/{}", self.namespace, self.name),
            Some(lease),
        );
        let parts = match self.apply_all(&mut run).await {
            Ok(parts) => parts,
            Err(e) => return Err(run.abort(e).await),
        };
        info!(
            registry = %parts.registry,
            rest = %parts.rest_address,
            grpc = %parts.grpc_address,
            "Model registry reachable"
        );

        Ok(RegistryBundle {
            config: self.clone(),
            registry: parts.registry,
            service: parts.service,
            database: parts.database,
            mysql: parts.mysql,
            rest_address: parts.rest_address,
            grpc_address: parts.grpc_address,
            core: run.finish(),
        })
    }
}

/// A ready ModelRegistry, plus the database it owns (if any).
#[derive(Debug)]
pub struct RegistryBundle {
    config: RegistryConfig,
    registry: ResourceHandle,
    service: ResourceHandle,
    database: Option<Arc<DatabaseBundle>>,
    mysql: Option<MysqlConfig>,
    rest_address: String,
    grpc_address: String,
    core: Provisioned,
}

impl RegistryBundle {
    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn namespace(&self) -> &str {
        self.config.namespace()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceHandle {
        &self.registry
    }

    /// The operator-created Service.
    pub fn service(&self) -> &ResourceHandle {
        &self.service
    }

    /// The owned database, `None` when an external one is referenced.
    pub fn database(&self) -> Option<&Arc<DatabaseBundle>> {
        self.database.as_ref()
    }

    /// MySQL connection of the registry, `None` when the operator generated
    /// the database.
    pub fn mysql_config(&self) -> Option<&MysqlConfig> {
        self.mysql.as_ref()
    }

    /// `https://{external REST address}`
    pub fn rest_endpoint(&self) -> String {
        format!("https://{}", self.rest_address)
    }

    /// `{host}:{port}` of the gRPC server
    pub fn grpc_endpoint(&self) -> &str {
        &self.grpc_address
    }

    pub fn registered_models_url(&self) -> String {
        format!("{}{REGISTERED_MODELS_PATH}", self.rest_endpoint())
    }
}

#[async_trait]
impl Cleanup for RegistryBundle {
    fn identity(&self) -> String {
        self.core.identity().to_string()
    }

    fn phase(&self) -> BundlePhase {
        self.core.phase()
    }

    /// Registry first (its Service must follow), then the database.
    async fn cleanup(&self) -> Result<(), CleanupError> {
        self.core
            .teardown(async {
                let mut failures = CleanupError::default();
                failures.absorb(self.core.owned().release().await);
                if let Some(database) = &self.database {
                    failures.absorb(database.cleanup().await);
                }
                failures.into_result()
            })
            .await
    }
}
