//! MySQL database fixture backing a model registry.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use super::NameStrategy;
use super::validation::{MAX_NAME_LEN, StorageSize, dns_label, port, required};
use crate::crd::{ConfigMapKeyRef, MysqlConfig, SecretKeyRef};
use crate::error::{CleanupError, ConfigurationError, Result};
use crate::factory::{Blueprint, ProvisionContext, Provisioned, Provisioning};
use crate::lifecycle::{BundlePhase, Cleanup};
use crate::platform::{ResourceHandle, ResourceKind};
use crate::resources::database::{
    DATABASE_PASSWORD_KEY, DB_COMPONENT, generate_deployment, generate_pvc, generate_secret,
    generate_service,
};

/// Pinned MySQL image used unless overridden.
pub const DEFAULT_MYSQL_IMAGE: &str = "public.ecr.aws/docker/library/mysql@sha256:9de9d54fecee6253130e65154b930978b1fcc336bcc86dfd06e89b72a2588ebe";
pub const DEFAULT_DB_NAME_PREFIX: &str = "mr-db";

/// PersistentVolumeClaim access mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessMode {
    #[default]
    ReadWriteOnce,
    ReadWriteOncePod,
    ReadWriteMany,
    ReadOnlyMany,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side TLS for the database.
///
/// The server certificate Secret must hold `ca.crt`, `tls.crt` and
/// `tls.key`; the CA ConfigMap is handed to the registry so it can verify
/// the server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseTls {
    server_cert_secret: String,
    ca_config_map: String,
    ca_key: String,
}

impl DatabaseTls {
    pub fn new(server_cert_secret: impl Into<String>, ca_config_map: impl Into<String>) -> Self {
        Self {
            server_cert_secret: server_cert_secret.into(),
            ca_config_map: ca_config_map.into(),
            ca_key: "ca.crt".to_string(),
        }
    }

    pub fn with_ca_key(mut self, key: impl Into<String>) -> Self {
        self.ca_key = key.into();
        self
    }

    pub fn server_cert_secret(&self) -> &str {
        &self.server_cert_secret
    }

    pub fn ca_config_map(&self) -> &str {
        &self.ca_config_map
    }

    pub fn ca_key(&self) -> &str {
        &self.ca_key
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        dns_label("tls.server_cert_secret", &self.server_cert_secret, MAX_NAME_LEN)?;
        dns_label("tls.ca_config_map", &self.ca_config_map, MAX_NAME_LEN)?;
        required("tls.ca_key", &self.ca_key)
    }
}

/// Validated description of one MySQL database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    name: NameStrategy,
    namespace: String,
    teardown: bool,
    image: String,
    storage_size: StorageSize,
    access_mode: AccessMode,
    database_name: String,
    database_user: String,
    database_password: String,
    port: i32,
    tls: Option<DatabaseTls>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl DatabaseConfig {
    pub fn builder(namespace: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(namespace)
    }

    pub fn name(&self) -> &NameStrategy {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn storage_size(&self) -> &StorageSize {
        &self.storage_size
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn database_user(&self) -> &str {
        &self.database_user
    }

    pub fn database_password(&self) -> &str {
        &self.database_password
    }

    pub fn port(&self) -> i32 {
        self.port
    }

    pub fn tls(&self) -> Option<&DatabaseTls> {
        self.tls.as_ref()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// Copy placed in another namespace, re-validated.
    pub fn in_namespace(&self, namespace: &str) -> Result<Self, ConfigurationError> {
        let mut copy = self.clone();
        copy.namespace = namespace.to_string();
        copy.validate()?;
        Ok(copy)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.name.validate("name")?;
        dns_label("namespace", &self.namespace, MAX_NAME_LEN)?;
        required("image", &self.image)?;
        required("database_name", &self.database_name)?;
        required("database_user", &self.database_user)?;
        required("database_password", &self.database_password)?;
        port("port", self.port)?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }

    async fn apply_all(&self, run: &mut Provisioning<'_>, name: &str) -> Result<()> {
        let labels = run.context().labels(name, DB_COMPONENT, &self.labels);
        run.apply_ready(ResourceKind::Secret, &generate_secret(self, name, &labels))
            .await?;
        run.apply_ready(
            ResourceKind::PersistentVolumeClaim,
            &generate_pvc(self, name, &labels),
        )
        .await?;
        run.apply_ready(
            ResourceKind::Deployment,
            &generate_deployment(self, name, &labels),
        )
        .await?;
        run.apply_ready(ResourceKind::Service, &generate_service(self, name, &labels))
            .await?;
        Ok(())
    }
}

/// Builder for [`DatabaseConfig`]; every field but the namespace has a default.
#[derive(Clone, Debug)]
pub struct DatabaseConfigBuilder {
    name: NameStrategy,
    namespace: String,
    teardown: bool,
    image: String,
    storage_size: String,
    access_mode: AccessMode,
    database_name: String,
    database_user: String,
    database_password: String,
    port: i32,
    tls: Option<DatabaseTls>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl DatabaseConfigBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            name: NameStrategy::Prefix(DEFAULT_DB_NAME_PREFIX.to_string()),
            namespace: namespace.into(),
            teardown: true,
            image: DEFAULT_MYSQL_IMAGE.to_string(),
            storage_size: StorageSize::default().to_string(),
            access_mode: AccessMode::default(),
            database_name: "model_registry".to_string(),
            database_user: "mlmduser".to_string(),
            database_password: "TheBlurstOfTimes".to_string(),
            port: 3306,
            tls: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Objects are named `{prefix}-{8 hex}`.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name = NameStrategy::Prefix(prefix.into());
        self
    }

    pub fn exact_name(mut self, name: impl Into<String>) -> Self {
        self.name = NameStrategy::Exact(name.into());
        self
    }

    pub fn teardown(mut self, teardown: bool) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Kubernetes quantity, e.g. `5Gi`. Parsed in [`build`](Self::build).
    pub fn storage_size(mut self, size: impl Into<String>) -> Self {
        self.storage_size = size.into();
        self
    }

    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    pub fn database_user(mut self, user: impl Into<String>) -> Self {
        self.database_user = user.into();
        self
    }

    pub fn database_password(mut self, password: impl Into<String>) -> Self {
        self.database_password = password.into();
        self
    }

    pub fn port(mut self, port: i32) -> Self {
        self.port = port;
        self
    }

    pub fn tls(mut self, tls: DatabaseTls) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<DatabaseConfig, ConfigurationError> {
        let config = DatabaseConfig {
            storage_size: self.storage_size.parse()?,
            name: self.name,
            namespace: self.namespace,
            teardown: self.teardown,
            image: self.image,
            access_mode: self.access_mode,
            database_name: self.database_name,
            database_user: self.database_user,
            database_password: self.database_password,
            port: self.port,
            tls: self.tls,
            labels: self.labels,
            annotations: self.annotations,
        };
        config.validate()?;
        Ok(config)
    }
}

#[async_trait]
impl Blueprint for DatabaseConfig {
    type Bundle = DatabaseBundle;

    fn describe(&self) -> String {
        format!("MySQL database {}/{}", self.namespace, self.name)
    }

    fn teardown(&self) -> bool {
        self.teardown
    }

    fn with_name_prefix(&self, prefix: &str) -> Result<Self, ConfigurationError> {
        let mut copy = self.clone();
        copy.name = match &self.name {
            NameStrategy::Prefix(_) => NameStrategy::Prefix(prefix.to_string()),
            NameStrategy::Exact(_) => NameStrategy::Exact(prefix.to_string()),
        };
        copy.validate()?;
        Ok(copy)
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<DatabaseBundle> {
        let lease = ctx.claim(Some(&self.namespace), &self.name)?;
        let name = lease.name().to_string();
        let mut run = Provisioning::begin(
            ctx,
            format!("DatabaseBundle {}/{name}", self.namespace),
            Some(lease),
        );
        if let Err(e) = self.apply_all(&mut run, &name).await {
            return Err(run.abort(e).await);
        }

        let handle = |kind| ResourceHandle::namespaced(kind, &self.namespace, &name);
        Ok(DatabaseBundle {
            secret: handle(ResourceKind::Secret),
            pvc: handle(ResourceKind::PersistentVolumeClaim),
            deployment: handle(ResourceKind::Deployment),
            service: handle(ResourceKind::Service),
            config: self.clone(),
            core: run.finish(),
            name,
        })
    }
}

/// A ready MySQL database.
#[derive(Debug)]
pub struct DatabaseBundle {
    name: String,
    config: DatabaseConfig,
    secret: ResourceHandle,
    pvc: ResourceHandle,
    deployment: ResourceHandle,
    service: ResourceHandle,
    core: Provisioned,
}

impl DatabaseBundle {
    /// Name shared by all four objects.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        self.config.namespace()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn secret(&self) -> &ResourceHandle {
        &self.secret
    }

    pub fn pvc(&self) -> &ResourceHandle {
        &self.pvc
    }

    pub fn deployment(&self) -> &ResourceHandle {
        &self.deployment
    }

    pub fn service(&self) -> &ResourceHandle {
        &self.service
    }

    /// In-cluster DNS name of the database Service.
    pub fn host(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name, self.namespace())
    }

    pub fn port(&self) -> i32 {
        self.config.port()
    }

    /// The `spec.mysql` block a ModelRegistry needs to use this database.
    pub fn mysql_config(&self) -> MysqlConfig {
        MysqlConfig {
            host: self.host(),
            port: self.config.port(),
            database: self.config.database_name().to_string(),
            username: self.config.database_user().to_string(),
            password_secret: SecretKeyRef {
                name: self.name.clone(),
                key: DATABASE_PASSWORD_KEY.to_string(),
            },
            skip_db_creation: false,
            ssl_root_certificate_config_map: self.config.tls().map(|tls| ConfigMapKeyRef {
                name: tls.ca_config_map().to_string(),
                key: tls.ca_key().to_string(),
            }),
        }
    }
}

#[async_trait]
impl Cleanup for DatabaseBundle {
    fn identity(&self) -> String {
        self.core.identity().to_string()
    }

    fn phase(&self) -> BundlePhase {
        self.core.phase()
    }

    async fn cleanup(&self) -> Result<(), CleanupError> {
        self.core.teardown(self.core.owned().release()).await
    }
}
