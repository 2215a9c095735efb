//! The resource factory.
//!
//! A [`Factory`] turns a validated configuration (any [`Blueprint`]) into a
//! ready bundle, binds the bundle's teardown to a [`LifecycleScope`], and
//! guarantees that a failed provisioning run leaves nothing behind.
//!
//! ## Naming
//!
//! Prefix-based names get a random 8-hex suffix. Exact names are claimed in
//! a process-wide [`NameRegistry`] so two active bundles can never share
//! one. Every created object is labelled with the factory's run id, which
//! is what the sweeper selects on.

mod names;
mod provisioning;

pub use names::{NameLease, NameRegistry, unique_suffix};
pub use provisioning::{Provisioned, Provisioning, wait_failure};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::{CleanupError, ConfigurationError, Error, Result};
use crate::fixtures::{
    AuthMode, ComponentPatchBundle, ComponentPatchConfig, NameStrategy, NamespaceBundle,
    NamespaceConfig, RegistryBundle, RegistryConfig,
};
use crate::lifecycle::{Cleanup, LifecycleScope};
use crate::platform::Platform;
use crate::resources::common::standard_labels;
use crate::settings::Settings;
use crate::wait::Timeouts;

/// What to do when an object with the derived name already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExistingPolicy {
    /// Fail the step with a `Conflict`
    #[default]
    Fail,
    /// Take over the live object and own it from now on
    Adopt,
}

/// Everything a [`Blueprint`] needs while provisioning.
#[derive(Clone)]
pub struct ProvisionContext {
    platform: Arc<dyn Platform>,
    timeouts: Timeouts,
    names: Arc<NameRegistry>,
    run_id: String,
    existing: ExistingPolicy,
    teardown_enabled: bool,
}

impl ProvisionContext {
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn names(&self) -> &Arc<NameRegistry> {
        &self.names
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn existing(&self) -> ExistingPolicy {
        self.existing
    }

    /// Whether bundles may be bound to a scope for teardown at all.
    pub fn teardown_enabled(&self) -> bool {
        self.teardown_enabled
    }

    /// Claim the name `strategy` derives in `namespace`.
    pub fn claim(
        &self,
        namespace: Option<&str>,
        strategy: &NameStrategy,
    ) -> Result<NameLease, ConfigurationError> {
        match strategy {
            NameStrategy::Prefix(prefix) => self.names.claim_generated(namespace, prefix),
            NameStrategy::Exact(name) => self.names.claim(namespace, name),
        }
    }

    /// Labels for an object created in this run.
    pub fn labels(
        &self,
        name: &str,
        component: &str,
        extra: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        standard_labels(name, component, &self.run_id, extra)
    }
}

impl std::fmt::Debug for ProvisionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionContext")
            .field("timeouts", &self.timeouts)
            .field("run_id", &self.run_id)
            .field("existing", &self.existing)
            .field("teardown_enabled", &self.teardown_enabled)
            .finish()
    }
}

/// A validated configuration the factory knows how to provision.
#[async_trait]
pub trait Blueprint: Clone + Send + Sync + 'static {
    type Bundle: Cleanup + 'static;

    /// Short description for logs, e.g. `ModelRegistry ns/model-registry`.
    fn describe(&self) -> String;

    /// Whether the bundle is torn down with its scope.
    fn teardown(&self) -> bool;

    /// Copy of this configuration whose names derive from `prefix`.
    fn with_name_prefix(&self, prefix: &str) -> Result<Self, ConfigurationError>;

    /// Create every resource and wait until the bundle is usable. On error,
    /// everything created so far has already been removed.
    async fn provision(&self, ctx: &ProvisionContext) -> Result<Self::Bundle>;
}

/// Creates bundles and binds them to lifecycle scopes.
#[derive(Clone, Debug)]
pub struct Factory {
    ctx: ProvisionContext,
}

impl Factory {
    /// Factory with default timeouts, the process-wide name registry and a
    /// fresh run id.
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            ctx: ProvisionContext {
                platform,
                timeouts: Timeouts::default(),
                names: NameRegistry::global(),
                run_id: unique_suffix(),
                existing: ExistingPolicy::default(),
                teardown_enabled: true,
            },
        }
    }

    /// Factory configured from [`Settings`]. Post-upgrade runs adopt the
    /// resources the pre-upgrade run left in place, and
    /// `teardown_resources = false` keeps every bundle past its scope.
    pub fn from_settings(platform: Arc<dyn Platform>, settings: &Settings) -> Self {
        let existing = if settings.post_upgrade {
            ExistingPolicy::Adopt
        } else {
            ExistingPolicy::Fail
        };
        let mut factory = Self::new(platform)
            .with_timeouts(settings.timeouts.to_timeouts())
            .with_existing_policy(existing)
            .with_teardown(settings.teardown_resources);
        if let Some(run_id) = &settings.run_id {
            factory = factory.with_run_id(run_id.clone());
        }
        factory
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.ctx.timeouts = timeouts;
        self
    }

    pub fn with_existing_policy(mut self, existing: ExistingPolicy) -> Self {
        self.ctx.existing = existing;
        self
    }

    /// Disable teardown for every bundle this factory creates, whatever
    /// the individual configurations ask for.
    pub fn with_teardown(mut self, enabled: bool) -> Self {
        self.ctx.teardown_enabled = enabled;
        self
    }

    pub fn with_name_registry(mut self, names: Arc<NameRegistry>) -> Self {
        self.ctx.names = names;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.ctx.run_id = run_id.into();
        self
    }

    pub fn context(&self) -> &ProvisionContext {
        &self.ctx
    }

    pub fn run_id(&self) -> &str {
        self.ctx.run_id()
    }

    /// Provision one bundle and, if its configuration asks for teardown,
    /// register it with `scope`.
    pub async fn create<B: Blueprint>(
        &self,
        scope: &LifecycleScope,
        config: &B,
    ) -> Result<Arc<B::Bundle>> {
        if scope.is_closed() {
            return Err(Error::ScopeClosed(scope.name().to_string()));
        }
        info!(scope = scope.name(), fixture = %config.describe(), "Creating fixture");
        let bundle = Arc::new(config.provision(&self.ctx).await?);
        self.bind(scope, self.teardown_for(config), std::slice::from_ref(&bundle))
            .await?;
        Ok(bundle)
    }

    /// Provision `count` bundles derived from `base`, named
    /// `{name_prefix}-0` .. `{name_prefix}-{count-1}`.
    ///
    /// All or nothing: every derived configuration is validated before the
    /// first platform call, and if any bundle fails, the ones already
    /// created are torn down before the error is returned.
    pub async fn create_many<B: Blueprint>(
        &self,
        scope: &LifecycleScope,
        count: usize,
        name_prefix: &str,
        base: &B,
    ) -> Result<Vec<Arc<B::Bundle>>> {
        if count == 0 {
            return Err(ConfigurationError::EmptyBatch.into());
        }
        if scope.is_closed() {
            return Err(Error::ScopeClosed(scope.name().to_string()));
        }
        let configs = (0..count)
            .map(|i| base.with_name_prefix(&format!("{name_prefix}-{i}")))
            .collect::<Result<Vec<_>, _>>()?;

        info!(scope = scope.name(), count, name_prefix, "Creating fixture batch");
        let mut created: Vec<Arc<B::Bundle>> = Vec::with_capacity(count);
        for (index, config) in configs.iter().enumerate() {
            match config.provision(&self.ctx).await {
                Ok(bundle) => created.push(Arc::new(bundle)),
                Err(e) => {
                    warn!(index, created = created.len(), error = %e, "Batch member failed, rolling back");
                    let rolled_back = if created.is_empty() {
                        None
                    } else {
                        Some(rollback(&created).await)
                    };
                    return Err(batch_failure(e, index, rolled_back));
                }
            }
        }

        self.bind(scope, self.teardown_for(base), &created).await?;
        Ok(created)
    }

    /// Registry with the OAuth proxy front end, whatever `config` asked for.
    pub async fn create_registry_with_oauth(
        &self,
        scope: &LifecycleScope,
        config: &RegistryConfig,
    ) -> Result<Arc<RegistryBundle>> {
        let config = config.with_auth(AuthMode::OAuthProxy(Default::default()))?;
        self.create(scope, &config).await
    }

    /// Registry behind the service mesh using `auth_provider`.
    pub async fn create_registry_with_service_mesh(
        &self,
        scope: &LifecycleScope,
        config: &RegistryConfig,
        auth_provider: &str,
    ) -> Result<Arc<RegistryBundle>> {
        let config = config.with_auth(AuthMode::ServiceMesh {
            auth_provider: auth_provider.to_string(),
        })?;
        self.create(scope, &config).await
    }

    /// Fresh namespace named `{prefix}-{8 hex}`.
    pub async fn create_namespace(
        &self,
        scope: &LifecycleScope,
        prefix: &str,
    ) -> Result<Arc<NamespaceBundle>> {
        let config = NamespaceConfig::builder(prefix).build()?;
        self.create(scope, &config).await
    }

    /// Patch a DataScienceCluster component, restoring it at scope exit.
    pub async fn patch_component(
        &self,
        scope: &LifecycleScope,
        config: &ComponentPatchConfig,
    ) -> Result<Arc<ComponentPatchBundle>> {
        self.create(scope, config).await
    }

    fn teardown_for<B: Blueprint>(&self, config: &B) -> bool {
        config.teardown() && self.ctx.teardown_enabled
    }

    async fn bind<T: Cleanup + 'static>(
        &self,
        scope: &LifecycleScope,
        teardown: bool,
        bundles: &[Arc<T>],
    ) -> Result<()> {
        if !teardown {
            for bundle in bundles {
                info!(
                    scope = scope.name(),
                    bundle = %bundle.identity(),
                    "Teardown disabled, bundle will outlive its scope"
                );
            }
            return Ok(());
        }
        for (i, bundle) in bundles.iter().enumerate() {
            let tracked: Arc<dyn Cleanup> = Arc::clone(bundle) as Arc<dyn Cleanup>;
            if let Err(e) = scope.register(tracked) {
                // The scope closed while we were provisioning; nobody else
                // will clean up the remaining bundles.
                let remaining = bundles.get(i..).unwrap_or_default();
                if let Err(cleanup) = rollback(remaining).await {
                    error!(scope = scope.name(), error = %cleanup, "Cleanup after late registration failed");
                }
                return Err(e);
            }
        }
        debug!(scope = scope.name(), count = bundles.len(), "Bound bundles to scope");
        Ok(())
    }
}

/// Clean up `bundles` newest first.
async fn rollback<T: Cleanup>(bundles: &[Arc<T>]) -> Result<(), CleanupError> {
    let mut failures = CleanupError::default();
    for bundle in bundles.iter().rev() {
        failures.absorb(bundle.cleanup().await);
    }
    failures.into_result()
}

fn batch_failure(
    err: Error,
    index: usize,
    rolled_back: Option<Result<(), CleanupError>>,
) -> Error {
    match err {
        Error::Provisioning(mut failed) => {
            failed.batch_index = Some(index);
            if let Some(outcome) = rolled_back {
                failed.record_cleanup(outcome);
            }
            Error::Provisioning(failed)
        }
        other => {
            if let Some(Err(cleanup)) = rolled_back {
                error!(index, error = %cleanup, "Batch rollback left resources behind");
            }
            other
        }
    }
}
