//! DataScienceCluster component patch.
//!
//! The DSC is cluster-wide and pre-exists every test, so this fixture never
//! creates or deletes it. It merge-patches one component block, waits for
//! the operator to converge, and on cleanup patches the original block back.
//! A registries namespace that only exists because of the patch is deleted
//! after the restore.

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::validation::{MAX_NAME_LEN, dns_label};
use super::NameStrategy;
use crate::crd::{DataScienceCluster, DscComponent, ManagementState};
use crate::error::{
    CleanupError, CleanupFailure, ConfigurationError, Error, PlatformError, ProvisioningCause,
    ProvisioningError, Result,
};
use crate::factory::{Blueprint, ProvisionContext, Provisioned, Provisioning};
use crate::lifecycle::{BundlePhase, Cleanup};
use crate::platform::{Platform, Readiness, ResourceHandle, ResourceKind};
use crate::wait::{Timeouts, wait_for_condition};

pub const DEFAULT_DSC_NAME: &str = "default-dsc";

/// Desired state of one DSC component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentPatchConfig {
    dsc_name: String,
    component: DscComponent,
    state: ManagementState,
    registries_namespace: Option<String>,
    teardown: bool,
    wait_for_namespace: bool,
}

impl ComponentPatchConfig {
    pub fn builder(component: DscComponent, state: ManagementState) -> ComponentPatchConfigBuilder {
        ComponentPatchConfigBuilder::new(component, state)
    }

    pub fn dsc_name(&self) -> &str {
        &self.dsc_name
    }

    pub fn component(&self) -> DscComponent {
        self.component
    }

    pub fn state(&self) -> ManagementState {
        self.state
    }

    pub fn registries_namespace(&self) -> Option<&str> {
        self.registries_namespace.as_deref()
    }

    fn dsc_handle(&self) -> ResourceHandle {
        ResourceHandle::cluster_scoped(ResourceKind::DataScienceCluster, &self.dsc_name)
    }

    /// The merge patch that moves the component to the desired state.
    fn patch(&self) -> Value {
        let mut block = Map::new();
        block.insert(
            "managementState".to_string(),
            Value::String(self.state.to_string()),
        );
        if let Some(namespace) = &self.registries_namespace {
            block.insert(
                "registriesNamespace".to_string(),
                Value::String(namespace.clone()),
            );
        }
        json!({"spec": {"components": {self.component.key(): block}}})
    }

    fn is_satisfied_by(&self, dsc: &DataScienceCluster) -> bool {
        let state_matches = dsc.management_state(self.component) == Some(self.state);
        let namespace_matches = match &self.registries_namespace {
            Some(wanted) => dsc.registries_namespace() == Some(wanted.as_str()),
            None => true,
        };
        state_matches && namespace_matches
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        dns_label("dsc_name", &self.dsc_name, MAX_NAME_LEN)?;
        if let Some(namespace) = &self.registries_namespace {
            dns_label("registries_namespace", namespace, MAX_NAME_LEN)?;
            if !self.component.owns_registries_namespace() {
                return Err(ConfigurationError::InvalidName {
                    field: "registries_namespace",
                    value: namespace.clone(),
                    reason: format!("component {} has no registries namespace", self.component),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ComponentPatchConfigBuilder {
    dsc_name: String,
    component: DscComponent,
    state: ManagementState,
    registries_namespace: Option<String>,
    teardown: bool,
    wait_for_namespace: bool,
}

impl ComponentPatchConfigBuilder {
    pub fn new(component: DscComponent, state: ManagementState) -> Self {
        Self {
            dsc_name: DEFAULT_DSC_NAME.to_string(),
            component,
            state,
            registries_namespace: None,
            teardown: true,
            wait_for_namespace: true,
        }
    }

    pub fn dsc_name(mut self, name: impl Into<String>) -> Self {
        self.dsc_name = name.into();
        self
    }

    pub fn registries_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.registries_namespace = Some(namespace.into());
        self
    }

    pub fn teardown(mut self, teardown: bool) -> Self {
        self.teardown = teardown;
        self
    }

    /// Wait for the registries namespace to become `Active` after enabling
    /// the component.
    pub fn wait_for_namespace(mut self, wait: bool) -> Self {
        self.wait_for_namespace = wait;
        self
    }

    pub fn build(self) -> Result<ComponentPatchConfig, ConfigurationError> {
        let config = ComponentPatchConfig {
            dsc_name: self.dsc_name,
            component: self.component,
            state: self.state,
            registries_namespace: self.registries_namespace,
            teardown: self.teardown,
            wait_for_namespace: self.wait_for_namespace,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Readiness of the DSC with respect to one component's desired state.
fn component_readiness(
    component: DscComponent,
    state: ManagementState,
) -> impl Fn(&DynamicObject) -> Readiness + Sync {
    move |object| {
        let dsc = match serde_json::to_value(object).and_then(serde_json::from_value::<DataScienceCluster>) {
            Ok(dsc) => dsc,
            Err(e) => return Readiness::Pending(format!("unreadable DataScienceCluster: {e}")),
        };
        match dsc.phase() {
            Some("Ready") => {}
            Some(phase) => return Readiness::Pending(format!("phase {phase}, want Ready")),
            None => return Readiness::Pending("no status reported yet".to_string()),
        }
        let condition = dsc.condition(component.ready_condition());
        match (state, condition) {
            (ManagementState::Managed, Some(c)) if c.is_true() => Readiness::Ready,
            (ManagementState::Managed, Some(c)) => Readiness::Pending(c.describe()),
            (ManagementState::Managed, None) => {
                Readiness::Pending(format!("no {} condition", component.ready_condition()))
            }
            (ManagementState::Removed, Some(c)) if c.is_true() => Readiness::Pending(c.describe()),
            (ManagementState::Removed | ManagementState::Unmanaged, _) => Readiness::Ready,
        }
    }
}

/// Merge patch that puts back `original`, removing keys the applied patch added.
fn restore_patch(component: DscComponent, original: Option<&Value>, applied: &Value) -> Value {
    let restored = match original {
        None => Value::Null,
        Some(original) => {
            let mut block = original.as_object().cloned().unwrap_or_default();
            let added = applied
                .pointer(&format!("/spec/components/{}", component.key()))
                .and_then(Value::as_object);
            for key in added.into_iter().flat_map(Map::keys) {
                if !block.contains_key(key) {
                    block.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(block)
        }
    };
    json!({"spec": {"components": {component.key(): restored}}})
}

async fn read_dsc(platform: &dyn Platform, handle: &ResourceHandle) -> Result<DataScienceCluster> {
    let object = platform
        .get(handle)
        .await
        .map_err(|e| ProvisioningError::new(handle.clone(), ProvisioningCause::Platform(e)))?
        .ok_or_else(|| {
            ProvisioningError::new(
                handle.clone(),
                ProvisioningCause::Failed("DataScienceCluster does not exist".to_string()),
            )
        })?;
    let dsc = serde_json::to_value(&object)
        .and_then(serde_json::from_value)
        .map_err(PlatformError::from)?;
    Ok(dsc)
}

async fn namespace_exists(platform: &dyn Platform, namespace: &str) -> Result<bool> {
    let handle = ResourceHandle::cluster_scoped(ResourceKind::Namespace, namespace);
    Ok(platform.get(&handle).await?.is_some())
}

#[async_trait]
impl Blueprint for ComponentPatchConfig {
    type Bundle = ComponentPatchBundle;

    fn describe(&self) -> String {
        format!(
            "DataScienceCluster {} component {} -> {}",
            self.dsc_name, self.component, self.state
        )
    }

    fn teardown(&self) -> bool {
        self.teardown
    }

    fn with_name_prefix(&self, prefix: &str) -> Result<Self, ConfigurationError> {
        Err(ConfigurationError::InvalidName {
            field: "dsc_name",
            value: prefix.to_string(),
            reason: "a DataScienceCluster has one block per component and cannot be batched"
                .to_string(),
        })
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<ComponentPatchBundle> {
        let lease = ctx.claim(
            None,
            &NameStrategy::Exact(format!("{}.{}", self.dsc_name, self.component)),
        )?;
        let handle = self.dsc_handle();
        let mut run = Provisioning::begin(
            ctx,
            format!("ComponentPatchBundle {handle} {}", self.component),
            Some(lease),
        );
        let platform = ctx.platform().as_ref();

        let current = match read_dsc(platform, &handle).await {
            Ok(dsc) => dsc,
            Err(e) => return Err(run.abort(e).await),
        };
        let original = current.component(self.component).cloned();

        if self.is_satisfied_by(&current) {
            info!(
                dsc = %self.dsc_name,
                component = %self.component,
                state = %self.state,
                "Component already in desired state, nothing to patch"
            );
            if let Err(e) = run
                .await_condition(&handle, component_readiness(self.component, self.state))
                .await
            {
                return Err(run.abort(e).await);
            }
            return Ok(ComponentPatchBundle {
                handle,
                component: self.component,
                patch: None,
                original,
                created_namespace: None,
                timeouts: *ctx.timeouts(),
                core: run.finish(),
            });
        }

        let namespace_before = match &self.registries_namespace {
            Some(ns) if self.state == ManagementState::Managed => {
                match namespace_exists(platform, ns).await {
                    Ok(exists) => Some((ns.clone(), exists)),
                    Err(e) => return Err(run.abort(e).await),
                }
            }
            _ => None,
        };

        let patch = self.patch();
        info!(
            dsc = %self.dsc_name,
            component = %self.component,
            from = ?current.management_state(self.component),
            to = %self.state,
            "Patching DataScienceCluster component"
        );
        if let Err(e) = platform.patch_merge(&handle, &patch).await {
            let err = ProvisioningError::new(handle.clone(), ProvisioningCause::Platform(e));
            return Err(run.abort(err.into()).await);
        }

        let mut created_namespace = None;
        let converged = async {
            run.await_condition(&handle, component_readiness(self.component, self.state))
                .await?;
            if let Some((namespace, existed)) = &namespace_before {
                let ns_handle = ResourceHandle::cluster_scoped(ResourceKind::Namespace, namespace);
                if self.wait_for_namespace {
                    run.await_ready(&ns_handle).await?;
                }
                if !existed && platform.get(&ns_handle).await?.is_some() {
                    debug!(namespace = %namespace, "Registries namespace created by the patch");
                    created_namespace = Some(ns_handle);
                }
            }
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = converged {
            let restore = restore_patch(self.component, original.as_ref(), &patch);
            if let Err(restore_err) = platform.patch_merge(&handle, &restore).await {
                warn!(
                    dsc = %self.dsc_name,
                    component = %self.component,
                    error = %restore_err,
                    "Could not restore component after failed patch"
                );
            }
            if let Some(ns) = created_namespace.or_else(|| {
                namespace_before
                    .as_ref()
                    .filter(|(_, existed)| !existed)
                    .map(|(ns, _)| ResourceHandle::cluster_scoped(ResourceKind::Namespace, ns))
            }) {
                run.own(ns);
            }
            return Err(run.abort(e).await);
        }
        if let Some(ns) = &created_namespace {
            run.own(ns.clone());
        }

        Ok(ComponentPatchBundle {
            handle,
            component: self.component,
            patch: Some(patch),
            original,
            created_namespace,
            timeouts: *ctx.timeouts(),
            core: run.finish(),
        })
    }
}

/// A patched DSC component; cleanup puts the original block back.
#[derive(Debug)]
pub struct ComponentPatchBundle {
    handle: ResourceHandle,
    component: DscComponent,
    patch: Option<Value>,
    original: Option<Value>,
    created_namespace: Option<ResourceHandle>,
    timeouts: Timeouts,
    core: Provisioned,
}

impl ComponentPatchBundle {
    pub fn dsc(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn component(&self) -> DscComponent {
        self.component
    }

    /// The merge patch that was applied, `None` if the DSC already matched.
    pub fn applied_patch(&self) -> Option<&Value> {
        self.patch.as_ref()
    }

    /// The component block as it was before the patch.
    pub fn original(&self) -> Option<&Value> {
        self.original.as_ref()
    }

    pub fn original_state(&self) -> Option<ManagementState> {
        self.original
            .as_ref()?
            .get("managementState")?
            .as_str()?
            .parse()
            .ok()
    }

    /// Registries namespace that did not exist before the patch.
    pub fn created_namespace(&self) -> Option<&ResourceHandle> {
        self.created_namespace.as_ref()
    }

    async fn restore(&self) -> Result<(), CleanupError> {
        let mut errors = CleanupError::default();
        let platform = self.core.owned().platform().as_ref();

        if let Some(applied) = &self.patch {
            let restore = restore_patch(self.component, self.original.as_ref(), applied);
            info!(
                dsc = self.handle.name(),
                component = %self.component,
                state = ?self.original_state(),
                "Restoring DataScienceCluster component"
            );
            match platform.patch_merge(&self.handle, &restore).await {
                Ok(_) => {
                    if let Some(state) = self.original_state()
                        && let Err(e) = wait_for_condition(
                            platform,
                            &self.handle,
                            component_readiness(self.component, state),
                            self.timeouts.readiness,
                            self.timeouts.poll_interval,
                        )
                        .await
                    {
                        errors.push(CleanupFailure::new(
                            self.handle.clone(),
                            format!("restore of {} not confirmed: {e}", self.component),
                        ));
                    }
                }
                Err(e) if e.is_not_found() => {
                    warn!(dsc = self.handle.name(), "DataScienceCluster disappeared, nothing to restore");
                }
                Err(e) => errors.push(CleanupFailure::new(
                    self.handle.clone(),
                    format!("restore of {} failed: {e}", self.component),
                )),
            }
        }

        // Only the namespace the patch caused is owned; the DSC never is
        errors.absorb(self.core.owned().release().await);
        errors.into_result()
    }
}

#[async_trait]
impl Cleanup for ComponentPatchBundle {
    fn identity(&self) -> String {
        self.core.identity().to_string()
    }

    fn phase(&self) -> BundlePhase {
        self.core.phase()
    }

    async fn cleanup(&self) -> Result<(), CleanupError> {
        self.core.teardown(self.restore()).await
    }
}
