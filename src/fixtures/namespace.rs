//! Isolated test namespace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;

use super::NameStrategy;
use crate::error::{CleanupError, ConfigurationError, Result};
use crate::factory::{Blueprint, ProvisionContext, Provisioned, Provisioning};
use crate::lifecycle::{BundlePhase, Cleanup};
use crate::platform::{ResourceHandle, ResourceKind};
use crate::resources::common::object_meta;

const NAMESPACE_COMPONENT: &str = "test-namespace";

/// A namespace named `{prefix}-{8 hex}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceConfig {
    name: NameStrategy,
    labels: BTreeMap<String, String>,
    teardown: bool,
}

impl NamespaceConfig {
    pub fn builder(prefix: impl Into<String>) -> NamespaceConfigBuilder {
        NamespaceConfigBuilder {
            name: NameStrategy::Prefix(prefix.into()),
            labels: BTreeMap::new(),
            teardown: true,
        }
    }

    pub fn name(&self) -> &NameStrategy {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

#[derive(Clone, Debug)]
pub struct NamespaceConfigBuilder {
    name: NameStrategy,
    labels: BTreeMap<String, String>,
    teardown: bool,
}

impl NamespaceConfigBuilder {
    /// Use exactly `name` instead of a generated one.
    pub fn exact_name(mut self, name: impl Into<String>) -> Self {
        self.name = NameStrategy::Exact(name.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn teardown(mut self, teardown: bool) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn build(self) -> Result<NamespaceConfig, ConfigurationError> {
        self.name.validate("name")?;
        Ok(NamespaceConfig {
            name: self.name,
            labels: self.labels,
            teardown: self.teardown,
        })
    }
}

#[async_trait]
impl Blueprint for NamespaceConfig {
    type Bundle = NamespaceBundle;

    fn describe(&self) -> String {
        format!("Namespace {}", self.name)
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
        copy.name.validate("name")?;
        Ok(copy)
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<NamespaceBundle> {
        let lease = ctx.claim(None, &self.name)?;
        let name = lease.name().to_string();
        let mut run = Provisioning::begin(ctx, format!("NamespaceBundle {name}"), Some(lease));

        let manifest = Namespace {
            metadata: object_meta(
                &name,
                None,
                ctx.labels(&name, NAMESPACE_COMPONENT, &self.labels),
                &BTreeMap::new(),
            ),
            ..Default::default()
        };
        if let Err(e) = run.apply_ready(ResourceKind::Namespace, &manifest).await {
            return Err(run.abort(e).await);
        }

        Ok(NamespaceBundle {
            handle: ResourceHandle::cluster_scoped(ResourceKind::Namespace, &name),
            name,
            core: run.finish(),
        })
    }
}

/// A ready namespace; deleting it takes everything inside with it.
#[derive(Debug)]
pub struct NamespaceBundle {
    name: String,
    handle: ResourceHandle,
    core: Provisioned,
}

impl NamespaceBundle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

#[async_trait]
impl Cleanup for NamespaceBundle {
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
