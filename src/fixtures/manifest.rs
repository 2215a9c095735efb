//! Arbitrary manifest fixture, e.g. an InferenceService or
//! LLMInferenceService written inline by a test.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{Map, Value};

use super::NameStrategy;
use super::validation::{MAX_NAME_LEN, dns_label};
use crate::crd::inference_base_url;
use crate::error::{CleanupError, ConfigurationError, PlatformError, Result};
use crate::factory::{Blueprint, ProvisionContext, Provisioned, Provisioning};
use crate::lifecycle::{BundlePhase, Cleanup};
use crate::platform::{ResourceHandle, ResourceKind};

const MANIFEST_COMPONENT: &str = "manifest";

/// A manifest body plus where and how to create it.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestConfig {
    kind: ResourceKind,
    namespace: Option<String>,
    name: NameStrategy,
    body: Map<String, Value>,
    labels: BTreeMap<String, String>,
    teardown: bool,
    wait_for_ready: bool,
}

impl ManifestConfig {
    /// Start from `body`, a JSON object such as `{"spec": {...}}`. Name and
    /// namespace already present in `body.metadata` are used as defaults.
    pub fn builder(kind: ResourceKind, body: Value) -> ManifestConfigBuilder {
        ManifestConfigBuilder::new(kind, body)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &NameStrategy {
        &self.name
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.name.validate("name")?;
        match (&self.namespace, self.kind.is_namespaced()) {
            (Some(ns), true) => dns_label("namespace", ns, MAX_NAME_LEN)?,
            (None, true) => return Err(ConfigurationError::MissingField { field: "namespace" }),
            (Some(ns), false) => {
                return Err(ConfigurationError::InvalidName {
                    field: "namespace",
                    value: ns.clone(),
                    reason: format!("{} is cluster-scoped", self.kind),
                });
            }
            (None, false) => {}
        }
        if let Some(kind) = self.body.get("kind").and_then(Value::as_str)
            && kind != self.kind.as_str()
        {
            return Err(ConfigurationError::InvalidName {
                field: "kind",
                value: kind.to_string(),
                reason: format!("body declares {kind} but the fixture creates {}", self.kind),
            });
        }
        Ok(())
    }

    /// The body with name, namespace, labels and type information filled in.
    fn render(&self, name: &str, labels: BTreeMap<String, String>) -> Value {
        let mut body = self.body.clone();
        let resource = self.kind.api_resource();
        body.entry("apiVersion")
            .or_insert_with(|| Value::String(resource.api_version.clone()));
        body.entry("kind")
            .or_insert_with(|| Value::String(resource.kind.clone()));

        let metadata = body
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(metadata) = metadata {
            metadata.insert("name".to_string(), Value::String(name.to_string()));
            if let Some(namespace) = &self.namespace {
                metadata.insert("namespace".to_string(), Value::String(namespace.clone()));
            }
            let merged = metadata
                .entry("labels")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(merged) = merged {
                for (k, v) in labels {
                    merged.insert(k, Value::String(v));
                }
            }
        }
        Value::Object(body)
    }
}

#[derive(Clone, Debug)]
pub struct ManifestConfigBuilder {
    kind: ResourceKind,
    namespace: Option<String>,
    name: Option<NameStrategy>,
    body: Value,
    labels: BTreeMap<String, String>,
    teardown: bool,
    wait_for_ready: bool,
}

impl ManifestConfigBuilder {
    pub fn new(kind: ResourceKind, body: Value) -> Self {
        Self {
            kind,
            namespace: None,
            name: None,
            body,
            labels: BTreeMap::new(),
            teardown: true,
            wait_for_ready: true,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name = Some(NameStrategy::Prefix(prefix.into()));
        self
    }

    pub fn exact_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(NameStrategy::Exact(name.into()));
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

    /// Return as soon as the object is accepted instead of waiting for
    /// its kind to report ready.
    pub fn wait_for_ready(mut self, wait: bool) -> Self {
        self.wait_for_ready = wait;
        self
    }

    pub fn build(self) -> Result<ManifestConfig, ConfigurationError> {
        let body = match self.body {
            Value::Object(body) => body,
            other => {
                return Err(ConfigurationError::InvalidName {
                    field: "body",
                    value: other.to_string(),
                    reason: "manifest body must be a JSON object".to_string(),
                });
            }
        };
        let from_body = |field: &str| {
            body.get("metadata")
                .and_then(|m| m.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let name = match self.name {
            Some(name) => name,
            None => NameStrategy::Exact(
                from_body("name").ok_or(ConfigurationError::MissingField { field: "name" })?,
            ),
        };
        let namespace = self.namespace.or_else(|| from_body("namespace"));

        let config = ManifestConfig {
            kind: self.kind,
            namespace,
            name,
            body,
            labels: self.labels,
            teardown: self.teardown,
            wait_for_ready: self.wait_for_ready,
        };
        config.validate()?;
        Ok(config)
    }
}

#[async_trait]
impl Blueprint for ManifestConfig {
    type Bundle = ManifestBundle;

    fn describe(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {ns}/{}", self.kind, self.name),
            None => format!("{} {}", self.kind, self.name),
        }
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

    async fn provision(&self, ctx: &ProvisionContext) -> Result<ManifestBundle> {
        let lease = ctx.claim(self.namespace.as_deref(), &self.name)?;
        let name = lease.name().to_string();
        let handle = match &self.namespace {
            Some(ns) => ResourceHandle::namespaced(self.kind, ns, &name),
            None => ResourceHandle::cluster_scoped(self.kind, &name),
        };
        let mut run = Provisioning::begin(ctx, format!("ManifestBundle {handle}"), Some(lease));

        let rendered = self.render(&name, ctx.labels(&name, MANIFEST_COMPONENT, &self.labels));
        let applied = if self.wait_for_ready {
            run.apply_ready(self.kind, &rendered).await
        } else {
            run.apply(self.kind, &rendered).await
        };
        let object = match applied {
            Ok(object) => object,
            Err(e) => return Err(run.abort(e).await),
        };

        Ok(ManifestBundle {
            handle,
            object,
            core: run.finish(),
        })
    }
}

/// One created object.
#[derive(Debug)]
pub struct ManifestBundle {
    handle: ResourceHandle,
    object: DynamicObject,
    core: Provisioned,
}

impl ManifestBundle {
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// The object as last seen during provisioning.
    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    /// Fetch the live object.
    pub async fn refresh(&self) -> Result<DynamicObject, PlatformError> {
        self.core
            .owned()
            .platform()
            .get(&self.handle)
            .await?
            .ok_or_else(|| PlatformError::NotFound(self.handle.clone()))
    }

    /// Base URL of an InferenceService or LLMInferenceService.
    pub fn inference_base_url(&self) -> Option<String> {
        inference_base_url(&self.object)
    }
}

#[async_trait]
impl Cleanup for ManifestBundle {
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
