//! The seam between fixtures and the cluster.
//!
//! Bundles and the factory only ever need five verbs against the platform
//! (create, get, delete, list, merge-patch) plus a readiness predicate per
//! kind. [`KubePlatform`] talks to a real API server; [`InMemoryPlatform`]
//! keeps objects in memory and lets tests inject failures.

mod live;
mod memory;
mod readiness;

pub use live::KubePlatform;
pub use memory::{InMemoryPlatform, Operation, Verb};
pub use readiness::Readiness;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Secret, Service};
use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;

use crate::crd;
use crate::error::PlatformError;

/// Kinds of object the fixtures create, patch or observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    Secret,
    PersistentVolumeClaim,
    Deployment,
    Service,
    ModelRegistry,
    DataScienceCluster,
    InferenceService,
    LlmInferenceService,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Namespace,
        ResourceKind::Secret,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::ModelRegistry,
        ResourceKind::DataScienceCluster,
        ResourceKind::InferenceService,
        ResourceKind::LlmInferenceService,
    ];

    /// API group/version/plural used to address this kind dynamically.
    pub fn api_resource(&self) -> ApiResource {
        match self {
            ResourceKind::Namespace => ApiResource::erase::<Namespace>(&()),
            ResourceKind::Secret => ApiResource::erase::<Secret>(&()),
            ResourceKind::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
            ResourceKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ResourceKind::Service => ApiResource::erase::<Service>(&()),
            ResourceKind::ModelRegistry => ApiResource::erase::<crd::ModelRegistry>(&()),
            ResourceKind::DataScienceCluster => {
                ApiResource::erase::<crd::DataScienceCluster>(&())
            }
            ResourceKind::InferenceService => crd::inference_service_resource(),
            ResourceKind::LlmInferenceService => crd::llm_inference_service_resource(),
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            ResourceKind::Namespace | ResourceKind::DataScienceCluster
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Secret => "Secret",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::ModelRegistry => "ModelRegistry",
            ResourceKind::DataScienceCluster => "DataScienceCluster",
            ResourceKind::InferenceService => "InferenceService",
            ResourceKind::LlmInferenceService => "LLMInferenceService",
        }
    }

    /// Resolve a manifest `kind` field.
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Evaluate whether `object` of this kind is usable yet.
    pub fn readiness(&self, object: &DynamicObject) -> Readiness {
        readiness::evaluate(*self, object)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one object on the platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle {
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
}

impl ResourceHandle {
    pub fn namespaced(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    /// Handle for an object about to be created or just read back.
    pub fn for_object(kind: ResourceKind, object: &DynamicObject) -> Result<Self, PlatformError> {
        let name = object
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PlatformError::InvalidObject(format!("{kind} without metadata.name")))?;
        if !kind.is_namespaced() {
            return Ok(Self::cluster_scoped(kind, name));
        }
        match object.metadata.namespace.clone() {
            Some(namespace) if !namespace.is_empty() => Ok(Self::namespaced(kind, namespace, name)),
            _ => Err(PlatformError::InvalidObject(format!(
                "{kind} {name} without metadata.namespace"
            ))),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} {}/{}", self.kind, namespace, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Result of a delete request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deletion was accepted; the object may linger until finalizers run
    Deleted,
    /// Nothing to delete
    AlreadyGone,
}

/// Operations the fixtures need from a Kubernetes-style API.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Create `object`; fails with [`PlatformError::AlreadyExists`] on a name clash.
    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError>;

    /// Fetch the live object, `None` if it does not exist.
    async fn get(&self, handle: &ResourceHandle) -> Result<Option<DynamicObject>, PlatformError>;

    /// Request deletion. A missing object is reported as [`DeleteOutcome::AlreadyGone`].
    async fn delete(&self, handle: &ResourceHandle) -> Result<DeleteOutcome, PlatformError>;

    /// List objects of `kind` matching a `key=value,...` label selector.
    /// `namespace = None` lists across all namespaces.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, PlatformError>;

    /// Apply a JSON merge patch (RFC 7386).
    async fn patch_merge(
        &self,
        handle: &ResourceHandle,
        patch: &Value,
    ) -> Result<DynamicObject, PlatformError>;
}
