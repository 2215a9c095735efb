//! In-memory [`Platform`] for exercising fixtures without a cluster.
//!
//! Simulates only what the fixtures can observe: object storage, the status
//! a healthy controller would eventually report for each kind, the Service
//! the model registry operator creates for every ModelRegistry (plus the
//! PostgreSQL objects when it is asked to generate the database), and the
//! namespace the ODH operator creates when the model registry component is
//! enabled. Readiness is still judged by the production predicates in
//! [`ResourceKind::readiness`], so the simulation cannot drift from them.
//!
//! Faults are injected per kind or per create index; every create, delete
//! and patch call is appended to a journal tests can assert on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::{ObjectMeta, TypeMeta};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{DeleteOutcome, Platform, ResourceHandle, ResourceKind};
use crate::crd::{
    Condition, DscComponent, GRPC_ADDRESS_ANNOTATION, REST_ADDRESS_ANNOTATION, conditions,
    default_database_names,
};
use crate::error::PlatformError;

/// Verb recorded in the journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Create,
    Delete,
    Patch,
}

/// One journaled call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub verb: Verb,
    pub resource: ResourceHandle,
}

#[derive(Clone, Copy, Debug)]
enum ReadinessScript {
    /// Report a healthy status as soon as the object exists
    Immediate,
    /// Report a healthy status once the object was read this many times
    AfterPolls(u32),
    /// Never report a healthy status
    Never,
}

#[derive(Debug)]
struct MemoryState {
    objects: BTreeMap<ResourceHandle, DynamicObject>,
    polls: HashMap<ResourceHandle, u32>,
    journal: Vec<Operation>,
    creates: usize,
    readiness: HashMap<ResourceKind, ReadinessScript>,
    reject_at: HashMap<usize, String>,
    reject_kind: HashMap<ResourceKind, String>,
    fail_delete: HashMap<ResourceKind, String>,
    stuck_delete: HashSet<ResourceKind>,
    cascade: bool,
    operator_services: bool,
    domain: String,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            polls: HashMap::new(),
            journal: Vec::new(),
            creates: 0,
            readiness: HashMap::new(),
            reject_at: HashMap::new(),
            reject_kind: HashMap::new(),
            fail_delete: HashMap::new(),
            stuck_delete: HashSet::new(),
            cascade: true,
            operator_services: true,
            domain: "apps.example.com".to_string(),
        }
    }
}

/// Platform that keeps every object in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    state: Mutex<MemoryState>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Fault injection ===

    /// Reject the `index`-th create call (0-based, counted across all kinds).
    pub fn reject_create_at(&self, index: usize, reason: &str) {
        self.lock().reject_at.insert(index, reason.to_string());
    }

    /// Reject every create of `kind`.
    pub fn reject_creates_of(&self, kind: ResourceKind, reason: &str) {
        self.lock().reject_kind.insert(kind, reason.to_string());
    }

    /// Objects of `kind` never report a healthy status.
    pub fn never_ready(&self, kind: ResourceKind) {
        self.lock().readiness.insert(kind, ReadinessScript::Never);
    }

    /// Objects of `kind` report a healthy status on the `polls`-th read.
    pub fn ready_after_polls(&self, kind: ResourceKind, polls: u32) {
        self.lock()
            .readiness
            .insert(kind, ReadinessScript::AfterPolls(polls));
    }

    /// Every delete of `kind` fails with `reason`; the object stays.
    pub fn fail_deletes_of(&self, kind: ResourceKind, reason: &str) {
        self.lock().fail_delete.insert(kind, reason.to_string());
    }

    /// Deletes of `kind` are accepted but the object never goes away,
    /// as if blocked by a finalizer.
    pub fn stuck_deletes_of(&self, kind: ResourceKind) {
        self.lock().stuck_delete.insert(kind);
    }

    /// Deleting an owner no longer removes its dependents.
    pub fn disable_cascade(&self) {
        self.lock().cascade = false;
    }

    /// The simulated registry operator stops creating Services.
    pub fn disable_operator_services(&self) {
        self.lock().operator_services = false;
    }

    // === Direct state access (not journaled) ===

    /// Seed an object as if something else had created it.
    pub fn insert(&self, kind: ResourceKind, object: DynamicObject) -> Result<ResourceHandle, PlatformError> {
        let handle = ResourceHandle::for_object(kind, &object)?;
        let mut state = self.lock();
        let stored = state.admit(kind, object);
        state.objects.insert(handle.clone(), stored);
        Ok(handle)
    }

    /// Remove an object behind the fixtures' back.
    pub fn remove(&self, handle: &ResourceHandle) -> Option<DynamicObject> {
        self.lock().objects.remove(handle)
    }

    pub fn contains(&self, handle: &ResourceHandle) -> bool {
        self.lock().objects.contains_key(handle)
    }

    pub fn object(&self, handle: &ResourceHandle) -> Option<DynamicObject> {
        self.lock().objects.get(handle).cloned()
    }

    /// Handles of every stored object, in handle order.
    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    pub fn journal(&self) -> Vec<Operation> {
        self.lock().journal.clone()
    }

    /// Resources with a successful create call, in call order.
    pub fn created(&self) -> Vec<ResourceHandle> {
        self.journaled(Verb::Create)
    }

    /// Resources with a delete call, in call order.
    pub fn deleted(&self) -> Vec<ResourceHandle> {
        self.journaled(Verb::Delete)
    }

    fn journaled(&self, verb: Verb) -> Vec<ResourceHandle> {
        self.lock()
            .journal
            .iter()
            .filter(|op| op.verb == verb)
            .map(|op| op.resource.clone())
            .collect()
    }
}

impl MemoryState {
    fn script(&self, kind: ResourceKind) -> ReadinessScript {
        self.readiness
            .get(&kind)
            .copied()
            .unwrap_or(ReadinessScript::Immediate)
    }

    /// Fill in server-side metadata and, if scripted, a healthy status.
    fn admit(&mut self, kind: ResourceKind, mut object: DynamicObject) -> DynamicObject {
        if object.types.is_none() {
            let resource = kind.api_resource();
            object.types = Some(TypeMeta {
                api_version: resource.api_version,
                kind: resource.kind,
            });
        }
        object.metadata.uid = Some(Uuid::new_v4().to_string());
        object.metadata.resource_version = Some("1".to_string());
        object.metadata.generation = Some(1);
        if !object.data.is_object() {
            object.data = json!({});
        }
        if matches!(self.script(kind), ReadinessScript::Immediate) {
            healthy_status(kind, &mut object, &self.domain);
        }
        object
    }

    fn create(&mut self, kind: ResourceKind, object: &DynamicObject) -> Result<DynamicObject, PlatformError> {
        let handle = ResourceHandle::for_object(kind, object)?;
        let index = self.creates;
        self.creates += 1;

        let rejection = self
            .reject_at
            .get(&index)
            .or_else(|| self.reject_kind.get(&kind))
            .cloned();
        if let Some(reason) = rejection {
            return Err(PlatformError::Rejected {
                resource: handle,
                reason,
            });
        }
        if self.objects.contains_key(&handle) {
            return Err(PlatformError::AlreadyExists(handle));
        }
        if let Some(namespace) = handle.namespace() {
            let ns = ResourceHandle::cluster_scoped(ResourceKind::Namespace, namespace);
            if !self.objects.contains_key(&ns) {
                return Err(PlatformError::NotFound(ns));
            }
        }

        let stored = self.admit(kind, object.clone());
        self.objects.insert(handle.clone(), stored.clone());
        self.polls.insert(handle.clone(), 0);
        self.journal.push(Operation {
            verb: Verb::Create,
            resource: handle,
        });

        if kind == ResourceKind::ModelRegistry && self.operator_services {
            self.reconcile_registry_service(&stored);
        }
        Ok(stored)
    }

    fn get(&mut self, handle: &ResourceHandle) -> Option<DynamicObject> {
        let script = self.script(handle.kind());
        let polls = self.polls.entry(handle.clone()).or_insert(0);
        *polls += 1;
        let polls = *polls;

        let domain = self.domain.clone();
        let object = self.objects.get_mut(handle)?;
        if let ReadinessScript::AfterPolls(after) = script
            && polls >= after
        {
            healthy_status(handle.kind(), object, &domain);
        }
        Some(object.clone())
    }

    fn delete(&mut self, handle: &ResourceHandle) -> Result<DeleteOutcome, PlatformError> {
        self.journal.push(Operation {
            verb: Verb::Delete,
            resource: handle.clone(),
        });
        if let Some(reason) = self.fail_delete.get(&handle.kind()) {
            return Err(PlatformError::Rejected {
                resource: handle.clone(),
                reason: reason.clone(),
            });
        }
        if self.stuck_delete.contains(&handle.kind()) {
            return if self.objects.contains_key(handle) {
                Ok(DeleteOutcome::Deleted)
            } else {
                Ok(DeleteOutcome::AlreadyGone)
            };
        }

        let Some(removed) = self.objects.remove(handle) else {
            return Ok(DeleteOutcome::AlreadyGone);
        };
        self.polls.remove(handle);
        if self.cascade {
            self.collect_garbage(&removed, handle);
        }
        Ok(DeleteOutcome::Deleted)
    }

    /// Remove dependents of a deleted owner, and the contents of a deleted namespace.
    fn collect_garbage(&mut self, owner: &DynamicObject, handle: &ResourceHandle) {
        let uid = owner.metadata.uid.clone();
        let namespace_deleted = (handle.kind() == ResourceKind::Namespace).then(|| handle.name().to_string());
        self.objects.retain(|h, object| {
            let owned = object
                .metadata
                .owner_references
                .as_ref()
                .is_some_and(|refs| refs.iter().any(|r| Some(&r.uid) == uid.as_ref()));
            let in_namespace = namespace_deleted.as_deref().is_some_and(|ns| h.namespace() == Some(ns));
            !(owned || in_namespace)
        });
    }

    fn list(&self, kind: ResourceKind, namespace: Option<&str>, selector: &str) -> Vec<DynamicObject> {
        let wanted: Vec<(&str, &str)> = selector
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .collect();
        self.objects
            .iter()
            .filter(|(h, _)| h.kind() == kind)
            .filter(|(h, _)| namespace.is_none() || h.namespace() == namespace)
            .filter(|(_, object)| {
                let labels = object.metadata.labels.clone().unwrap_or_default();
                wanted
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(_, object)| object.clone())
            .collect()
    }

    fn patch(&mut self, handle: &ResourceHandle, patch: &Value) -> Result<DynamicObject, PlatformError> {
        let current = self
            .objects
            .get(handle)
            .ok_or_else(|| PlatformError::NotFound(handle.clone()))?;
        let mut value = serde_json::to_value(current)?;
        merge_patch(&mut value, patch);
        let mut patched: DynamicObject = serde_json::from_value(value)?;
        patched.metadata.generation = Some(current.metadata.generation.unwrap_or(1) + 1);

        self.journal.push(Operation {
            verb: Verb::Patch,
            resource: handle.clone(),
        });
        if handle.kind() == ResourceKind::DataScienceCluster {
            self.reconcile_components(&patched);
        }
        if !matches!(self.script(handle.kind()), ReadinessScript::Never) {
            healthy_status(handle.kind(), &mut patched, &self.domain);
        }
        self.objects.insert(handle.clone(), patched.clone());
        Ok(patched)
    }

    /// What the model registry operator does for a new ModelRegistry:
    /// a Service with the same name, owned by the registry, announcing its
    /// external addresses. With `spec.postgres.generateDeployment` it also
    /// creates the database, every object owned by the registry.
    fn reconcile_registry_service(&mut self, registry: &DynamicObject) {
        let (Some(name), Some(namespace)) = (
            registry.metadata.name.clone(),
            registry.metadata.namespace.clone(),
        ) else {
            return;
        };
        let owner = OwnerReference {
            api_version: "modelregistry.opendatahub.io/v1alpha1".to_string(),
            kind: "ModelRegistry".to_string(),
            name: name.clone(),
            uid: registry.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };

        let labels = BTreeMap::from([
            ("app".to_string(), name.clone()),
            ("component".to_string(), "model-registry".to_string()),
        ]);
        let annotations = BTreeMap::from([
            (
                REST_ADDRESS_ANNOTATION.to_string(),
                format!("{name}-rest.{}:443", self.domain),
            ),
            (
                GRPC_ADDRESS_ANNOTATION.to_string(),
                format!("{name}-grpc.{}:443", self.domain),
            ),
        ]);
        let mut service = operator_object(ResourceKind::Service, &namespace, &name, labels, &owner);
        service.metadata.annotations = Some(annotations);
        service.data = json!({
            "spec": {
                "type": "ClusterIP",
                "ports": [
                    {"name": "http-api", "port": 8080},
                    {"name": "grpc-api", "port": 9090}
                ]
            }
        });
        self.insert_operator_object(ResourceKind::Service, service);

        let generated = registry
            .data
            .pointer("/spec/postgres/generateDeployment")
            .and_then(Value::as_bool)
            == Some(true);
        if generated {
            self.reconcile_default_database(&namespace, &name, &owner);
        }
    }

    fn reconcile_default_database(&mut self, namespace: &str, registry: &str, owner: &OwnerReference) {
        let names = default_database_names(registry);
        let labels = BTreeMap::from([
            ("app".to_string(), names.server.clone()),
            ("component".to_string(), "model-registry-postgres".to_string()),
        ]);
        let objects = [
            (
                ResourceKind::Secret,
                &names.credentials,
                json!({"stringData": {"database-password": Uuid::new_v4().to_string()}}),
            ),
            (
                ResourceKind::PersistentVolumeClaim,
                &names.storage,
                json!({"spec": {"accessModes": ["ReadWriteOnce"], "resources": {"requests": {"storage": "5Gi"}}}}),
            ),
            (ResourceKind::Deployment, &names.server, json!({"spec": {"replicas": 1}})),
            (
                ResourceKind::Service,
                &names.server,
                json!({"spec": {"ports": [{"name": "postgresql", "port": 5432}]}}),
            ),
        ];
        for (kind, name, data) in objects {
            let mut object = operator_object(kind, namespace, name, labels.clone(), owner);
            object.data = data;
            self.insert_operator_object(kind, object);
        }
    }

    /// Store an object an operator created. Operator writes are not
    /// journaled and not subject to create faults.
    fn insert_operator_object(&mut self, kind: ResourceKind, mut object: DynamicObject) {
        let Ok(handle) = ResourceHandle::for_object(kind, &object) else {
            return;
        };
        if self.objects.contains_key(&handle) {
            return;
        }
        if matches!(self.script(kind), ReadinessScript::Immediate) {
            healthy_status(kind, &mut object, &self.domain);
        }
        self.objects.insert(handle.clone(), object);
        self.polls.insert(handle, 0);
    }

    /// Enabling the model registry component makes the operator create
    /// the registries namespace if it is missing. It never deletes it.
    fn reconcile_components(&mut self, dsc: &DynamicObject) {
        let Some(block) = dsc.data.pointer("/spec/components/modelregistry") else {
            return;
        };
        let managed = block.get("managementState").and_then(Value::as_str) == Some("Managed");
        let Some(namespace) = block.get("registriesNamespace").and_then(Value::as_str) else {
            return;
        };
        let handle = ResourceHandle::cluster_scoped(ResourceKind::Namespace, namespace);
        if managed && !self.objects.contains_key(&handle) {
            let mut object = DynamicObject {
                types: Some(TypeMeta {
                    api_version: "v1".to_string(),
                    kind: "Namespace".to_string(),
                }),
                metadata: ObjectMeta {
                    name: Some(namespace.to_string()),
                    uid: Some(Uuid::new_v4().to_string()),
                    ..Default::default()
                },
                data: json!({}),
            };
            healthy_status(ResourceKind::Namespace, &mut object, &self.domain);
            self.objects.insert(handle, object);
        }
    }
}

/// Skeleton of an object created by an operator on behalf of `owner`.
fn operator_object(
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    labels: BTreeMap<String, String>,
    owner: &OwnerReference,
) -> DynamicObject {
    let resource = kind.api_resource();
    DynamicObject {
        types: Some(TypeMeta {
            api_version: resource.api_version,
            kind: resource.kind,
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner.clone()]),
            uid: Some(Uuid::new_v4().to_string()),
            generation: Some(1),
            ..Default::default()
        },
        data: json!({}),
    }
}

/// Status a healthy controller would report for `kind`.
fn healthy_status(kind: ResourceKind, object: &mut DynamicObject, domain: &str) {
    let name = object.metadata.name.clone().unwrap_or_default();
    let namespace = object.metadata.namespace.clone().unwrap_or_default();
    let status = match kind {
        ResourceKind::Secret | ResourceKind::Service => return,
        ResourceKind::Namespace => json!({"phase": "Active"}),
        ResourceKind::PersistentVolumeClaim => json!({"phase": "Bound"}),
        ResourceKind::Deployment => {
            let replicas = object
                .data
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            json!({
                "observedGeneration": object.metadata.generation.unwrap_or(1),
                "replicas": replicas,
                "readyReplicas": replicas,
                "availableReplicas": replicas,
            })
        }
        ResourceKind::ModelRegistry => {
            let reported: Vec<Condition> = [
                conditions::AVAILABLE,
                conditions::OAUTH_PROXY_AVAILABLE,
                conditions::ISTIO_AVAILABLE,
                conditions::GATEWAY_AVAILABLE,
            ]
            .into_iter()
            .map(|c| Condition::new(c, true, "Ready", "simulated"))
            .collect();
            json!({
                "conditions": reported,
                "hosts": [format!("{name}.{namespace}.svc.cluster.local")],
            })
        }
        ResourceKind::DataScienceCluster => {
            let reported: Vec<Condition> = object
                .data
                .pointer("/spec/components")
                .and_then(Value::as_object)
                .map(|components| {
                    components
                        .iter()
                        .filter_map(|(key, block)| {
                            let component = DscComponent::from_key(key)?;
                            let managed = block.get("managementState").and_then(Value::as_str)
                                == Some("Managed");
                            let reason = if managed { "Ready" } else { "Removed" };
                            Some(Condition::new(component.ready_condition(), managed, reason, "simulated"))
                        })
                        .collect()
                })
                .unwrap_or_default();
            json!({"phase": "Ready", "conditions": reported})
        }
        ResourceKind::InferenceService => json!({
            "url": format!("https://{name}-{namespace}.{domain}"),
            "components": {"predictor": {"url": format!("https://{name}-predictor-{namespace}.{domain}")}},
            "conditions": [Condition::new("Ready", true, "Ready", "simulated")],
        }),
        ResourceKind::LlmInferenceService => json!({
            "url": format!("https://{domain}/{namespace}/{name}"),
            "conditions": [Condition::new("Ready", true, "Ready", "simulated")],
        }),
    };
    if let Some(data) = object.data.as_object_mut() {
        data.insert("status".to_string(), status);
    }
}

/// JSON merge patch (RFC 7386).
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in entries {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError> {
        self.lock().create(kind, object)
    }

    async fn get(&self, handle: &ResourceHandle) -> Result<Option<DynamicObject>, PlatformError> {
        Ok(self.lock().get(handle))
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<DeleteOutcome, PlatformError> {
        self.lock().delete(handle)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, PlatformError> {
        Ok(self.lock().list(kind, namespace, label_selector))
    }

    async fn patch_merge(
        &self,
        handle: &ResourceHandle,
        patch: &Value,
    ) -> Result<DynamicObject, PlatformError> {
        self.lock().patch(handle, patch)
    }
}
