//! [`Platform`] backed by a Kubernetes API server.

use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use serde_json::Value;
use tracing::debug;

use super::{DeleteOutcome, Platform, ResourceHandle, ResourceKind};
use crate::error::PlatformError;

/// Field manager recorded on objects patched by the fixtures.
const FIELD_MANAGER: &str = "odh-test-fixtures";

/// Talks to the cluster through kube-rs dynamic APIs.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> Result<Self, PlatformError> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn api_for(&self, handle: &ResourceHandle) -> Api<DynamicObject> {
        self.api(handle.kind(), handle.namespace())
    }
}

/// Map API status codes onto the error variants the fixtures act on.
fn classify(err: kube::Error, resource: &ResourceHandle) -> PlatformError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            PlatformError::NotFound(resource.clone())
        }
        kube::Error::Api(response) if response.code == 409 => {
            PlatformError::AlreadyExists(resource.clone())
        }
        kube::Error::Api(response) if matches!(response.code, 400 | 403 | 422) => {
            PlatformError::Rejected {
                resource: resource.clone(),
                reason: format!("{} ({})", response.message, response.reason),
            }
        }
        other => PlatformError::Kube(other),
    }
}

#[async_trait]
impl Platform for KubePlatform {
    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError> {
        let handle = ResourceHandle::for_object(kind, object)?;
        let mut object = object.clone();
        if object.types.is_none() {
            let resource = kind.api_resource();
            object.types = Some(kube::core::TypeMeta {
                api_version: resource.api_version,
                kind: resource.kind,
            });
        }
        debug!(resource = %handle, "Creating object");
        self.api_for(&handle)
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| classify(e, &handle))
    }

    async fn get(&self, handle: &ResourceHandle) -> Result<Option<DynamicObject>, PlatformError> {
        self.api_for(handle)
            .get_opt(handle.name())
            .await
            .map_err(|e| classify(e, handle))
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<DeleteOutcome, PlatformError> {
        match self
            .api_for(handle)
            .delete(handle.name(), &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Ok(DeleteOutcome::AlreadyGone)
            }
            Err(e) => Err(classify(e, handle)),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, PlatformError> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api(kind, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn patch_merge(
        &self,
        handle: &ResourceHandle,
        patch: &Value,
    ) -> Result<DynamicObject, PlatformError> {
        debug!(resource = %handle, "Merge-patching object");
        self.api_for(handle)
            .patch(
                handle.name(),
                &PatchParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..Default::default()
                },
                &Patch::Merge(patch),
            )
            .await
            .map_err(|e| classify(e, handle))
    }
}
