//! KServe InferenceService and LLMInferenceService.
//!
//! These are created from caller-supplied manifests, so they are handled as
//! [`DynamicObject`]s. This module only knows where each kind publishes the
//! URL clients should call.

use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;

/// Annotation selecting the KServe deployment mode.
pub const DEPLOYMENT_MODE_ANNOTATION: &str = "serving.kserve.io/deploymentMode";

pub fn inference_service_resource() -> ApiResource {
    ApiResource {
        group: "serving.kserve.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "serving.kserve.io/v1beta1".to_string(),
        kind: "InferenceService".to_string(),
        plural: "inferenceservices".to_string(),
    }
}

pub fn llm_inference_service_resource() -> ApiResource {
    ApiResource {
        group: "serving.kserve.io".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "serving.kserve.io/v1alpha1".to_string(),
        kind: "LLMInferenceService".to_string(),
        plural: "llminferenceservices".to_string(),
    }
}

/// KServe deployment modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentMode {
    Serverless,
    RawDeployment,
    ModelMesh,
}

impl DeploymentMode {
    /// Mode requested by the object's annotation. KServe defaults to
    /// Serverless when the annotation is absent.
    pub fn of(object: &DynamicObject) -> Self {
        let annotation = object
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DEPLOYMENT_MODE_ANNOTATION))
            .map(String::as_str);
        match annotation {
            Some("RawDeployment") => DeploymentMode::RawDeployment,
            Some("ModelMesh") => DeploymentMode::ModelMesh,
            _ => DeploymentMode::Serverless,
        }
    }
}

fn string_at<'a>(object: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    object
        .data
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Base URL for inference requests against a serving object.
///
/// InferenceService: `status.url`, except in Serverless mode where the
/// predictor component URL is preferred. LLMInferenceService: `status.url`,
/// falling back to the first published address. Trailing slashes are
/// removed so callers can append request paths directly.
pub fn inference_base_url(object: &DynamicObject) -> Option<String> {
    let kind = object.types.as_ref().map(|t| t.kind.as_str());
    let url = match kind {
        Some("LLMInferenceService") => string_at(object, "/status/url")
            .or_else(|| string_at(object, "/status/addresses/0/url")),
        _ => {
            let predictor = if DeploymentMode::of(object) == DeploymentMode::Serverless {
                string_at(object, "/status/components/predictor/url")
            } else {
                None
            };
            predictor.or_else(|| string_at(object, "/status/url"))
        }
    }?;
    Some(url.trim_end_matches('/').to_string())
}
