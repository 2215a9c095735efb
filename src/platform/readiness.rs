//! Readiness predicates per resource kind.

use kube::api::DynamicObject;
use serde_json::Value;

use super::ResourceKind;
use crate::crd::{self, Condition, find_condition};

/// Outcome of one readiness check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// The resource is usable
    Ready,
    /// Not there yet; the string describes what is missing
    Pending(String),
    /// The resource reached a state it will not recover from on its own
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

pub(super) fn evaluate(kind: ResourceKind, object: &DynamicObject) -> Readiness {
    match kind {
        // Existence is all these kinds can report
        ResourceKind::Secret | ResourceKind::Service => Readiness::Ready,
        ResourceKind::Namespace => phase_is(object, "Active"),
        ResourceKind::PersistentVolumeClaim => persistent_volume_claim(object),
        ResourceKind::Deployment => deployment(object),
        ResourceKind::ModelRegistry => model_registry(object),
        ResourceKind::DataScienceCluster => phase_is(object, "Ready"),
        ResourceKind::InferenceService | ResourceKind::LlmInferenceService => {
            condition_is_true(object, "Ready")
        }
    }
}

fn phase(object: &DynamicObject) -> Option<&str> {
    object.data.pointer("/status/phase").and_then(Value::as_str)
}

fn conditions(object: &DynamicObject) -> Vec<Condition> {
    object
        .data
        .pointer("/status/conditions")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn phase_is(object: &DynamicObject, expected: &str) -> Readiness {
    match phase(object) {
        Some(p) if p == expected => Readiness::Ready,
        Some(p) => Readiness::Pending(format!("phase {p}, want {expected}")),
        None => Readiness::Pending("no status reported yet".to_string()),
    }
}

fn persistent_volume_claim(object: &DynamicObject) -> Readiness {
    // Pending is fine: WaitForFirstConsumer storage classes only bind once
    // the database pod is scheduled.
    match phase(object) {
        Some("Bound") | Some("Pending") => Readiness::Ready,
        Some("Lost") => Readiness::Failed("claim lost its underlying volume".to_string()),
        Some(p) => Readiness::Pending(format!("phase {p}")),
        None => Readiness::Pending("no status reported yet".to_string()),
    }
}

fn deployment(object: &DynamicObject) -> Readiness {
    let conditions = conditions(object);
    if let Some(progressing) = find_condition(&conditions, "Progressing")
        && progressing.status == "False"
        && progressing.reason.as_deref() == Some("ProgressDeadlineExceeded")
    {
        return Readiness::Failed(progressing.describe());
    }

    let generation = object.metadata.generation;
    let observed = object
        .data
        .pointer("/status/observedGeneration")
        .and_then(Value::as_i64);
    if let (Some(generation), Some(observed)) = (generation, observed)
        && observed < generation
    {
        return Readiness::Pending(format!(
            "generation {generation} not observed yet (observed {observed})"
        ));
    }

    let desired = object
        .data
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let ready = object
        .data
        .pointer("/status/readyReplicas")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if ready >= desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!("{ready}/{desired} replicas ready"))
    }
}

fn model_registry(object: &DynamicObject) -> Readiness {
    let registry: crd::ModelRegistry =
        match serde_json::to_value(object).and_then(serde_json::from_value) {
            Ok(registry) => registry,
            Err(e) => return Readiness::Failed(format!("unreadable ModelRegistry: {e}")),
        };

    let missing: Vec<String> = registry
        .required_conditions()
        .into_iter()
        .filter_map(|required| match registry.condition(required) {
            Some(c) if c.is_true() => None,
            Some(c) => Some(c.describe()),
            None => Some(format!("{required} not reported")),
        })
        .collect();

    if missing.is_empty() {
        Readiness::Ready
    } else {
        Readiness::Pending(missing.join(", "))
    }
}

fn condition_is_true(object: &DynamicObject, condition_type: &str) -> Readiness {
    match find_condition(&conditions(object), condition_type) {
        Some(c) if c.is_true() => Readiness::Ready,
        Some(c) => Readiness::Pending(c.describe()),
        None => Readiness::Pending(format!("{condition_type} not reported")),
    }
}
