//! Common resource generation utilities.
//!
//! Labels, metadata and the conversion of typed manifests into the
//! [`DynamicObject`]s the [`Platform`](crate::platform::Platform) accepts.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::Serialize;

use crate::error::PlatformError;

/// Marks every object this crate creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "odh-test-fixtures";
/// Identifies the test run that created an object.
pub const RUN_ID_LABEL: &str = "odh-test-fixtures/run-id";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Standard labels applied to all managed resources
pub fn standard_labels(
    name: &str,
    component: &str,
    run_id: &str,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    // User-defined labels first so they can never hide the ownership labels
    let mut labels = extra.clone();
    labels.insert(NAME_LABEL.to_string(), name.to_string());
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(RUN_ID_LABEL.to_string(), run_id.to_string());
    labels
}

/// Labels used to select the pods of one workload.
pub fn pod_selector_labels(name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), name.to_string());
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    labels
}

/// Metadata for a new object.
pub fn object_meta(
    name: &str,
    namespace: Option<&str>,
    labels: BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        annotations: if annotations.is_empty() {
            None
        } else {
            Some(annotations.clone())
        },
        ..Default::default()
    }
}

/// Render labels as a `key=value,...` selector.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector matching everything this crate created, optionally for one run.
pub fn managed_selector(run_id: Option<&str>) -> String {
    match run_id {
        Some(run_id) => format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE},{RUN_ID_LABEL}={run_id}"),
        None => format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}"),
    }
}

/// Convert a typed manifest into a [`DynamicObject`].
pub fn to_dynamic<T: Serialize>(manifest: &T) -> Result<DynamicObject, PlatformError> {
    let value = serde_json::to_value(manifest)?;
    Ok(serde_json::from_value(value)?)
}
