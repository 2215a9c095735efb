//! DataScienceCluster custom resource (cluster scoped, owned by the ODH operator).
//!
//! Component blocks are kept as raw JSON: the fixtures only ever touch
//! `managementState` and `registriesNamespace`, and every other field must
//! survive a read/patch/restore cycle untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::{Condition, find_condition};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datasciencecluster.opendatahub.io",
    version = "v1",
    kind = "DataScienceCluster",
    plural = "datascienceclusters",
    shortname = "dsc",
    status = "DataScienceClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DataScienceClusterSpec {
    #[serde(default)]
    pub components: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataScienceClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Management state of one DSC component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ManagementState {
    Managed,
    Removed,
    Unmanaged,
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagementState::Managed => write!(f, "Managed"),
            ManagementState::Removed => write!(f, "Removed"),
            ManagementState::Unmanaged => write!(f, "Unmanaged"),
        }
    }
}

impl FromStr for ManagementState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Managed" => Ok(ManagementState::Managed),
            "Removed" => Ok(ManagementState::Removed),
            "Unmanaged" => Ok(ManagementState::Unmanaged),
            other => Err(format!("unknown management state {other:?}")),
        }
    }
}

/// DSC components the fixtures know how to toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DscComponent {
    ModelRegistry,
    Kserve,
    Dashboard,
    TrustyAi,
    LlamaStackOperator,
    DataSciencePipelines,
}

impl DscComponent {
    pub const ALL: [DscComponent; 6] = [
        DscComponent::ModelRegistry,
        DscComponent::Kserve,
        DscComponent::Dashboard,
        DscComponent::TrustyAi,
        DscComponent::LlamaStackOperator,
        DscComponent::DataSciencePipelines,
    ];

    /// Key of the component block under `spec.components`.
    pub fn key(&self) -> &'static str {
        match self {
            DscComponent::ModelRegistry => "modelregistry",
            DscComponent::Kserve => "kserve",
            DscComponent::Dashboard => "dashboard",
            DscComponent::TrustyAi => "trustyai",
            DscComponent::LlamaStackOperator => "llamastackoperator",
            DscComponent::DataSciencePipelines => "datasciencepipelines",
        }
    }

    /// Condition the operator sets on the DSC once the component is up.
    pub fn ready_condition(&self) -> &'static str {
        match self {
            DscComponent::ModelRegistry => "ModelRegistryReady",
            DscComponent::Kserve => "KserveReady",
            DscComponent::Dashboard => "DashboardReady",
            DscComponent::TrustyAi => "TrustyAIReady",
            DscComponent::LlamaStackOperator => "LlamaStackOperatorReady",
            DscComponent::DataSciencePipelines => "DataSciencePipelinesReady",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Whether enabling the component makes the operator create a namespace.
    pub fn owns_registries_namespace(&self) -> bool {
        matches!(self, DscComponent::ModelRegistry)
    }
}

impl fmt::Display for DscComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl DataScienceCluster {
    /// Raw component block, if the spec has one.
    pub fn component(&self, component: DscComponent) -> Option<&Value> {
        self.spec.components.get(component.key())
    }

    pub fn management_state(&self, component: DscComponent) -> Option<ManagementState> {
        self.component(component)?
            .get("managementState")?
            .as_str()?
            .parse()
            .ok()
    }

    pub fn registries_namespace(&self) -> Option<&str> {
        self.component(DscComponent::ModelRegistry)?
            .get("registriesNamespace")?
            .as_str()
    }

    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref()?.phase.as_deref()
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, condition_type))
    }
}
