//! Status conditions as reported by the ODH operators.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition describes the state of a resource at a certain point.
///
/// Operators are not consistent about which fields they fill in, so
/// everything except `type` and `status` is optional when decoding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message indicating details about last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last time the condition transitioned from one status to another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: Some(jiff::Timestamp::now().to_string()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    /// One-line rendering used in wait status messages, e.g.
    /// `Available=False (DeploymentUnavailable: 0/1 pods ready)`.
    pub fn describe(&self) -> String {
        let mut text = format!("{}={}", self.r#type, self.status);
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) if !message.is_empty() => {
                text.push_str(&format!(" ({reason}: {message})"));
            }
            (Some(reason), _) => text.push_str(&format!(" ({reason})")),
            (None, Some(message)) => text.push_str(&format!(" ({message})")),
            (None, None) => {}
        }
        text
    }
}

/// Find a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}
