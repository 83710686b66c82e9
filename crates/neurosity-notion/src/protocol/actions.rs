//! Device action payloads.

use serde::{Deserialize, Serialize};

/// A command sent to the device, e.g. `haptics/queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub command: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
    /// Whether the device is expected to reply with a result.
    #[serde(rename = "responseRequired", default)]
    pub response_required: bool,
}

impl Action {
    /// Create an action without a message body.
    pub fn new(command: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            action: action.into(),
            message: None,
            response_required: false,
        }
    }

    /// Attach a message body.
    #[must_use]
    pub fn with_message(mut self, message: serde_json::Value) -> Self {
        self.message = Some(message);
        self
    }

    /// Ask the device to reply with a result.
    #[must_use]
    pub fn expect_response(mut self) -> Self {
        self.response_required = true;
        self
    }

    /// The `command/action` key used by the scope tables.
    pub fn scope_key(&self) -> String {
        format!("{}/{}", self.command, self.action)
    }

    /// Add a timestamped marker to the brainwave stream.
    pub fn add_marker(label: &str, timestamp: u64) -> Self {
        Self::new("marker", "add").with_message(serde_json::json!({
            "label": label,
            "timestamp": timestamp,
        }))
    }

    /// Queue haptic effects per motor, e.g. `{"P7": ["tripleClick100"]}`.
    pub fn queue_haptics(effects: serde_json::Value) -> Self {
        Self::new("haptics", "queue")
            .with_message(effects)
            .expect_response()
    }

    /// Record a training sample for a kinesis thought.
    pub fn record_training(metric: &str, label: &str, fit: bool, timestamp: u64) -> Self {
        Self::new("training", "record").with_message(serde_json::json!({
            "metric": metric,
            "label": label,
            "fit": fit,
            "timestamp": timestamp,
        }))
    }

    /// Stop training for a thought.
    pub fn stop_training(metric: &str, label: &str) -> Self {
        Self::new("training", "stop").with_message(serde_json::json!({
            "metric": metric,
            "label": label,
        }))
    }

    /// Stop every training in progress.
    pub fn stop_all_training() -> Self {
        Self::new("training", "stopAll")
    }

    /// Record raw brainwaves for the given duration and label.
    pub fn record_brainwaves(label: &str, duration_ms: u64) -> Self {
        Self::new("brainwaves", "record")
            .with_message(serde_json::json!({
                "name": label,
                "duration": duration_ms,
            }))
            .expect_response()
    }

    /// Reset the device's wifi settings.
    pub fn reset_wifi() -> Self {
        Self::new("wifi", "reset").expect_response()
    }
}
