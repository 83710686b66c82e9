//! Device metadata payloads.

use serde::{Deserialize, Serialize};

/// Device info returned by `getInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device ID.
    #[serde(rename = "deviceId")]
    pub device_id: String,

    /// User-facing device name.
    #[serde(rename = "deviceNickname", default)]
    pub device_nickname: Option<String>,

    /// EEG channel names, e.g. `["CP3", "C3", "F5", ...]`.
    #[serde(rename = "channelNames", default)]
    pub channel_names: Vec<String>,

    /// Number of EEG channels.
    #[serde(default)]
    pub channels: Option<u32>,

    /// EEG sampling rate in Hz.
    #[serde(rename = "samplingRate", default)]
    pub sampling_rate: Option<u32>,

    /// Hardware manufacturer.
    #[serde(default)]
    pub manufacturer: Option<String>,

    /// Hardware model, e.g. "Crown".
    #[serde(rename = "modelName", default)]
    pub model_name: Option<String>,

    /// Device OS version.
    #[serde(rename = "osVersion", default)]
    pub os_version: Option<String>,

    /// Device API version.
    #[serde(rename = "apiVersion", default)]
    pub api_version: Option<String>,
}
