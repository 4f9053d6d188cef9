//! Uniform command output used for routing and dynamic dispatch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::commands::{
    CoreDumpListing, NetworkInterfaceInfo, PreferenceData, SymphonyStatus,
};

/// Output of any command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CommandOutput {
    DeviceInfo(Map<String, Value>),
    Confirmed(bool),
    SymphonyStatus(SymphonyStatus),
    SymphonyGroup(String),
    SymphonyVolume(i64),
    SpeakerRemap(Vec<i64>),
    PreferenceData(PreferenceData),
    NetworkInterface(NetworkInterfaceInfo),
    CoreDumps(CoreDumpListing),
    Lines(Vec<String>),
}

impl CommandOutput {
    pub fn to_json(&self) -> Value {
        match self {
            CommandOutput::DeviceInfo(map) => Value::Object(map.clone()),
            CommandOutput::Confirmed(b) => Value::Bool(*b),
            CommandOutput::SymphonyGroup(s) => Value::String(s.clone()),
            CommandOutput::SymphonyVolume(v) => Value::from(*v),
            CommandOutput::SpeakerRemap(v) => Value::from(v.clone()),
            CommandOutput::Lines(lines) => Value::from(lines.clone()),
            CommandOutput::SymphonyStatus(s) => serde_json::to_value(s).unwrap_or(Value::Null),
            CommandOutput::PreferenceData(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            CommandOutput::NetworkInterface(n) => serde_json::to_value(n).unwrap_or(Value::Null),
            CommandOutput::CoreDumps(c) => serde_json::to_value(c).unwrap_or(Value::Null),
        }
    }
}

impl From<Map<String, Value>> for CommandOutput {
    fn from(v: Map<String, Value>) -> Self {
        CommandOutput::DeviceInfo(v)
    }
}

impl From<bool> for CommandOutput {
    fn from(v: bool) -> Self {
        CommandOutput::Confirmed(v)
    }
}

impl From<SymphonyStatus> for CommandOutput {
    fn from(v: SymphonyStatus) -> Self {
        CommandOutput::SymphonyStatus(v)
    }
}

impl From<String> for CommandOutput {
    fn from(v: String) -> Self {
        CommandOutput::SymphonyGroup(v)
    }
}

impl From<i64> for CommandOutput {
    fn from(v: i64) -> Self {
        CommandOutput::SymphonyVolume(v)
    }
}

impl From<Vec<i64>> for CommandOutput {
    fn from(v: Vec<i64>) -> Self {
        CommandOutput::SpeakerRemap(v)
    }
}

impl From<PreferenceData> for CommandOutput {
    fn from(v: PreferenceData) -> Self {
        CommandOutput::PreferenceData(v)
    }
}

impl From<NetworkInterfaceInfo> for CommandOutput {
    fn from(v: NetworkInterfaceInfo) -> Self {
        CommandOutput::NetworkInterface(v)
    }
}

impl From<CoreDumpListing> for CommandOutput {
    fn from(v: CoreDumpListing) -> Self {
        CommandOutput::CoreDumps(v)
    }
}

impl From<Vec<String>> for CommandOutput {
    fn from(v: Vec<String>) -> Self {
        CommandOutput::Lines(v)
    }
}
