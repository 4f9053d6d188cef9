//! Device monitor events.
//!
//! Every well-known topic has its own variant with a typed payload, so
//! publishers and subscribers agree on the shape at compile time. Topics
//! that only exist at runtime travel as [`Event::Dynamic`] and are checked
//! against the [`EventSchema`](crate::schema::EventSchema) table instead.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Topic names used as keys on the event bus.
pub mod topics {
    pub const DEVICE_CONNECTION_CHANGED: &str = "device_connection_changed";
    pub const SESSION_STATE_CHANGED: &str = "session_state_changed";
    pub const REBOOT_REQUESTED: &str = "reboot_requested";
    pub const REBOOT_COMPLETED: &str = "reboot_completed";
    pub const DEVICE_INFO_UPDATED: &str = "device_info_updated";
    pub const SYMPHONY_STATUS_UPDATED: &str = "symphony_status_updated";
    pub const SYMPHONY_GROUP_UPDATED: &str = "symphony_group_updated";
    pub const SYMPHONY_VOLUME_UPDATED: &str = "symphony_volume_updated";
    pub const QS_STATE_CHANGED: &str = "qs_state_changed";
    pub const SYMPHONY_GROUP_STATE_CHANGED: &str = "symphony_group_state_changed";
    pub const PREFERENCE_DATA_UPDATED: &str = "preference_data_updated";
    pub const NETWORK_INTERFACE_UPDATED: &str = "network_interface_updated";
    pub const CRASH_DETECTED: &str = "crash_detected";
}

/// An event published on the [`EventManager`](crate::eventbus::EventManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// Device attached or detached.
    DeviceConnectionChanged {
        connected: bool,
        device_serial: String,
        /// usb | wifi | network
        connection_type: String,
    },
    /// Monitoring session state changed.
    SessionStateChanged {
        /// running | stopped | paused
        state: String,
        manual: bool,
        previous_state: String,
    },
    /// A reboot was requested by the user or a feature.
    RebootRequested { sync_before_reboot: bool },
    /// A reboot command finished.
    RebootCompleted { success: bool },
    /// Dynamic device information was refreshed.
    DeviceInfoUpdated { info: Map<String, Value> },
    /// Q-Symphony status was refreshed.
    SymphonyStatusUpdated {
        qs_state: String,
        sound_mode: String,
        mode_type_display: String,
    },
    /// Q-Symphony group mode was refreshed.
    SymphonyGroupUpdated { group_mode: String },
    /// Q-Symphony volume offset was refreshed.
    SymphonyVolumeUpdated { volume: Option<i64> },
    /// Q-Symphony or ACM state changed.
    QsStateChanged {
        qs_state: String,
        acm_service_state: String,
    },
    /// Combined Q-Symphony state flipped between "On" and "Off".
    SymphonyGroupStateChanged { state: String },
    /// Preference data file was re-read.
    PreferenceDataUpdated {
        acm_service_state: String,
        multiroom_grouptype: String,
        multiroom_mode: String,
    },
    /// Network interface information was refreshed.
    NetworkInterfaceUpdated {
        ipv4: String,
        ipv6: String,
        flags: Vec<String>,
    },
    /// A new core dump appeared on the device.
    CrashDetected { crash_info: Value },
    /// Runtime topic without a compiled payload type.
    Dynamic {
        topic: String,
        payload: Map<String, Value>,
    },
}

impl Event {
    /// Create a dynamic event.
    pub fn dynamic(topic: impl Into<String>, payload: Map<String, Value>) -> Self {
        Event::Dynamic {
            topic: topic.into(),
            payload,
        }
    }

    /// Topic this event is delivered on.
    pub fn topic(&self) -> &str {
        match self {
            Event::DeviceConnectionChanged { .. } => topics::DEVICE_CONNECTION_CHANGED,
            Event::SessionStateChanged { .. } => topics::SESSION_STATE_CHANGED,
            Event::RebootRequested { .. } => topics::REBOOT_REQUESTED,
            Event::RebootCompleted { .. } => topics::REBOOT_COMPLETED,
            Event::DeviceInfoUpdated { .. } => topics::DEVICE_INFO_UPDATED,
            Event::SymphonyStatusUpdated { .. } => topics::SYMPHONY_STATUS_UPDATED,
            Event::SymphonyGroupUpdated { .. } => topics::SYMPHONY_GROUP_UPDATED,
            Event::SymphonyVolumeUpdated { .. } => topics::SYMPHONY_VOLUME_UPDATED,
            Event::QsStateChanged { .. } => topics::QS_STATE_CHANGED,
            Event::SymphonyGroupStateChanged { .. } => topics::SYMPHONY_GROUP_STATE_CHANGED,
            Event::PreferenceDataUpdated { .. } => topics::PREFERENCE_DATA_UPDATED,
            Event::NetworkInterfaceUpdated { .. } => topics::NETWORK_INTERFACE_UPDATED,
            Event::CrashDetected { .. } => topics::CRASH_DETECTED,
            Event::Dynamic { topic, .. } => topic,
        }
    }

    /// Whether this event travels without a compiled payload type.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Event::Dynamic { .. })
    }

    /// The payload as a JSON object.
    pub fn payload(&self) -> Map<String, Value> {
        if let Event::Dynamic { payload, .. } = self {
            return payload.clone();
        }
        match serde_json::to_value(self) {
            Ok(Value::Object(mut obj)) => match obj.remove("payload") {
                Some(Value::Object(payload)) => payload,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}
