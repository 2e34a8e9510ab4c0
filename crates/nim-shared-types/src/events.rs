//! Publications produced by the core (spec §6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::dpc::{Dpc, DpcKey};

/// Type of change a Sync pass applied to an item, surfaced to listeners that
/// only care about what moved rather than the full node state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Modify,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigChange {
    pub change_type: ChangeType,
    pub target: String,
    pub old_config: Option<serde_json::Value>,
    pub new_config: Option<serde_json::Value>,
    pub description: String,
}

/// Derived blink-count for the LED indicator collaborator (spec §7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedBlinkCount {
    WaitingForIp,
    Connecting,
    ConnectedNotOnboarded,
    ConnectedOnboarded,
    AirplaneMode,
    OnboardingFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceNetworkStatus {
    pub dpc_key: Option<DpcKey>,
    pub state: crate::dpc::DpcState,
    pub usable_address_count: usize,
    pub radio_silence: bool,
    pub led_blink: LedBlinkCount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevicePortConfigListStatus {
    pub current_index: Option<usize>,
    pub entries: Vec<Dpc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInstanceStatus {
    pub uuid: Uuid,
    pub bridge_name: String,
    pub selected_uplink: Option<String>,
    pub activated: bool,
    pub validation_err: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppNetworkStatus {
    pub app_uuid: Uuid,
    pub ni_uuid: Uuid,
    pub host_if_name: String,
    pub acl_rule_count: usize,
    pub validation_err: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    DeviceNetworkStatusChanged { status: DeviceNetworkStatus },
    DevicePortConfigListChanged { status: DevicePortConfigListStatus },
    NetworkInstanceStatusChanged { status: NetworkInstanceStatus },
    AppNetworkStatusChanged { status: AppNetworkStatus },
    /// A reconciler Sync pass applied one or more item-level changes.
    GraphApplied { changes: Vec<ConfigChange> },
    /// Custom extensibility hook, kept for forward compatibility with new
    /// publication kinds this core does not yet define.
    Custom {
        name: String,
        data: HashMap<String, serde_json::Value>,
    },
}
