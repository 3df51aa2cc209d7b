use serde::{Deserialize, Serialize};

/// a device's position in its polling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollingPhase {
    #[default]
    Idle,
    HealthCheck,
    StartInference,
    DataCollection,
    Finalize,
    Complete,
    Error,
}

impl PollingPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PollingPhase::Idle => "IDLE",
            PollingPhase::HealthCheck => "HEALTH_CHECK",
            PollingPhase::StartInference => "START_INFERENCE",
            PollingPhase::DataCollection => "DATA_COLLECTION",
            PollingPhase::Finalize => "FINALIZE",
            PollingPhase::Complete => "COMPLETE",
            PollingPhase::Error => "ERROR",
        }
    }

    /// Complete and Error end the device's cycle
    pub fn is_terminal(self) -> bool {
        matches!(self, PollingPhase::Complete | PollingPhase::Error)
    }
}

impl std::fmt::Display for PollingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// per-device view handed to status readers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub online: bool,
    /// true while this device is the active polling target
    pub polling: bool,
    pub phase: PollingPhase,
    pub last_outcome: Option<PollingPhase>,
    pub battery: i32,
    pub rssi: i32,
    pub snr: i32,
    /// gateway clock seconds of the last accepted frame
    pub last_contact: Option<u64>,
    pub table_left: String,
    pub table_right: String,
    pub positions_received: u32,
    pub expected_positions: Option<u32>,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
}

/// gateway-wide counters
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewayStats {
    pub gateway_id: String,
    pub total_devices: usize,
    pub online_devices: usize,
    /// frames transmitted plus frames accepted
    pub total_messages: u64,
    /// successful / total polls in percent, 0 before the first cycle ends
    pub success_rate: f64,
    pub uptime_secs: u64,
}

/// what the polling loop is doing right now
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PollingStatus {
    pub polling_active: bool,
    pub current_device_index: usize,
    pub total_devices: usize,
    pub current_device_id: Option<String>,
    pub current_phase: Option<PollingPhase>,
    pub queued: usize,
}

/// read-mostly copy published after every orchestrator step
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewaySnapshot {
    pub polling: PollingStatus,
    pub devices: Vec<DeviceSnapshot>,
    pub stats: GatewayStats,
}
