//! ==============================================================================
//! registry.rs - paired device records
//! ==============================================================================
//!
//! purpose:
//!     maps device identifiers to their persistent records.
//!     iteration order is pairing order; the orchestrator walks it to decide
//!     whom to poll next.
//!
//! ownership:
//!     the registry lives inside the orchestrator. nothing else mutates a
//!     DeviceRecord; status readers only ever see snapshots.
//!
//! ==============================================================================

use rand::RngCore;
use serde::Deserialize;

use crate::domain::{DeviceSnapshot, PollingPhase};
use crate::error::RegistryError;
use crate::protocol::payload::{DataPayload, HealthPayload, UNKNOWN_BATTERY, UNKNOWN_RSSI, UNKNOWN_SNR};
use crate::protocol::DELIMITER;

/// generated secrets are 16 random bytes in hex
const SECRET_BYTES: usize = 16;
const MAX_ID_LEN: usize = 32;

/// pairing input, shared by the config file and the control api
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairRequest {
    pub device_id: String,
    #[serde(default)]
    pub table_left: Option<String>,
    #[serde(default)]
    pub table_right: Option<String>,
    /// generated when absent
    #[serde(default)]
    pub secret: Option<String>,
}

impl PairRequest {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: String,
    pub shared_secret: String,
    pub paired: bool,
    pub table_left: String,
    pub table_right: String,

    // cycle state
    pub phase: PollingPhase,
    pub retry_count: u32,
    pub last_contact: Option<u64>,
    pub command_sent: bool,
    /// Complete or Error from the most recent finished cycle
    pub last_outcome: Option<PollingPhase>,

    // health
    pub battery: i32,
    pub rssi: i32,
    pub snr: i32,
    pub online: bool,

    // data collection progress
    pub positions_received: u32,
    pub expected_positions: Option<u32>,
    pub last_table_id: String,
    pub last_position: String,
    pub last_detections: String,
    pub results: Vec<DataPayload>,

    // statistics
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
}

impl DeviceRecord {
    fn new(device_id: String, shared_secret: String, table_left: String, table_right: String) -> Self {
        Self {
            device_id,
            shared_secret,
            paired: true,
            table_left,
            table_right,
            phase: PollingPhase::Idle,
            retry_count: 0,
            last_contact: None,
            command_sent: false,
            last_outcome: None,
            battery: UNKNOWN_BATTERY,
            rssi: UNKNOWN_RSSI,
            snr: UNKNOWN_SNR,
            online: false,
            positions_received: 0,
            expected_positions: None,
            last_table_id: String::new(),
            last_position: String::new(),
            last_detections: String::new(),
            results: Vec::new(),
            total_polls: 0,
            successful_polls: 0,
            failed_polls: 0,
        }
    }

    /// clear per-cycle progress before a new cycle starts
    pub fn begin_cycle(&mut self) {
        self.retry_count = 0;
        self.command_sent = false;
        self.positions_received = 0;
        self.expected_positions = None;
        self.results.clear();
    }

    pub fn apply_health(&mut self, health: &HealthPayload) {
        self.battery = health.battery;
        self.rssi = health.rssi;
        self.snr = health.snr;
        self.online = true;
    }

    /// records one position's results; false for a repeated position index
    pub fn apply_data(&mut self, data: DataPayload) -> bool {
        let repeated = data.position_index.is_some()
            && self
                .results
                .iter()
                .any(|r| r.position_index == data.position_index);
        if repeated {
            return false;
        }
        if self.expected_positions.is_none() {
            self.expected_positions = data.total_positions;
        }
        self.positions_received += 1;
        self.last_table_id.clone_from(&data.table_id);
        self.last_position.clone_from(&data.position);
        self.last_detections.clone_from(&data.detections);
        self.results.push(data);
        true
    }

    pub fn all_positions_received(&self) -> bool {
        self.expected_positions
            .is_some_and(|total| self.positions_received >= total)
    }

    pub fn snapshot(&self, polling: bool) -> DeviceSnapshot {
        DeviceSnapshot {
            device_id: self.device_id.clone(),
            online: self.online,
            polling,
            phase: self.phase,
            last_outcome: self.last_outcome,
            battery: self.battery,
            rssi: self.rssi,
            snr: self.snr,
            last_contact: self.last_contact,
            table_left: self.table_left.clone(),
            table_right: self.table_right.clone(),
            positions_received: self.positions_received,
            expected_positions: self.expected_positions,
            total_polls: self.total_polls,
            successful_polls: self.successful_polls,
            failed_polls: self.failed_polls,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pair(&mut self, request: PairRequest) -> Result<&DeviceRecord, RegistryError> {
        let id = request.device_id.trim().to_string();
        validate_id(&id)?;
        if self.contains(&id) {
            return Err(RegistryError::AlreadyPaired(id));
        }

        let secret = match request.secret.filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => generate_secret(),
        };
        let record = DeviceRecord::new(
            id,
            secret,
            request.table_left.unwrap_or_default(),
            request.table_right.unwrap_or_default(),
        );
        tracing::info!("[REGISTRY] Paired {}", record.device_id);
        self.devices.push(record);
        Ok(&self.devices[self.devices.len() - 1])
    }

    pub fn unpair(&mut self, device_id: &str) -> Result<DeviceRecord, RegistryError> {
        let index = self
            .position(device_id)
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;
        let record = self.devices.remove(index);
        tracing::info!("[REGISTRY] Removed {}", record.device_id);
        Ok(record)
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut DeviceRecord> {
        self.devices.iter_mut().find(|d| d.device_id == device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.get(device_id).is_some()
    }

    /// index in pairing order
    pub fn position(&self, device_id: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.device_id == device_id)
    }

    /// identifiers in pairing order
    pub fn ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.device_id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn validate_id(id: &str) -> Result<(), RegistryError> {
    let bad = id.is_empty()
        || id.len() > MAX_ID_LEN
        || id.contains(DELIMITER)
        || id.chars().any(char::is_whitespace);
    if bad {
        return Err(RegistryError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut key = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}
