//! ==============================================================================
//! payload.rs - payload decoders
//! ==============================================================================
//!
//! purpose:
//!     interprets the payload field of ONLINE (health) and DATA frames.
//!
//! formats:
//!     health: bat_<int>:rssi_<int>:snr_<int>        any order, any subset
//!     data:   TABLE:POSITION[:DETECTIONS][:INDEX/TOTAL]
//!             detections are "label:conf%,label:conf%" and stay opaque here
//!
//! ==============================================================================

use serde::Serialize;

use super::{DELIMITER, EMPTY_PAYLOAD};

pub const UNKNOWN_BATTERY: i32 = -1;
pub const UNKNOWN_RSSI: i32 = -999;
pub const UNKNOWN_SNR: i32 = -999;

/// battery/signal telemetry from an ONLINE reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthPayload {
    pub battery: i32,
    pub rssi: i32,
    pub snr: i32,
}

impl Default for HealthPayload {
    fn default() -> Self {
        Self {
            battery: UNKNOWN_BATTERY,
            rssi: UNKNOWN_RSSI,
            snr: UNKNOWN_SNR,
        }
    }
}

impl HealthPayload {
    /// unknown tokens and unparsable values are skipped; last duplicate wins
    pub fn decode(payload: &str) -> Self {
        let mut health = Self::default();
        if is_empty(payload) {
            return health;
        }

        for token in payload.split(DELIMITER) {
            let (slot, value) = if let Some(v) = token.strip_prefix("bat_") {
                (&mut health.battery, v)
            } else if let Some(v) = token.strip_prefix("rssi_") {
                (&mut health.rssi, v)
            } else if let Some(v) = token.strip_prefix("snr_") {
                (&mut health.snr, v)
            } else {
                continue;
            };
            match value.trim().parse::<i32>() {
                Ok(v) => *slot = v,
                Err(_) => tracing::debug!("[PROTOCOL] Ignoring health token {:?}", token),
            }
        }
        health
    }
}

/// one position's inference results from a DATA frame
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DataPayload {
    pub table_id: String,
    pub position: String,
    pub detections: String,
    pub position_index: Option<u32>,
    pub total_positions: Option<u32>,
}

impl DataPayload {
    /// `None` unless the payload has at least table and position
    pub fn decode(payload: &str) -> Option<Self> {
        if is_empty(payload) {
            return None;
        }
        let (table_id, rest) = payload.split_once(DELIMITER)?;
        let (position, rest) = rest.split_once(DELIMITER)?;

        let mut data = Self {
            table_id: table_id.to_string(),
            position: position.to_string(),
            detections: rest.to_string(),
            ..Self::default()
        };

        if let Some((detections, suffix)) = rest.rsplit_once(DELIMITER) {
            // a progress suffix only counts when both halves are numbers
            if let Some((index, total)) = suffix.split_once('/') {
                if let (Ok(index), Ok(total)) = (index.trim().parse(), total.trim().parse()) {
                    data.detections = detections.to_string();
                    data.position_index = Some(index);
                    data.total_positions = Some(total);
                }
            }
        }
        Some(data)
    }

    /// "INDEX/TOTAL" when both are known
    pub fn progress_label(&self) -> Option<String> {
        match (self.position_index, self.total_positions) {
            (Some(i), Some(t)) => Some(format!("{i}/{t}")),
            _ => None,
        }
    }
}

fn is_empty(payload: &str) -> bool {
    payload.is_empty() || payload == EMPTY_PAYLOAD
}
