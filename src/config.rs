//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `gateway.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - GatewaySection: identity on the radio link (gateway_id)
//!     - RadioConfig: where the modem bridge lives
//!     - SecurityConfig: authentication profile and freshness policy
//!     - TimingConfig: per-phase timeouts, retry ceiling, backoff base
//!     - PollingConfig: tick rate and automatic rounds
//!     - ApiConfig: control api bind address
//!     - devices: paired at startup
//!
//! every section is optional; missing keys take the field-observed defaults.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::{OrchestratorConfig, Policy, Timing};
use crate::protocol::clock::TIMESTAMP_TOLERANCE_SECS;
use crate::protocol::{AuthMode, FrameProfile};
use crate::registry::PairRequest;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub gateway: GatewaySection,
    pub radio: RadioConfig,
    pub security: SecurityConfig,
    pub timing: TimingConfig,
    pub polling: PollingConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub devices: Vec<PairRequest>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewaySection {
    pub id: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self { id: "GW01".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RadioConfig {
    /// local udp address frames are received on
    pub bind: SocketAddr,
    /// modem bridge that puts frames on the air
    pub modem: SocketAddr,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5700)),
            modem: SocketAddr::from(([127, 0, 0, 1], 5701)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub auth: AuthMode,
    pub strict_timestamps: bool,
    pub check_timestamps: bool,
    pub timestamp_tolerance_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth: AuthMode::Open,
            strict_timestamps: false,
            check_timestamps: false,
            timestamp_tolerance_secs: TIMESTAMP_TOLERANCE_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub health_check_timeout_ms: u64,
    pub start_inference_timeout_ms: u64,
    pub data_collection_timeout_ms: u64,
    pub finalize_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            health_check_timeout_ms: 15_000,
            start_inference_timeout_ms: 5_000,
            data_collection_timeout_ms: 120_000,
            finalize_timeout_ms: 10_000,
            max_retries: 3,
            backoff_base_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub tick_interval_ms: u64,
    /// 0 = rounds only start on request
    pub cycle_interval_seconds: u64,
    pub sleep_after_finalize: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            cycle_interval_seconds: 0,
            sleep_after_finalize: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl GatewayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Load with default fallback.
    /// an explicit path must load; the search paths are best effort.
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            println!("[CONFIG] Loaded from {}", path.display());
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("gateway.toml"),
            PathBuf::from("..").join("config").join("gateway.toml"),
        ];
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Ok(Self::default())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let t = &self.timing;
        OrchestratorConfig {
            gateway_id: self.gateway.id.clone(),
            timing: Timing {
                health_check: Duration::from_millis(t.health_check_timeout_ms),
                start_inference: Duration::from_millis(t.start_inference_timeout_ms),
                data_collection: Duration::from_millis(t.data_collection_timeout_ms),
                finalize: Duration::from_millis(t.finalize_timeout_ms),
                max_retries: t.max_retries,
                backoff_base: Duration::from_millis(t.backoff_base_ms),
            },
            policy: Policy {
                profile: FrameProfile {
                    auth: self.security.auth,
                    strict_timestamps: self.security.strict_timestamps,
                },
                check_timestamps: self.security.check_timestamps,
                timestamp_tolerance_secs: self.security.timestamp_tolerance_secs,
                sleep_after_finalize: self.polling.sleep_after_finalize,
            },
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let rounds = match self.polling.cycle_interval_seconds {
            0 => "manual".to_string(),
            s => format!("every {}s", s),
        };
        println!("┌─────────────────────────────────────────┐");
        println!("│          GATEWAY CONFIGURATION          │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Gateway ID: {:<28}│", self.gateway.id);
        println!("│ Radio bind: {:<28}│", self.radio.bind.to_string());
        println!("│ Modem:      {:<28}│", self.radio.modem.to_string());
        println!("│ Auth:       {:<28}│", format!("{:?}", self.security.auth).to_lowercase());
        println!("│ Rounds:     {:<28}│", rounds);
        println!("│ Devices:    {:<28}│", self.devices.len());
        println!("│ API:        {:<28}│", if self.api.enabled { self.api.bind.to_string() } else { "disabled".to_string() });
        println!("│ Log Level:  {:<28}│", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
