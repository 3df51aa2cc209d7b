//! ==============================================================================
//! orchestrator.rs - sequential polling state machine
//! ==============================================================================
//!
//! purpose:
//!     drives one field device at a time through its cycle:
//!
//! ```text
//!     IDLE -> HEALTH_CHECK -> START_INFERENCE -> DATA_COLLECTION -> FINALIZE -> COMPLETE
//!                  |                |                                  |
//!                  +----------------+------------- ERROR <-------------+
//! ```
//!
//! ```text
//!     the radio is half-duplex and exclusive: only the active device is ever
//!     addressed, and frames from anyone else are dropped.
//! ```
//!
//! driving model:
//!     cooperative. the owner calls `tick()` periodically and `on_frame()` for
//!     every received buffer. nothing here blocks or sleeps; waiting is simply
//!     "no transition until a deadline passes or a matching reply arrives".
//!
//! timing:
//!     - timeout: how long to wait for a reply after sending (per phase)
//!     - backoff: how long to wait before resending after a timeout
//!       (base doubling per retry, counter reset on phase entry)
//!
//! relationships:
//!     - uses: protocol/* (build, parse, verify, decode)
//!     - uses: registry.rs (owns every DeviceRecord)
//!     - uses: transport.rs (outbound frames)
//!     - used by: main.rs (tick/receive loop), api.rs (via Control messages)
//!
//! ==============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{GatewaySnapshot, GatewayStats, PollingPhase, PollingStatus};
use crate::error::{AuthError, InboundError, PollError, RegistryError};
use crate::protocol::clock::{self, Clock, TIMESTAMP_TOLERANCE_SECS};
use crate::protocol::codec::{self, SequenceCounter};
use crate::protocol::payload::{DataPayload, HealthPayload};
use crate::protocol::{auth, Command, FrameProfile, Reply, EMPTY_PAYLOAD};
use crate::registry::{DeviceRecord, DeviceRegistry, PairRequest};
use crate::transport::Transport;

// ==============================================================================
// configuration
// ==============================================================================

#[derive(Debug, Clone)]
pub struct Timing {
    pub health_check: Duration,
    pub start_inference: Duration,
    pub data_collection: Duration,
    pub finalize: Duration,
    /// resends allowed per phase after the first attempt
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            health_check: Duration::from_secs(15),
            start_inference: Duration::from_secs(5),
            data_collection: Duration::from_secs(120),
            finalize: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl Timing {
    fn timeout_ms(&self, phase: PollingPhase) -> u64 {
        let timeout = match phase {
            PollingPhase::HealthCheck => self.health_check,
            PollingPhase::StartInference => self.start_inference,
            PollingPhase::DataCollection => self.data_collection,
            PollingPhase::Finalize => self.finalize,
            PollingPhase::Idle | PollingPhase::Complete | PollingPhase::Error => Duration::ZERO,
        };
        timeout.as_millis() as u64
    }

    /// delay before resend number `retry` (1-based): base, 2*base, 4*base, ...
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let base = self.backoff_base.as_millis() as u64;
        base.saturating_mul(1u64 << retry.saturating_sub(1).min(32))
    }
}

/// deployment policies that are off in the observed field profile
#[derive(Debug, Clone)]
pub struct Policy {
    pub profile: FrameProfile,
    /// reject replies whose timestamp is outside the tolerance window
    pub check_timestamps: bool,
    pub timestamp_tolerance_secs: u64,
    /// send SLEEP once a cycle completes
    pub sleep_after_finalize: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            profile: FrameProfile::default(),
            check_timestamps: false,
            timestamp_tolerance_secs: TIMESTAMP_TOLERANCE_SECS,
            sleep_after_finalize: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub gateway_id: String,
    pub timing: Timing,
    pub policy: Policy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway_id: "GW01".to_string(),
            timing: Timing::default(),
            policy: Policy::default(),
        }
    }
}

// ==============================================================================
// external control
// ==============================================================================

/// requests accepted from outside the polling loop
#[derive(Debug, Clone)]
pub enum Control {
    StartCycle,
    PollDevice(String),
    Pair(PairRequest),
    Remove(String),
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlReply {
    Started { devices: usize },
    AlreadyRunning,
    NoDevices,
    Queued { device_id: String },
    Paired { device_id: String, secret: String },
    Removed { device_id: String },
    Aborted { device_id: Option<String> },
}

// ==============================================================================
// orchestrator
// ==============================================================================

struct ActiveCycle {
    device_id: String,
    /// reply expected before this instant
    deadline_ms: Option<u64>,
    /// next resend not before this instant
    resend_at_ms: Option<u64>,
}

pub struct Orchestrator<T: Transport> {
    config: OrchestratorConfig,
    clock: Clock,
    transport: T,
    registry: DeviceRegistry,
    queue: VecDeque<String>,
    active: Option<ActiveCycle>,
    sequence: SequenceCounter,
    round_total: usize,
    round_done: usize,
    messages: u64,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(config: OrchestratorConfig, clock: Clock, transport: T) -> Self {
        Self {
            config,
            clock,
            transport,
            registry: DeviceRegistry::new(),
            queue: VecDeque::new(),
            active: None,
            sequence: SequenceCounter::default(),
            round_total: 0,
            round_done: 0,
            messages: 0,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.registry.get(device_id)
    }

    pub fn active_device(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.device_id.as_str())
    }

    /// a device is being serviced or waiting in the queue
    pub fn is_polling(&self) -> bool {
        self.active.is_some() || !self.queue.is_empty()
    }

    // --------------------------------------------------------------------------
    // control surface
    // --------------------------------------------------------------------------

    pub fn apply(&mut self, control: Control) -> Result<ControlReply, RegistryError> {
        match control {
            Control::StartCycle => Ok(self.start_cycle()),
            Control::PollDevice(id) => self.poll_device(&id),
            Control::Pair(request) => self.pair(request),
            Control::Remove(id) => self.unpair(&id),
            Control::Abort => Ok(ControlReply::Aborted {
                device_id: self.abort(),
            }),
        }
    }

    /// queue every paired device, in pairing order
    pub fn start_cycle(&mut self) -> ControlReply {
        if self.is_polling() {
            return ControlReply::AlreadyRunning;
        }
        if self.registry.is_empty() {
            return ControlReply::NoDevices;
        }
        let ids = self.registry.ids();
        let devices = ids.len();
        tracing::info!("[POLL] Starting round over {} devices", devices);
        self.round_total = devices;
        self.round_done = 0;
        self.queue.extend(ids);
        self.start_next(self.clock.now_millis());
        ControlReply::Started { devices }
    }

    /// queue one device now; no-op if it is already active or queued
    pub fn poll_device(&mut self, device_id: &str) -> Result<ControlReply, RegistryError> {
        if !self.registry.contains(device_id) {
            return Err(RegistryError::NotFound(device_id.to_string()));
        }
        let pending = self.active_device() == Some(device_id) || self.queue.iter().any(|q| q == device_id);
        if !pending {
            self.queue.push_back(device_id.to_string());
            self.round_total += 1;
            self.start_next(self.clock.now_millis());
        }
        Ok(ControlReply::Queued {
            device_id: device_id.to_string(),
        })
    }

    pub fn pair(&mut self, request: PairRequest) -> Result<ControlReply, RegistryError> {
        let record = self.registry.pair(request)?;
        Ok(ControlReply::Paired {
            device_id: record.device_id.clone(),
            secret: record.shared_secret.clone(),
        })
    }

    /// removing the active device aborts its cycle first
    pub fn unpair(&mut self, device_id: &str) -> Result<ControlReply, RegistryError> {
        if !self.registry.contains(device_id) {
            return Err(RegistryError::NotFound(device_id.to_string()));
        }
        if self.active_device() == Some(device_id) {
            self.abort();
        }
        let queued = self.queue.len();
        self.queue.retain(|q| q != device_id);
        self.round_total = self.round_total.saturating_sub(queued - self.queue.len());
        self.registry.unpair(device_id)?;
        Ok(ControlReply::Removed {
            device_id: device_id.to_string(),
        })
    }

    /// force the active device to Error without waiting out its timeout
    pub fn abort(&mut self) -> Option<String> {
        let device_id = self.active_device()?.to_string();
        tracing::warn!("[POLL] {}: cycle aborted", device_id);
        self.fail(self.clock.now_millis(), PollError::Aborted);
        Some(device_id)
    }

    // --------------------------------------------------------------------------
    // driving
    // --------------------------------------------------------------------------

    /// check deadlines, resend after backoff, pick up the next device
    pub fn tick(&mut self) {
        let now = self.clock.now_millis();
        let Some(active) = self.active.as_ref() else {
            self.start_next(now);
            return;
        };
        let (deadline, resend_at) = (active.deadline_ms, active.resend_at_ms);
        let Some(record) = self.registry.get(&active.device_id) else {
            self.active = None;
            self.start_next(now);
            return;
        };
        let (phase, sent) = (record.phase, record.command_sent);
        let expired = deadline.is_some_and(|d| now >= d);

        match phase {
            PollingPhase::HealthCheck | PollingPhase::StartInference | PollingPhase::Finalize => {
                if !sent {
                    if resend_at.map_or(true, |t| now >= t) {
                        self.send_phase_command(now);
                    }
                } else if expired {
                    self.on_timeout(now, phase);
                }
            }
            PollingPhase::DataCollection => {
                if expired {
                    self.on_data_timeout(now);
                }
            }
            PollingPhase::Idle | PollingPhase::Complete | PollingPhase::Error => {}
        }
    }

    /// handle one received radio buffer; errors mean the frame was dropped
    pub fn on_frame(&mut self, raw: &[u8]) -> Result<(), InboundError> {
        let result = self.accept(raw);
        if let Err(err) = &result {
            match err {
                InboundError::NotForUs(_) | InboundError::NotActive(_) => {
                    tracing::debug!("[PROTOCOL] Discarded frame: {}", err)
                }
                _ => tracing::warn!("[PROTOCOL] Dropped frame: {}", err),
            }
        }
        result
    }

    fn accept(&mut self, raw: &[u8]) -> Result<(), InboundError> {
        let now = self.clock.now_millis();
        let text = codec::frame_text(raw)?;
        let msg = codec::parse(raw, &self.config.policy.profile)?;
        tracing::debug!("[RADIO] <- {}", text);

        if msg.target != self.config.gateway_id {
            return Err(InboundError::NotForUs(msg.target));
        }
        let device_id = match &self.active {
            Some(active) if active.device_id == msg.sender => active.device_id.clone(),
            _ => return Err(InboundError::NotActive(msg.sender)),
        };
        let record = self
            .registry
            .get(&device_id)
            .ok_or_else(|| InboundError::NotActive(msg.sender.clone()))?;

        if msg.tag.is_some() && !auth::verify(text, &record.shared_secret) {
            return Err(AuthError::TagMismatch { sender: msg.sender }.into());
        }
        let local = self.clock.now();
        let policy = &self.config.policy;
        if policy.check_timestamps
            && !clock::within_tolerance(msg.timestamp, local, policy.timestamp_tolerance_secs)
        {
            return Err(AuthError::StaleTimestamp {
                remote: msg.timestamp,
                local,
            }
            .into());
        }

        let phase = record.phase;
        let reply = Reply::parse(&msg.command)
            .filter(|reply| expected_in(phase, *reply))
            .ok_or_else(|| InboundError::Unexpected {
                command: msg.command.clone(),
                phase: phase.as_str(),
            })?;
        let data = match reply {
            Reply::Data => Some(DataPayload::decode(&msg.payload).ok_or_else(|| InboundError::BadPayload {
                command: msg.command.clone(),
                payload: msg.payload.clone(),
            })?),
            _ => None,
        };

        // only frames that made it this far count as contact
        self.messages += 1;
        if let Some(record) = self.registry.get_mut(&device_id) {
            record.last_contact = Some(local);
        }

        match (phase, reply, data) {
            (PollingPhase::HealthCheck, Reply::Online, _) => {
                let health = HealthPayload::decode(&msg.payload);
                if let Some(record) = self.registry.get_mut(&device_id) {
                    record.apply_health(&health);
                }
                tracing::info!(
                    "[POLL] {}: online (battery {}%, rssi {} dBm, snr {})",
                    device_id,
                    health.battery,
                    health.rssi,
                    health.snr
                );
                self.enter_phase(now, PollingPhase::StartInference);
            }
            (PollingPhase::StartInference, Reply::Inferring, _) => {
                self.enter_phase(now, PollingPhase::DataCollection);
            }
            (PollingPhase::StartInference, Reply::Data, Some(data)) => {
                tracing::info!("[POLL] {}: data before INFERRING, treating as acknowledged", device_id);
                self.enter_phase(now, PollingPhase::DataCollection);
                self.on_data(now, data);
            }
            (PollingPhase::DataCollection, Reply::Data, Some(data)) => self.on_data(now, data),
            (PollingPhase::Finalize, Reply::Finalized, _) => {
                self.enter_phase(now, PollingPhase::Complete);
            }
            _ => tracing::debug!("[POLL] {}: ignoring {} in {}", device_id, msg.command, phase),
        }
        Ok(())
    }

    fn on_data(&mut self, now: u64, data: DataPayload) {
        let ack = data.progress_label().unwrap_or_else(|| EMPTY_PAYLOAD.to_string());
        let timeout = self.config.timing.timeout_ms(PollingPhase::DataCollection);

        let Some(record) = self.active_record() else {
            return;
        };
        let device_id = record.device_id.clone();
        let position = data.position.clone();
        if record.apply_data(data) {
            tracing::info!(
                "[POLL] {}: {} @ {} -> {} ({}/{})",
                device_id,
                record.last_table_id,
                position,
                record.last_detections,
                record.positions_received,
                record.expected_positions.map_or("?".to_string(), |t| t.to_string())
            );
        } else {
            tracing::debug!("[POLL] {}: repeated position {}, not counted", device_id, position);
        }
        let done = record.all_positions_received();

        self.transmit(&device_id, Command::Ack, &ack);
        if let Some(active) = self.active.as_mut() {
            active.deadline_ms = Some(now + timeout);
        }
        if done {
            self.enter_phase(now, PollingPhase::Finalize);
        }
    }

    // --------------------------------------------------------------------------
    // transitions
    // --------------------------------------------------------------------------

    fn active_record(&mut self) -> Option<&mut DeviceRecord> {
        let id = self.active.as_ref()?.device_id.as_str();
        self.registry.get_mut(id)
    }

    fn start_next(&mut self, now: u64) {
        if self.active.is_some() {
            return;
        }
        while let Some(device_id) = self.queue.pop_front() {
            let Some(record) = self.registry.get_mut(&device_id) else {
                self.round_done += 1;
                continue;
            };
            record.begin_cycle();
            self.active = Some(ActiveCycle {
                device_id,
                deadline_ms: None,
                resend_at_ms: None,
            });
            self.enter_phase(now, PollingPhase::HealthCheck);
            return;
        }
        if self.round_total > 0 {
            tracing::info!("[POLL] Round finished ({} devices)", self.round_done);
        }
        self.round_total = 0;
        self.round_done = 0;
    }

    fn enter_phase(&mut self, now: u64, phase: PollingPhase) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.deadline_ms = None;
        active.resend_at_ms = None;
        if let Some(record) = self.registry.get_mut(&active.device_id) {
            tracing::info!("[POLL] {}: {} -> {}", record.device_id, record.phase, phase);
            record.phase = phase;
            record.retry_count = 0;
            record.command_sent = false;
        }

        match phase {
            PollingPhase::HealthCheck | PollingPhase::StartInference | PollingPhase::Finalize => {
                self.send_phase_command(now)
            }
            PollingPhase::DataCollection => {
                active.deadline_ms = Some(now + self.config.timing.timeout_ms(phase));
            }
            PollingPhase::Complete => self.finish_cycle(now, Ok(())),
            PollingPhase::Idle | PollingPhase::Error => {}
        }
    }

    fn send_phase_command(&mut self, now: u64) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let device_id = active.device_id.clone();
        let Some(phase) = self.registry.get(&device_id).map(|r| r.phase) else {
            return;
        };
        let command = match phase {
            PollingPhase::HealthCheck => Command::Poll,
            PollingPhase::StartInference => Command::StartInference,
            PollingPhase::Finalize => Command::Finalize,
            _ => return,
        };

        self.transmit(&device_id, command, EMPTY_PAYLOAD);
        if let Some(record) = self.registry.get_mut(&device_id) {
            record.command_sent = true;
        }
        let timeout = self.config.timing.timeout_ms(phase);
        if let Some(active) = self.active.as_mut() {
            active.deadline_ms = Some(now + timeout);
            active.resend_at_ms = None;
        }
    }

    fn on_timeout(&mut self, now: u64, phase: PollingPhase) {
        let max_retries = self.config.timing.max_retries;
        let waited = self.config.timing.timeout_ms(phase) / 1000;
        let Some(record) = self.active_record() else {
            return;
        };
        record.retry_count += 1;
        record.command_sent = false;
        let attempts = record.retry_count;
        let device_id = record.device_id.clone();

        if attempts > max_retries {
            let err = match phase {
                PollingPhase::HealthCheck => PollError::OfflineDevice(device_id),
                _ => PollError::RetryExhausted {
                    phase: phase.as_str(),
                    attempts,
                },
            };
            self.fail(now, err);
            return;
        }

        let delay = self.config.timing.backoff_ms(attempts);
        tracing::warn!(
            "[POLL] {}: {} in {}, retry {}/{} in {}ms",
            device_id,
            PollError::Timeout(waited),
            phase,
            attempts,
            max_retries,
            delay
        );
        if let Some(active) = self.active.as_mut() {
            active.deadline_ms = None;
            active.resend_at_ms = Some(now + delay);
        }
    }

    /// partial data beats none: a silent data phase still finalizes
    fn on_data_timeout(&mut self, now: u64) {
        if let Some(record) = self.active_record() {
            match record.expected_positions {
                Some(total) if record.positions_received < total => tracing::warn!(
                    "[POLL] {}: data timeout with {}/{} positions, finalizing partial results",
                    record.device_id,
                    record.positions_received,
                    total
                ),
                None if record.positions_received == 0 => tracing::warn!(
                    "[POLL] {}: data timeout without any results, finalizing",
                    record.device_id
                ),
                _ => tracing::info!(
                    "[POLL] {}: data collection idle, finalizing {} positions",
                    record.device_id,
                    record.positions_received
                ),
            }
        }
        self.enter_phase(now, PollingPhase::Finalize);
    }

    fn fail(&mut self, now: u64, err: PollError) {
        if let Some(record) = self.active_record() {
            if matches!(err, PollError::OfflineDevice(_)) {
                record.online = false;
            }
            tracing::info!("[POLL] {}: {} -> {}", record.device_id, record.phase, PollingPhase::Error);
            record.phase = PollingPhase::Error;
        }
        self.finish_cycle(now, Err(err));
    }

    /// book the outcome, return the device to Idle and move on
    fn finish_cycle(&mut self, now: u64, result: Result<(), PollError>) {
        let Some(active) = self.active.take() else {
            return;
        };
        if result.is_ok() && self.config.policy.sleep_after_finalize {
            self.transmit(&active.device_id, Command::Sleep, EMPTY_PAYLOAD);
        }
        if let Some(record) = self.registry.get_mut(&active.device_id) {
            record.total_polls += 1;
            match &result {
                Ok(()) => {
                    record.successful_polls += 1;
                    tracing::info!(
                        "[POLL] {}: cycle complete, {} positions collected",
                        record.device_id,
                        record.positions_received
                    );
                }
                Err(err) => {
                    record.failed_polls += 1;
                    tracing::warn!("[POLL] {}: cycle failed: {}", record.device_id, err);
                }
            }
            record.last_outcome = record.phase.is_terminal().then_some(record.phase);
            record.phase = PollingPhase::Idle;
            record.command_sent = false;
        }
        self.round_done += 1;
        self.start_next(now);
    }

    fn transmit(&mut self, device_id: &str, command: Command, payload: &str) {
        let Some(record) = self.registry.get(device_id) else {
            return;
        };
        let secret = self
            .config
            .policy
            .profile
            .auth
            .signs_outbound()
            .then_some(record.shared_secret.as_str());
        let sequence = self.sequence.next();
        let frame = codec::build(
            &self.config.gateway_id,
            command.as_str(),
            device_id,
            &sequence,
            self.clock.now(),
            payload,
            secret,
        );
        tracing::debug!("[RADIO] -> {}", String::from_utf8_lossy(&frame));
        self.messages += 1;
        // a lost frame looks like silence; the phase timeout covers it
        if let Err(err) = self.transport.send(&frame) {
            tracing::warn!("[RADIO] {} to {} not sent: {}", command.as_str(), device_id, err);
        }
    }

    // --------------------------------------------------------------------------
    // status
    // --------------------------------------------------------------------------

    pub fn snapshot(&self) -> GatewaySnapshot {
        let active_id = self.active_device();
        let devices: Vec<_> = self
            .registry
            .iter()
            .map(|r| r.snapshot(Some(r.device_id.as_str()) == active_id))
            .collect();

        let (polls, successes) = devices
            .iter()
            .fold((0u64, 0u64), |(p, s), d| (p + d.total_polls, s + d.successful_polls));
        let success_rate = if polls == 0 {
            0.0
        } else {
            successes as f64 * 100.0 / polls as f64
        };

        GatewaySnapshot {
            polling: PollingStatus {
                polling_active: self.is_polling(),
                current_device_index: self.round_done,
                total_devices: self.round_total,
                current_device_id: active_id.map(str::to_string),
                current_phase: active_id.and_then(|id| self.registry.get(id)).map(|r| r.phase),
                queued: self.queue.len(),
            },
            stats: GatewayStats {
                gateway_id: self.config.gateway_id.clone(),
                total_devices: devices.len(),
                online_devices: devices.iter().filter(|d| d.online).count(),
                total_messages: self.messages,
                success_rate,
                uptime_secs: self.clock.uptime_secs(),
            },
            devices,
        }
    }
}

/// replies that make sense in `phase`; SLEEPING and late INFERRING are tolerated
fn expected_in(phase: PollingPhase, reply: Reply) -> bool {
    matches!(
        (phase, reply),
        (PollingPhase::HealthCheck, Reply::Online)
            | (PollingPhase::StartInference, Reply::Inferring | Reply::Data)
            | (PollingPhase::DataCollection, Reply::Data | Reply::Inferring)
            | (PollingPhase::Finalize, Reply::Finalized)
            | (_, Reply::Sleeping)
    )
}
