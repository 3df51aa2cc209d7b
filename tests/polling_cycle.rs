//! end-to-end polling rounds against simulated field devices.
//!
//! the gateway talks to `FieldDevice`s through a MemoryTransport; time is a
//! manual millisecond counter advanced in 100ms steps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lora_gateway::domain::PollingPhase;
use lora_gateway::orchestrator::{ControlReply, Orchestrator, OrchestratorConfig, Policy};
use lora_gateway::protocol::clock::Clock;
use lora_gateway::protocol::codec::{self, Message};
use lora_gateway::protocol::{AuthMode, FrameProfile};
use lora_gateway::registry::PairRequest;
use lora_gateway::transport::MemoryTransport;

const GW: &str = "GW01";
const STEP_MS: u64 = 100;

#[derive(Clone, Copy)]
enum Behavior {
    Cooperative,
    /// never answers anything
    Silent,
    /// ignores this many POLLs before answering
    MissesPolls(u32),
    /// goes quiet after sending this many positions
    StopsAfter(usize),
}

struct FieldDevice {
    id: String,
    secret: String,
    /// secret the device actually signs with
    signing_secret: Option<String>,
    behavior: Behavior,
    positions: Vec<&'static str>,
    polls_seen: u32,
    next_position: usize,
    sequence: u32,
}

impl FieldDevice {
    fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            secret: format!("{:0>32}", id.to_lowercase().replace('-', "")),
            signing_secret: None,
            behavior,
            positions: vec!["left:cup:91%", "center:none", "right:laptop:77%,mug:40%"],
            polls_seen: 0,
            next_position: 0,
            sequence: 0,
        }
    }

    fn signing(mut self, secret: Option<&str>) -> Self {
        self.signing_secret = secret.map(str::to_string);
        self
    }

    fn with_positions(mut self, positions: Vec<&'static str>) -> Self {
        self.positions = positions;
        self
    }

    fn frame(&mut self, command: &str, payload: &str) -> Vec<u8> {
        self.sequence = self.sequence % 999 + 1;
        let seq = format!("{:03}", self.sequence);
        codec::build(&self.id, command, GW, &seq, 0, payload, self.signing_secret.as_deref())
    }

    fn data(&mut self) -> Option<Vec<u8>> {
        if let Behavior::StopsAfter(n) = self.behavior {
            if self.next_position >= n {
                return None;
            }
        }
        let body = *self.positions.get(self.next_position)?;
        self.next_position += 1;
        let payload = format!("T1:{}:{}/{}", body, self.next_position, self.positions.len());
        Some(self.frame("DATA", &payload))
    }

    fn respond(&mut self, msg: &Message) -> Vec<Vec<u8>> {
        if matches!(self.behavior, Behavior::Silent) {
            return Vec::new();
        }
        match msg.command.as_str() {
            "POLL" => {
                self.polls_seen += 1;
                if let Behavior::MissesPolls(n) = self.behavior {
                    if self.polls_seen <= n {
                        return Vec::new();
                    }
                }
                vec![self.frame("ONLINE", "bat_87:rssi_-52:snr_9")]
            }
            "START_INFER" => {
                self.next_position = 0;
                let mut out = vec![self.frame("INFERRING", "null")];
                out.extend(self.data());
                out
            }
            "ACK" => self.data().into_iter().collect(),
            "FINALIZE" => vec![self.frame("FINALIZED", "null")],
            _ => Vec::new(),
        }
    }
}

struct Field {
    time: Arc<AtomicU64>,
    radio: MemoryTransport,
    gateway: Orchestrator<MemoryTransport>,
    devices: Vec<FieldDevice>,
    /// every (target, command) the gateway put on the air, with its send time
    log: Vec<(u64, String, String)>,
}

impl Field {
    fn new(policy: Policy, devices: Vec<FieldDevice>) -> Self {
        let time = Arc::new(AtomicU64::new(0));
        let source = time.clone();
        let radio = MemoryTransport::new();
        let config = OrchestratorConfig {
            gateway_id: GW.to_string(),
            policy,
            ..OrchestratorConfig::default()
        };
        let mut gateway = Orchestrator::new(config, Clock::init(move || source.load(Ordering::SeqCst)), radio.clone());
        for device in &devices {
            gateway
                .pair(PairRequest {
                    device_id: device.id.clone(),
                    secret: Some(device.secret.clone()),
                    ..PairRequest::default()
                })
                .unwrap();
        }
        Self {
            time,
            radio,
            gateway,
            devices,
            log: Vec::new(),
        }
    }

    fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    /// deliver everything the gateway sent, feed replies back until quiet
    fn exchange(&mut self) {
        let profile = FrameProfile {
            auth: AuthMode::Advisory,
            strict_timestamps: false,
        };
        loop {
            let outbound = self.radio.take();
            if outbound.is_empty() {
                return;
            }
            for frame in outbound {
                let msg = codec::parse(&frame, &profile).unwrap();
                self.log.push((self.now(), msg.target.clone(), msg.command.clone()));
                let replies = match self.devices.iter_mut().find(|d| d.id == msg.target) {
                    Some(device) => device.respond(&msg),
                    None => Vec::new(),
                };
                for reply in replies {
                    let _ = self.gateway.on_frame(&reply);
                }
            }
        }
    }

    /// run until the round finishes or the limit passes
    fn run(&mut self, limit_ms: u64) {
        self.exchange();
        while self.gateway.is_polling() && self.now() < limit_ms {
            self.time.fetch_add(STEP_MS, Ordering::SeqCst);
            self.gateway.tick();
            self.exchange();
        }
    }

    fn sends(&self, target: &str, command: &str) -> Vec<u64> {
        self.log
            .iter()
            .filter(|(_, t, c)| t == target && c == command)
            .map(|(at, _, _)| *at)
            .collect()
    }
}

#[test]
fn round_over_cooperative_devices() {
    let devices = vec![
        FieldDevice::new("ED1-A3F2B", Behavior::Cooperative),
        FieldDevice::new("ED2-00001", Behavior::Cooperative),
        FieldDevice::new("ED3-FFFFF", Behavior::Cooperative),
    ];
    let mut field = Field::new(Policy::default(), devices);
    assert_eq!(field.gateway.start_cycle(), ControlReply::Started { devices: 3 });
    field.run(10_000);

    assert!(!field.gateway.is_polling());
    // no timeouts needed: everything happens at t=0
    assert_eq!(field.now(), 0);

    for id in ["ED1-A3F2B", "ED2-00001", "ED3-FFFFF"] {
        let dev = field.gateway.device(id).unwrap();
        assert_eq!(dev.phase, PollingPhase::Idle);
        assert_eq!(dev.last_outcome, Some(PollingPhase::Complete));
        assert_eq!(dev.positions_received, 3);
        assert_eq!(dev.results.len(), 3);
        assert_eq!((dev.battery, dev.rssi, dev.snr), (87, -52, 9));
        assert!(dev.online);
        assert_eq!(field.sends(id, "ACK").len(), 3);
        assert_eq!(field.sends(id, "SLEEP").len(), 1);
    }
    let dev = field.gateway.device("ED1-A3F2B").unwrap();
    assert_eq!(dev.results[2].detections, "laptop:77%,mug:40%");
    assert_eq!(dev.results[2].position_index, Some(3));

    // devices are visited in pairing order
    let order: Vec<_> = field
        .log
        .iter()
        .filter(|(_, _, c)| c == "POLL")
        .map(|(_, t, _)| t.as_str())
        .collect();
    assert_eq!(order, vec!["ED1-A3F2B", "ED2-00001", "ED3-FFFFF"]);

    let snap = field.gateway.snapshot();
    assert_eq!(snap.stats.success_rate, 100.0);
    assert_eq!(snap.stats.online_devices, 3);
    assert!(!snap.polling.polling_active);
}

#[test]
fn silent_device_fails_and_round_continues() {
    let devices = vec![
        FieldDevice::new("D1", Behavior::Cooperative),
        FieldDevice::new("D2", Behavior::Silent),
        FieldDevice::new("D3", Behavior::Cooperative),
    ];
    let mut field = Field::new(Policy::default(), devices);
    field.gateway.start_cycle();
    field.run(200_000);

    // first POLL plus three resends after 2s, 4s and 8s of backoff
    assert_eq!(field.sends("D2", "POLL"), vec![0, 17_000, 36_000, 59_000]);
    assert_eq!(field.sends("D3", "POLL"), vec![74_000]);

    let d2 = field.gateway.device("D2").unwrap();
    assert_eq!(d2.last_outcome, Some(PollingPhase::Error));
    assert!(!d2.online);
    assert_eq!(d2.failed_polls, 1);
    assert!(field.sends("D2", "SLEEP").is_empty());

    let d3 = field.gateway.device("D3").unwrap();
    assert_eq!(d3.last_outcome, Some(PollingPhase::Complete));

    let rate = field.gateway.snapshot().stats.success_rate;
    assert!((rate - 200.0 / 3.0).abs() < 1e-9);
}

#[test]
fn lost_polls_recovered_by_retry() {
    let mut field = Field::new(Policy::default(), vec![FieldDevice::new("D1", Behavior::MissesPolls(2))]);
    field.gateway.start_cycle();
    field.run(100_000);

    assert_eq!(field.sends("D1", "POLL"), vec![0, 17_000, 36_000]);
    let dev = field.gateway.device("D1").unwrap();
    assert_eq!(dev.last_outcome, Some(PollingPhase::Complete));
    assert_eq!((dev.total_polls, dev.successful_polls), (1, 1));
}

#[test]
fn partial_results_are_finalized() {
    let device = FieldDevice::new("D1", Behavior::StopsAfter(3)).with_positions(vec![
        "p1:a:10%",
        "p2:b:20%",
        "p3:c:30%",
        "p4:d:40%",
        "p5:e:50%",
    ]);
    let mut field = Field::new(Policy::default(), vec![device]);
    field.gateway.start_cycle();
    field.run(300_000);

    // data collection times out 120s after the last DATA, then finalizes
    assert_eq!(field.sends("D1", "FINALIZE"), vec![120_000]);
    let dev = field.gateway.device("D1").unwrap();
    assert_eq!(dev.last_outcome, Some(PollingPhase::Complete));
    assert_eq!(dev.positions_received, 3);
    assert_eq!(dev.expected_positions, Some(5));
    let positions: Vec<_> = dev.results.iter().map(|r| r.position.as_str()).collect();
    assert_eq!(positions, vec!["p1", "p2", "p3"]);
}

#[test]
fn required_profile_round_trip() {
    let policy = Policy {
        profile: FrameProfile {
            auth: AuthMode::Required,
            strict_timestamps: false,
        },
        ..Policy::default()
    };
    let good = FieldDevice::new("D1", Behavior::Cooperative);
    let good_secret = good.secret.clone();
    let good = good.signing(Some(&good_secret));
    let forger = FieldDevice::new("D2", Behavior::Cooperative).signing(Some("ffffffffffffffffffffffffffffffff"));

    let mut field = Field::new(policy, vec![good, forger]);
    field.gateway.start_cycle();
    field.run(200_000);

    let d1 = field.gateway.device("D1").unwrap();
    assert_eq!(d1.last_outcome, Some(PollingPhase::Complete));
    assert_eq!(d1.positions_received, 3);

    // every reply from the forger is rejected, so it looks unresponsive
    let d2 = field.gateway.device("D2").unwrap();
    assert_eq!(d2.last_outcome, Some(PollingPhase::Error));
    assert_eq!(d2.battery, -1);
    assert_eq!(d2.last_contact, None);
    assert_eq!(field.sends("D2", "POLL").len(), 4);
}
