//! ==============================================================================
//! main.rs - gateway entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the polling orchestrator to the radio modem bridge and the
//!     control api, then runs the single event loop that owns all device state.
//!
//! responsibilities:
//!     - load gateway.toml (first cli argument, or the default search paths)
//!     - pair the devices listed in the config
//!     - receive radio frames over udp and hand them to the orchestrator
//!     - tick the orchestrator so timeouts and backoff resends fire
//!     - start automatic rounds when configured
//!     - apply control requests from the api and publish a fresh snapshot
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                     event loop (this file)                   │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//!     │  │ udp receive │  │ tick / round│  │ control requests     │  │
//!     │  │ (modem)     │  │ intervals   │  │ (mpsc from api.rs)   │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬───────────┘  │
//!     │         └────────────────┼────────────────────┘              │
//!     │                   ┌──────┴───────┐                           │
//!     │                   │ orchestrator │ -> udp send (modem)       │
//!     │                   └──────┬───────┘                           │
//!     │                          │ snapshot after every event        │
//!     └──────────────────────────┼───────────────────────────────────┘
//!                                ▼
//!                    Arc<RwLock<GatewaySnapshot>> <- api.rs readers
//!
//! ==============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Interval, MissedTickBehavior};

use lora_gateway::api::{self, ApiCommand, ApiState};
use lora_gateway::config::GatewayConfig;
use lora_gateway::domain::GatewaySnapshot;
use lora_gateway::logging;
use lora_gateway::orchestrator::{ControlReply, Orchestrator};
use lora_gateway::protocol::clock::Clock;
use lora_gateway::transport::{Transport, UdpTransport};

/// largest datagram accepted from the modem bridge
const RECV_BUFFER: usize = 512;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Field Radio Gateway");
    println!("  one device at a time, every cycle accounted for");
    println!("===========================================================");

    // step 1: load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GatewayConfig::load_or_default(config_path.as_deref())?;
    config.print_summary();

    // step 2: logging
    logging::init_logging(&config.logging.level)?;

    // step 3: radio link
    let (transport, socket) = UdpTransport::bind(config.radio.bind, config.radio.modem)
        .with_context(|| format!("Failed to bind radio socket on {}", config.radio.bind))?;
    tracing::info!("[STARTUP] Radio bridge {} -> {}", config.radio.bind, config.radio.modem);

    // step 4: orchestrator and configured devices
    let mut orchestrator = Orchestrator::new(config.orchestrator_config(), Clock::monotonic(), transport);
    for device in &config.devices {
        if let Err(e) = orchestrator.pair(device.clone()) {
            tracing::warn!("[STARTUP] Skipping configured device: {}", e);
        }
    }
    tracing::info!("[STARTUP] {} devices paired", orchestrator.registry().len());

    // step 5: control api in background
    let snapshot = Arc::new(RwLock::new(orchestrator.snapshot()));
    let (commands, mut control_rx) = mpsc::channel::<ApiCommand>(32);
    if config.api.enabled {
        let state = ApiState {
            snapshot: snapshot.clone(),
            commands: commands.clone(),
        };
        let bind = config.api.bind;
        tokio::spawn(async move {
            if let Err(e) = api::run_server(bind, state).await {
                tracing::error!("[API] Server error: {:#}", e);
            }
        });
    }

    // step 6: event loop
    let mut tick = tokio::time::interval(Duration::from_millis(config.polling.tick_interval_ms.max(10)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rounds = match config.polling.cycle_interval_seconds {
        0 => None,
        secs => {
            let mut rounds = tokio::time::interval(Duration::from_secs(secs));
            rounds.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(rounds)
        }
    };
    let mut buf = [0u8; RECV_BUFFER];

    tracing::info!("[RUNTIME] Gateway {} ready", config.gateway.id);
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    tracing::trace!("[RADIO] {} bytes from {}", n, from);
                    // rejected frames are logged by the orchestrator
                    let _ = orchestrator.on_frame(&buf[..n]);
                }
                Err(e) => tracing::warn!("[RADIO] Receive failed: {}", e),
            },
            Some(cmd) = control_rx.recv() => {
                let result = orchestrator.apply(cmd.control);
                publish(&snapshot, &orchestrator).await;
                let _ = cmd.reply.send(result);
                continue;
            }
            _ = tick.tick() => orchestrator.tick(),
            _ = next_round(&mut rounds) => {
                match orchestrator.start_cycle() {
                    ControlReply::AlreadyRunning => tracing::info!("[RUNTIME] Previous round still running, skipping"),
                    ControlReply::NoDevices => tracing::debug!("[RUNTIME] No paired devices, skipping round"),
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[RUNTIME] Shutting down");
                break;
            }
        }
        publish(&snapshot, &orchestrator).await;
    }

    drop(commands);
    Ok(())
}

async fn publish<T: Transport>(snapshot: &RwLock<GatewaySnapshot>, orchestrator: &Orchestrator<T>) {
    let fresh = orchestrator.snapshot();
    *snapshot.write().await = fresh;
}

/// resolves on the next automatic round; never when rounds are manual
async fn next_round(rounds: &mut Option<Interval>) {
    match rounds {
        Some(rounds) => {
            rounds.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
