//! ==============================================================================
//! logging.rs - tracing subscriber setup
//! ==============================================================================
//!
//! console output only. RUST_LOG wins when set; otherwise `logging.level`
//! from gateway.toml decides.
//!
//! ==============================================================================

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(filter_for(level)))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    Ok(())
}

/// plain levels apply to this crate only; anything else is a full directive
fn filter_for(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        lvl @ ("trace" | "debug" | "info" | "warn" | "error") => format!("warn,lora_gateway={lvl}"),
        _ => level.to_string(),
    }
}
