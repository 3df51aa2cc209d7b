//! ==============================================================================
//! clock.rs - coarse gateway clock
//! ==============================================================================
//!
//! purpose:
//!     seconds counter used for frame timestamps and freshness checks, plus a
//!     millisecond view used by the orchestrator for timeouts and backoff.
//!     seeded once at startup from a monotonic source; never wall-clock accurate.
//!
//! relationships:
//!     - used by: protocol/codec.rs (timestamp of outbound frames)
//!     - used by: orchestrator.rs (deadlines, freshness policy)
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// default freshness window in seconds
pub const TIMESTAMP_TOLERANCE_SECS: u64 = 60;

type NowFn = dyn Fn() -> u64 + Send + Sync;

/// Clone-able handle; clones share the same source and high-water mark.
#[derive(Clone)]
pub struct Clock {
    source: Arc<NowFn>,
    seed_secs: u64,
    started_ms: u64,
    last_ms: Arc<AtomicU64>,
}

impl Clock {
    /// `now_fn` returns milliseconds from any monotonic origin.
    pub fn init<F>(now_fn: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        let started_ms = now_fn();
        Self {
            source: Arc::new(now_fn),
            seed_secs: started_ms / 1000,
            started_ms,
            last_ms: Arc::new(AtomicU64::new(started_ms)),
        }
    }

    /// process-local monotonic source (uptime in milliseconds)
    pub fn monotonic() -> Self {
        let origin = Instant::now();
        Self::init(move || origin.elapsed().as_millis() as u64)
    }

    /// milliseconds, never decreasing even if the source steps backwards
    pub fn now_millis(&self) -> u64 {
        let raw = (self.source)();
        let prev = self.last_ms.fetch_max(raw, Ordering::AcqRel);
        prev.max(raw)
    }

    /// coarse seconds counter carried in frame timestamps
    pub fn now(&self) -> u64 {
        let elapsed = self.now_millis().saturating_sub(self.started_ms);
        self.seed_secs + elapsed / 1000
    }

    /// seconds since `init`
    pub fn uptime_secs(&self) -> u64 {
        self.now_millis().saturating_sub(self.started_ms) / 1000
    }
}

/// absolute difference check between two coarse timestamps
pub fn within_tolerance(remote: u64, local: u64, tolerance_secs: u64) -> bool {
    remote.abs_diff(local) <= tolerance_secs
}
