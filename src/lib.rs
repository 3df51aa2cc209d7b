//! ==============================================================================
//! lora_gateway - field radio gateway library
//! ==============================================================================
//!
//! the gateway polls battery-powered inference devices one at a time over a
//! half-duplex radio link:
//!
//! ```text
//!     POLL -> ONLINE -> START_INFER -> INFERRING -> DATA* -> FINALIZE -> FINALIZED
//! ```
//!
//! modules (leaves first):
//!     - error.rs:        typed errors for every layer
//!     - protocol/:       wire format, auth tags, payloads, clock
//!     - domain.rs:       phases and the published status snapshot
//!     - registry.rs:     paired device records
//!     - transport.rs:    outbound radio collaborator
//!     - orchestrator.rs: the sequential polling state machine
//!     - config.rs, logging.rs, api.rs: process plumbing used by main.rs
//!
//! ==============================================================================

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod transport;
