//! ==============================================================================
//! protocol - radio wire protocol between gateway and field devices
//! ==============================================================================
//!
//! frame format:
//!
//! ```text
//!     SENDER:COMMAND:TARGET:SEQUENCE:TIMESTAMP:PAYLOAD[:TAG]
//!     GW01:POLL:ED1-A3F2B:001:1728567890:null:a3f2b1c4d5e6f7a8
//! ```
//!
//! submodules (leaves first):
//!     - clock.rs:   coarse timestamps and freshness check
//!     - auth.rs:    truncated hmac-sha256 tags
//!     - codec.rs:   frame build/parse and sequence numbers
//!     - payload.rs: health and inference-data payload decoders
//!
//! ==============================================================================

pub mod auth;
pub mod clock;
pub mod codec;
pub mod payload;

use serde::{Deserialize, Serialize};

/// field separator on the wire; never escaped
pub const DELIMITER: char = ':';

/// reserved payload value meaning "no payload"
pub const EMPTY_PAYLOAD: &str = "null";

// ==============================================================================
// command vocabulary
// ==============================================================================

/// gateway -> device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Poll,
    StartInference,
    Ack,
    Finalize,
    Sleep,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Poll => "POLL",
            Command::StartInference => "START_INFER",
            Command::Ack => "ACK",
            Command::Finalize => "FINALIZE",
            Command::Sleep => "SLEEP",
        }
    }
}

/// device -> gateway frame kinds (carried in the command field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Data,
    Online,
    Inferring,
    Finalized,
    Sleeping,
}

impl Reply {
    pub fn as_str(self) -> &'static str {
        match self {
            Reply::Data => "DATA",
            Reply::Online => "ONLINE",
            Reply::Inferring => "INFERRING",
            Reply::Finalized => "FINALIZED",
            Reply::Sleeping => "SLEEPING",
        }
    }

    /// case-insensitive; `None` for anything outside the vocabulary
    pub fn parse(command: &str) -> Option<Self> {
        [
            Reply::Data,
            Reply::Online,
            Reply::Inferring,
            Reply::Finalized,
            Reply::Sleeping,
        ]
        .into_iter()
        .find(|r| r.as_str().eq_ignore_ascii_case(command))
    }
}

// ==============================================================================
// deployment profile
// ==============================================================================

/// how authentication tags are handled on this deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// six-field frames, no tags in either direction
    #[default]
    Open,
    /// outbound frames are tagged; inbound tags are verified when present
    Advisory,
    /// every frame carries a tag and inbound tags must verify
    Required,
}

impl AuthMode {
    pub fn signs_outbound(self) -> bool {
        !matches!(self, AuthMode::Open)
    }
}

/// parse-time policy
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameProfile {
    pub auth: AuthMode,
    /// reject non-numeric timestamps instead of reading them as zero
    pub strict_timestamps: bool,
}
