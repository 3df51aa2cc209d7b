//! ==============================================================================
//! error.rs - gateway error taxonomy
//! ==============================================================================
//!
//! purpose:
//!     typed errors for every layer of the radio protocol.
//!     none of these are fatal to the process: inbound errors drop the frame,
//!     cycle errors end the current device cycle only.
//!
//! relationships:
//!     - used by: protocol/codec.rs (FormatError)
//!     - used by: orchestrator.rs (AuthError, PollError, InboundError)
//!     - used by: registry.rs (RegistryError)
//!     - used by: transport.rs (TransportError)
//!
//! ==============================================================================

use thiserror::Error;

/// malformed frame on the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("frame is not valid utf-8")]
    InvalidEncoding,
    #[error("expected at least {expected} fields, got {found}")]
    TooFewFields { expected: usize, found: usize },
    #[error("unparsable timestamp field: {0:?}")]
    InvalidTimestamp(String),
    #[error("authentication tag required but missing")]
    MissingTag,
}

/// authentication failure on an otherwise well-formed frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("tag mismatch for frame from {sender}")]
    TagMismatch { sender: String },
    #[error("timestamp {remote} outside tolerance of local {local}")]
    StaleTimestamp { remote: u64, local: u64 },
}

/// outcome of a device cycle that did not reach Complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("no reply within {0}s")]
    Timeout(u64),
    #[error("phase {phase} failed after {attempts} attempts")]
    RetryExhausted { phase: &'static str, attempts: u32 },
    #[error("device {0} never answered the health check")]
    OfflineDevice(String),
    #[error("cycle aborted")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("device {0} is already paired")]
    AlreadyPaired(String),
    #[error("device {0} is not paired")]
    NotFound(String),
    #[error("invalid device id {0:?}")]
    InvalidId(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("radio send failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds radio limit")]
    FrameTooLarge(usize),
}

/// why an inbound frame was dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InboundError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("frame addressed to {0}, not this gateway")]
    NotForUs(String),
    #[error("frame from {0}, which is not the active device")]
    NotActive(String),
    #[error("unexpected {command} while in {phase}")]
    Unexpected { command: String, phase: &'static str },
    #[error("undecodable {command} payload {payload:?}")]
    BadPayload { command: String, payload: String },
}
