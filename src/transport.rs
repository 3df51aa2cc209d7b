//! ==============================================================================
//! transport.rs - radio transport abstraction
//! ==============================================================================
//!
//! purpose:
//!     the orchestrator only needs to push raw frames at the radio. this trait
//!     hides whether that is a LoRa modem bridge on the network or an
//!     in-memory recorder under test.
//!
//! implementations:
//!     - UdpTransport:    one datagram per frame to a radio modem bridge
//!     - MemoryTransport: keeps every frame it was asked to send
//!
//! receive side:
//!     inbound frames are not pulled through this trait. UdpTransport::bind
//!     hands back a tokio socket for the receive loop, which passes frames
//!     to Orchestrator::on_frame as they arrive.
//!
//! ==============================================================================

use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};

use crate::error::TransportError;

/// largest frame the radio accepts
pub const MAX_FRAME_LEN: usize = 255;

pub trait Transport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

// ==============================================================================
// udp bridge to the radio modem
// ==============================================================================

pub struct UdpTransport {
    socket: UdpSocket,
    modem: SocketAddr,
}

impl UdpTransport {
    /// bind the radio port; the returned tokio socket is the receive half.
    /// must be called inside a tokio runtime.
    pub fn bind(local: SocketAddr, modem: SocketAddr) -> Result<(Self, tokio::net::UdpSocket), TransportError> {
        let socket = UdpSocket::bind(local)?;
        let sender = socket.try_clone()?;
        socket.set_nonblocking(true)?;
        let receiver = tokio::net::UdpSocket::from_std(socket)?;
        Ok((Self { socket: sender, modem }, receiver))
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        // plain send_to: no readiness bookkeeping, only a full kernel buffer fails
        self.socket.send_to(frame, self.modem)?;
        Ok(())
    }
}

// ==============================================================================
// in-memory recorder
// ==============================================================================

/// Clone-able; every clone sees the same outbox.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// drain and return everything sent so far
    pub fn take(&self) -> Vec<Vec<u8>> {
        match self.sent.lock() {
            Ok(mut sent) => std::mem::take(&mut *sent),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(frame.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(frame.to_vec()),
        }
        Ok(())
    }
}
