// Network-facing delivery of decimated blocks
//
// The streamer sink calls `Transport::send` once per batch of completed
// windows. Implementations must not block for long: the call happens on the
// ingestion path.

use crate::error::{TelemetryError, TelemetryResult};
use crate::pipeline::StreamPayload;
use crossbeam::channel::{Sender, TrySendError};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

pub trait Transport: Send {
    fn send(&mut self, payload: &StreamPayload) -> TelemetryResult<()>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// One JSON datagram per payload
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
    label: String,
}

impl UdpTransport {
    /// Bind an ephemeral local port and target `addr`
    pub fn connect(addr: impl ToSocketAddrs) -> TelemetryResult<Self> {
        let target = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TelemetryError::Network("target address did not resolve".into()))?;
        let bind = if target.is_ipv4() {
            SocketAddr::from(([0u8; 4], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        log::info!("Streaming decimated payloads to udp://{}", target);
        Ok(Self {
            socket,
            target,
            label: format!("udp://{}", target),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, payload: &StreamPayload) -> TelemetryResult<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.socket
            .send_to(&bytes, self.target)
            .map_err(|e| TelemetryError::Network(format!("send to {}: {}", self.target, e)))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Hands payloads to an in-process consumer over a bounded crossbeam channel
///
/// A full channel is reported as a failed send rather than blocking.
pub struct ChannelTransport {
    sender: Sender<StreamPayload>,
}

impl ChannelTransport {
    pub fn new(sender: Sender<StreamPayload>) -> Self {
        Self { sender }
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, payload: &StreamPayload) -> TelemetryResult<()> {
        self.sender
            .try_send(payload.clone())
            .map_err(|e| match e {
                TrySendError::Full(_) => TelemetryError::Transport("consumer channel full".into()),
                TrySendError::Disconnected(_) => TelemetryError::ChannelClosed,
            })
    }

    fn name(&self) -> &str {
        "channel"
    }
}
