//! Realtime transport and session negotiation
//!
//! The transport is split in two halves:
//! - a cloneable [`TransportHandle`] for sending, backed by an unbounded
//!   channel into a writer task, so capture never waits on the network
//! - a receiver of [`TransportEvent`]s consumed by the session event loop

mod messages;
mod negotiate;
mod websocket;

pub use messages::{parse_event, route, ControlMessage, InboundEvent, InboundMessage, Routed};
pub use negotiate::{resolve_endpoint, HttpNegotiator, NegotiatedSession, SessionNegotiator};
pub use websocket::WebSocketConnector;

use crate::error::{SessionError, SessionResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the inbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outbound traffic handed to the transport writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Raw little-endian PCM frame
    Audio(Vec<u8>),
    /// JSON control message
    Control(String),
    /// Close the connection
    Close,
}

/// Events produced by the transport reader
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(InboundMessage),
    Closed,
    Error(String),
}

/// Sending half of an open transport
#[derive(Debug, Clone)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl TransportHandle {
    /// Create a handle and the receiver its writer drains. The handle starts open.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                open: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    pub fn send_audio(&self, frame: Vec<u8>) -> SessionResult<()> {
        self.send(Outbound::Audio(frame))
    }

    pub fn send_control(&self, message: &ControlMessage) -> SessionResult<()> {
        self.send(Outbound::Control(message.to_json()?))
    }

    fn send(&self, outbound: Outbound) -> SessionResult<()> {
        if !self.is_open() {
            return Err(SessionError::TransportError("transport is not open".into()));
        }
        self.outbound
            .send(outbound)
            .map_err(|_| SessionError::TransportError("transport writer has stopped".into()))
    }

    /// Close the connection. Only the first call sends the close request.
    ///
    /// Returns true if this call closed the transport.
    pub fn close(&self) -> bool {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
            return true;
        }
        false
    }

    /// Record that the remote side closed the connection
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// An opened transport
pub struct Transport {
    pub handle: TransportHandle,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens realtime transports to negotiated endpoints
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    /// Fails with `TransportError`
    async fn connect(&self, endpoint: &str) -> SessionResult<Transport>;
}
