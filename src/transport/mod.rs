//! Text-socket boundary between a [`crate::Channel`] and the network.
//!
//! # Architecture
//!
//! A [`Connector`] builds one [`Transport`] per connection attempt and hands
//! it a [`TransportSink`]. The transport pushes lifecycle and data events
//! into the sink; the channel pulls nothing. This keeps the channel a pure
//! state machine that can be driven by a real socket ([`ws::WsConnector`])
//! or by an in-process one ([`memory::MemoryConnector`]).
//!
//! ```text
//!   Channel ──connect(host, sink)──► Connector ──► Transport
//!      ▲                                              │
//!      └──────────── sink.deliver(TransportEvent) ────┘
//! ```

// Rust guideline compliant 2026-02

pub mod memory;
pub mod ws;

use std::rc::Rc;

use anyhow::Result;

pub use memory::{MemoryConnector, MemoryTransport};
pub use ws::WsConnector;

/// Connection state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Frames can be sent.
    Open,
    /// Close requested, not yet acknowledged.
    Closing,
    /// Connection is gone.
    Closed,
}

/// Event pushed by a transport into its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Open,
    /// Connection closed.
    Close {
        /// WebSocket close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
    /// Inbound text frame.
    Message(String),
    /// Transport-level failure.
    Error(String),
}

/// Callback a transport uses to report events to its owner.
///
/// Cheap to clone; every clone delivers to the same owner.
#[derive(Clone)]
pub struct TransportSink(Rc<dyn Fn(TransportEvent)>);

impl TransportSink {
    /// Wrap a delivery function.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransportEvent) + 'static,
    {
        Self(Rc::new(deliver))
    }

    /// Deliver one event to the owner.
    pub fn deliver(&self, event: TransportEvent) {
        (self.0)(event);
    }
}

impl std::fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

/// One live (or connecting) socket.
pub trait Transport {
    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is not open or the frame cannot be
    /// queued.
    fn send(&self, text: &str) -> Result<()>;

    /// Request the socket to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the close request cannot be issued.
    fn close(&self) -> Result<()>;

    /// Current connection state.
    fn ready_state(&self) -> ReadyState;
}

/// Factory for transports.
pub trait Connector {
    /// Start connecting to `host`, reporting events through `sink`.
    ///
    /// Events must not be delivered from inside this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed at all
    /// (malformed URL, missing runtime). Network failures are reported
    /// later through the sink.
    fn connect(&self, host: &str, sink: TransportSink) -> Result<Rc<dyn Transport>>;
}
