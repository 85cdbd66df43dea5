//! In-process transport.
//!
//! [`MemoryConnector`] hands out [`MemoryTransport`]s that never touch the
//! network. Whoever holds the connector plays the server: it inspects the
//! frames a channel sent and injects open, message, error and close events
//! at the moment of its choosing. Used by the test suites and by embedders
//! that bridge a channel onto another message pipe.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::{bail, Result};
use serde_json::Value;

use super::{Connector, ReadyState, Transport, TransportEvent, TransportSink};

/// Connector recording every transport it creates.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    transports: RefCell<Vec<Rc<MemoryTransport>>>,
    /// Reject the next `connect` call with this reason.
    refuse_next: RefCell<Option<String>>,
}

impl MemoryConnector {
    /// Create a connector with no transports.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` fail with `reason`.
    pub fn refuse_next(&self, reason: &str) {
        *self.refuse_next.borrow_mut() = Some(reason.to_string());
    }

    /// Most recently created transport.
    #[must_use]
    pub fn last(&self) -> Option<Rc<MemoryTransport>> {
        self.transports.borrow().last().map(Rc::clone)
    }

    /// Number of successful `connect` calls so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.transports.borrow().len()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, host: &str, sink: TransportSink) -> Result<Rc<dyn Transport>> {
        if let Some(reason) = self.refuse_next.borrow_mut().take() {
            bail!("connection to {host} refused: {reason}");
        }
        let transport = Rc::new(MemoryTransport {
            host: host.to_string(),
            sink,
            state: Cell::new(ReadyState::Connecting),
            sent: RefCell::new(Vec::new()),
            close_requests: Cell::new(0),
        });
        self.transports.borrow_mut().push(Rc::clone(&transport));
        Ok(transport)
    }
}

/// Transport whose peer is the test or embedder holding it.
pub struct MemoryTransport {
    host: String,
    sink: TransportSink,
    state: Cell<ReadyState>,
    sent: RefCell<Vec<String>>,
    close_requests: Cell<usize>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("host", &self.host)
            .field("state", &self.state.get())
            .field("sent", &self.sent.borrow().len())
            .finish()
    }
}

impl MemoryTransport {
    /// Host the transport was created for.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Frames sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    /// Last sent frame parsed as JSON, if any.
    #[must_use]
    pub fn last_sent_json(&self) -> Option<Value> {
        self.sent
            .borrow()
            .last()
            .and_then(|text| serde_json::from_str(text).ok())
    }

    /// How many times the owner asked this transport to close.
    #[must_use]
    pub fn close_requests(&self) -> usize {
        self.close_requests.get()
    }

    /// Complete the handshake and report `Open`.
    pub fn open(&self) {
        self.state.set(ReadyState::Open);
        self.sink.deliver(TransportEvent::Open);
    }

    /// Deliver an inbound text frame.
    pub fn message(&self, text: &str) {
        self.sink.deliver(TransportEvent::Message(text.to_string()));
    }

    /// Deliver `value` as an inbound JSON frame.
    pub fn message_json(&self, value: &Value) {
        self.message(&value.to_string());
    }

    /// Report a transport error. The socket stays in its current state.
    pub fn error(&self, reason: &str) {
        self.sink.deliver(TransportEvent::Error(reason.to_string()));
    }

    /// Close from the peer side.
    pub fn remote_close(&self, code: u16, reason: &str) {
        self.state.set(ReadyState::Closed);
        self.sink.deliver(TransportEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

impl Transport for MemoryTransport {
    fn send(&self, text: &str) -> Result<()> {
        if self.state.get() != ReadyState::Open {
            bail!("memory transport to {} is not open", self.host);
        }
        self.sent.borrow_mut().push(text.to_string());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.close_requests.set(self.close_requests.get() + 1);
        self.state.set(ReadyState::Closed);
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }
}
