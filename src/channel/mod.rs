//! Multiplexed request/response channel over one socket.
//!
//! A [`Channel`] owns a single transport and turns it into a request/response
//! pipe with lifecycle events.
//!
//! # Architecture
//!
//! ```text
//!          open()                transport Open
//!   Fresh ────────► Initialized ────────────────► Active
//!     ▲   (connector ok)   │                        │
//!     │                    │ ready() timeout        │ close() / transport Close
//!     └────────────────────┴────────────────────────┘
//! ```
//!
//! - **Readiness gate**: [`Channel::ready`] answers immediately when the
//!   socket is open, otherwise races a one-shot `on_open` listener against a
//!   timer. A readiness timeout tears the socket down.
//! - **Correlation**: [`Channel::send`] with a callback tags the message with
//!   a fresh `request_uuid` and parks the callback until the matching reply
//!   arrives or the eviction timer drops it.
//! - **Fan-out**: every lifecycle change and every inbound frame is emitted
//!   as a [`ChannelEvent`] to all subscriber scopes.
//!
//! # Generations
//!
//! Each transport is wired to a sink stamped with the generation current at
//! `open()`. Tearing a transport down bumps the generation, so late events
//! from a discarded socket are dropped instead of corrupting the new one.
//!
//! # Deadlock Prevention
//!
//! No `RefCell` borrow is held while listeners, reply callbacks or readiness
//! callbacks run; all of them may call back into the channel.

// Rust guideline compliant 2026-02

pub mod correlation;
pub mod envelope;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::constants::{EVENT_CLOSE, EVENT_ERROR, EVENT_MESSAGE, EVENT_OPEN};
use crate::events::{ListenerId, ScopeKey, Scoped, ScopedEmitter};
use crate::timer::{SharedScheduler, TimerId};
use crate::transport::{Connector, ReadyState, Transport, TransportEvent, TransportSink};

pub use correlation::{CorrelationPool, ReplyCallback};

/// Callback answered by [`Channel::ready`].
pub type ReadyCallback = Box<dyn FnOnce(Result<(), NotReady>)>;

/// Why a channel could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    /// `open()` never succeeded, or the channel was closed since.
    NotInitialized,
    /// The socket did not open within the readiness window.
    Timeout,
}

impl std::fmt::Display for NotReady {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "Channel not initialized"),
            Self::Timeout => write!(f, "Channel did not open in time"),
        }
    }
}

impl std::error::Error for NotReady {}

/// Event emitted by a channel to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The socket opened.
    Open,
    /// The socket closed, locally or remotely.
    Close,
    /// Inbound frame, parsed as JSON when possible.
    Message(Value),
    /// Transport failure.
    Error(String),
}

impl ChannelEvent {
    /// Event name this payload is emitted under.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => EVENT_OPEN,
            Self::Close => EVENT_CLOSE,
            Self::Message(_) => EVENT_MESSAGE,
            Self::Error(_) => EVENT_ERROR,
        }
    }
}

/// Request/response channel over a single transport.
pub struct Channel {
    me: Weak<Channel>,
    key: ScopeKey,
    host: String,
    connector: Rc<dyn Connector>,
    scheduler: SharedScheduler,
    ready_timeout: Duration,
    request_timeout: Duration,

    initialized: Cell<bool>,
    active: Cell<bool>,
    generation: Cell<u64>,
    transport: RefCell<Option<Rc<dyn Transport>>>,
    pool: RefCell<CorrelationPool>,
    emitter: ScopedEmitter<ChannelEvent>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("key", &self.key)
            .field("host", &self.host)
            .field("initialized", &self.initialized.get())
            .field("active", &self.active.get())
            .field("generation", &self.generation.get())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

impl Scoped for Channel {
    fn scope_key(&self) -> Option<ScopeKey> {
        Some(self.key.clone())
    }
}

impl Channel {
    /// Create a fresh channel for `host`. Nothing connects until [`open`].
    ///
    /// [`open`]: Channel::open
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        config: &Config,
        connector: Rc<dyn Connector>,
        scheduler: SharedScheduler,
    ) -> Rc<Self> {
        let host = host.into();
        Rc::new_cyclic(|me| Self {
            me: Weak::clone(me),
            key: ScopeKey::generate("channel"),
            host,
            connector,
            scheduler,
            ready_timeout: config.ready_timeout(),
            request_timeout: config.request_timeout(),
            initialized: Cell::new(false),
            active: Cell::new(false),
            generation: Cell::new(0),
            transport: RefCell::new(None),
            pool: RefCell::new(CorrelationPool::new()),
            emitter: ScopedEmitter::with_max_listeners(config.max_listeners),
        })
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Endpoint this channel connects to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether a transport has been constructed and not torn down.
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Whether the transport reported `Open` and has not failed since.
    #[must_use]
    pub fn active(&self) -> bool {
        self.active.get()
    }

    /// Number of requests waiting for a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pool.borrow().len()
    }

    /// Ready state of the current transport, `Closed` when there is none.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.transport
            .borrow()
            .as_ref()
            .map_or(ReadyState::Closed, |t| t.ready_state())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Construct the transport if there is none yet.
    ///
    /// Construction failures are logged and leave the channel fresh.
    pub fn open(&self) {
        if self.transport.borrow().is_some() {
            log::debug!("[{}] open() ignored: transport already exists", self.key);
            return;
        }

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        match self.connector.connect(&self.host, self.sink(generation)) {
            Ok(transport) => {
                *self.transport.borrow_mut() = Some(transport);
                self.initialized.set(true);
                log::info!("[{}] Connecting to {}", self.key, self.host);
            }
            Err(e) => {
                log::error!("[{}] Failed to open {}: {e:#}", self.key, self.host);
            }
        }
    }

    /// Close an active channel and emit `on_close`.
    ///
    /// Does nothing unless the channel is active.
    pub fn close(&self) {
        if !self.active.get() {
            log::debug!("[{}] close() ignored: channel not active", self.key);
            return;
        }
        self.teardown();
        log::info!("[{}] Closed", self.key);
        self.emitter.emit(EVENT_CLOSE, &ChannelEvent::Close);
    }

    /// Drop pending requests, force the transport down and reopen.
    pub fn reset(&self) {
        let pending = self.pool.borrow_mut().drain();
        for entry in &pending {
            self.scheduler.cancel(entry.timer);
        }
        if !pending.is_empty() {
            log::debug!(
                "[{}] Reset dropped {} pending request(s)",
                self.key,
                pending.len()
            );
        }
        drop(pending);

        self.teardown();
        self.open();
    }

    /// Answer `callback` once the channel can send.
    ///
    /// - not initialized: `Err(NotInitialized)` immediately
    /// - active: `Ok(())` immediately
    /// - connecting: `Ok(())` on `on_open`, or `Err(Timeout)` after the
    ///   readiness window, which also tears the transport down
    ///
    /// Waiting clears this channel's own-scope listeners, so only the most
    /// recent waiter listens for `on_open`. An earlier waiter still gets its
    /// answer when its timer fires.
    pub fn ready<F>(&self, callback: F)
    where
        F: FnOnce(Result<(), NotReady>) + 'static,
    {
        if !self.initialized.get() {
            callback(Err(NotReady::NotInitialized));
            return;
        }
        if self.active.get() {
            callback(Ok(()));
            return;
        }

        self.emitter.off(self, &[]);

        let waiting: ReadyCallback = Box::new(callback);
        let slot = Rc::new(RefCell::new(Some(waiting)));
        let timer: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));

        let on_open_slot = Rc::clone(&slot);
        let on_open_timer = Rc::clone(&timer);
        let me = Weak::clone(&self.me);
        self.emitter.once(self, EVENT_OPEN, move |_| {
            let waiting = on_open_slot.borrow_mut().take();
            if let Some(callback) = waiting {
                if let (Some(channel), Some(id)) = (me.upgrade(), on_open_timer.get()) {
                    channel.scheduler.cancel(id);
                }
                callback(Ok(()));
            }
            Ok(())
        });

        let me = Weak::clone(&self.me);
        let id = self.scheduler.schedule(
            self.ready_timeout,
            Box::new(move || {
                let waiting = slot.borrow_mut().take();
                let Some(callback) = waiting else {
                    return;
                };
                let Some(channel) = me.upgrade() else {
                    callback(Err(NotReady::Timeout));
                    return;
                };
                channel.ready_timed_out(callback);
            }),
        );
        timer.set(Some(id));
    }

    fn ready_timed_out(&self, callback: ReadyCallback) {
        self.emitter.off(self, &[]);
        if self.active.get() {
            callback(Ok(()));
            return;
        }
        log::warn!(
            "[{}] {} did not open within {:?}",
            self.key,
            self.host,
            self.ready_timeout
        );
        self.teardown();
        callback(Err(NotReady::Timeout));
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Transmit `message`, optionally correlating a reply to `callback`.
    ///
    /// Returns `false` (and drops the message) unless the channel is active
    /// and the socket is open. A callback can only be correlated with a JSON
    /// object; for any other value the message is sent and the callback
    /// dropped.
    pub fn send(&self, message: Value, callback: Option<ReplyCallback>) -> bool {
        let transport = self.transport.borrow().clone();
        let Some(transport) =
            transport.filter(|t| self.active.get() && t.ready_state() == ReadyState::Open)
        else {
            log::warn!("[{}] Channel not ready, message dropped", self.key);
            return false;
        };

        let mut message = message;
        let request = match callback {
            Some(callback) => self.track(&mut message, callback),
            None => None,
        };

        let text = envelope::encode(&message);
        match transport.send(&text) {
            Ok(()) => {
                log::trace!("[{}] Sent {text}", self.key);
                true
            }
            Err(e) => {
                log::warn!("[{}] Send failed: {e:#}", self.key);
                if let Some(id) = request {
                    self.forget(&id);
                }
                false
            }
        }
    }

    /// Tag `message` and park `callback`. Returns the request id.
    fn track(&self, message: &mut Value, callback: ReplyCallback) -> Option<String> {
        let id = correlation::new_request_id();
        if !envelope::tag_request(message, &id) {
            log::warn!(
                "[{}] Reply callback ignored: only JSON objects can carry a request id",
                self.key
            );
            return None;
        }

        let me = Weak::clone(&self.me);
        let evict_id = id.clone();
        let timer = self.scheduler.schedule(
            self.request_timeout,
            Box::new(move || {
                let Some(channel) = me.upgrade() else {
                    return;
                };
                let evicted = channel.pool.borrow_mut().evict(&evict_id);
                if evicted {
                    log::debug!("[{}] Request {evict_id} timed out", channel.key);
                }
            }),
        );

        self.pool.borrow_mut().insert(id.clone(), callback, timer);
        Some(id)
    }

    fn forget(&self, id: &str) {
        let pending = self.pool.borrow_mut().take(id);
        if let Some(entry) = pending {
            self.scheduler.cancel(entry.timer);
        }
    }

    fn handle_inbound(&self, text: &str) {
        let mut payload = envelope::decode(text);

        if let Some(id) = envelope::request_id(&payload) {
            let pending = self.pool.borrow_mut().take(&id);
            envelope::mark_handled(&mut payload);
            match pending {
                Some(entry) => {
                    self.scheduler.cancel(entry.timer);
                    (entry.callback)(payload.clone());
                }
                None => log::debug!("[{}] No pending request for {id}", self.key),
            }
        }

        self.emitter.emit(EVENT_MESSAGE, &ChannelEvent::Message(payload));
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe `scope` to `event`.
    pub fn on<S, F>(&self, scope: &S, event: &str, listener: F) -> Option<ListenerId>
    where
        S: Scoped + ?Sized,
        F: Fn(&ChannelEvent) -> Result<()> + 'static,
    {
        self.emitter.on(scope, event, listener)
    }

    /// Subscribe `scope` to the next `event` only.
    pub fn once<S, F>(&self, scope: &S, event: &str, listener: F) -> Option<ListenerId>
    where
        S: Scoped + ?Sized,
        F: Fn(&ChannelEvent) -> Result<()> + 'static,
    {
        self.emitter.once(scope, event, listener)
    }

    /// Drop `scope`'s listeners for `events` (every event when empty).
    pub fn off<S: Scoped + ?Sized>(&self, scope: &S, events: &[&str]) {
        self.emitter.off(scope, events);
    }

    // ========================================================================
    // Transport plumbing
    // ========================================================================

    fn sink(&self, generation: u64) -> TransportSink {
        let me = Weak::clone(&self.me);
        TransportSink::new(move |event| {
            if let Some(channel) = me.upgrade() {
                channel.handle_transport_event(generation, event);
            }
        })
    }

    fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        if generation != self.generation.get() {
            log::debug!(
                "[{}] Ignoring {event:?} from a discarded transport",
                self.key
            );
            return;
        }

        match event {
            TransportEvent::Open => {
                self.active.set(true);
                log::info!("[{}] Connected to {}", self.key, self.host);
                self.emitter.emit(EVENT_OPEN, &ChannelEvent::Open);
            }
            TransportEvent::Close { code, reason } => {
                // The socket is dead; the next open() builds a new one
                self.discard();
                log::info!("[{}] Transport closed ({code}): {reason}", self.key);
                self.emitter.emit(EVENT_CLOSE, &ChannelEvent::Close);
            }
            TransportEvent::Message(text) => self.handle_inbound(&text),
            TransportEvent::Error(reason) => {
                self.active.set(false);
                log::error!("[{}] Transport error: {reason}", self.key);
                self.emitter.emit(EVENT_ERROR, &ChannelEvent::Error(reason));
            }
        }
    }

    /// Forget the transport, reset both flags and retire its generation.
    fn discard(&self) -> Option<Rc<dyn Transport>> {
        let transport = self.transport.borrow_mut().take();
        self.initialized.set(false);
        self.active.set(false);
        self.generation.set(self.generation.get() + 1);
        transport
    }

    /// Discard the transport and ask it to close, best-effort.
    fn teardown(&self) {
        if let Some(transport) = self.discard() {
            if let Err(e) = transport.close() {
                log::warn!("[{}] Transport close failed: {e:#}", self.key);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.get_mut().take() {
            let _ = transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualScheduler;
    use crate::transport::{MemoryConnector, MemoryTransport};
    use serde_json::json;

    struct Harness {
        channel: Rc<Channel>,
        connector: Rc<MemoryConnector>,
        scheduler: Rc<ManualScheduler>,
    }

    impl Harness {
        fn new() -> Self {
            let connector = Rc::new(MemoryConnector::new());
            let scheduler = Rc::new(ManualScheduler::new());
            let channel = Channel::new(
                "ws://example.test/socket",
                &Config::default(),
                Rc::clone(&connector) as Rc<dyn Connector>,
                Rc::clone(&scheduler) as SharedScheduler,
            );
            Self {
                channel,
                connector,
                scheduler,
            }
        }

        fn peer(&self) -> Rc<MemoryTransport> {
            self.connector.last().unwrap()
        }

        fn open_active(&self) -> Rc<MemoryTransport> {
            self.channel.open();
            let peer = self.peer();
            peer.open();
            peer
        }
    }

    fn ready_result(channel: &Channel) -> Rc<RefCell<Option<Result<(), NotReady>>>> {
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);
        channel.ready(move |r| *slot.borrow_mut() = Some(r));
        result
    }

    fn event_log(channel: &Channel, scope: &ScopeKey) -> Rc<RefCell<Vec<ChannelEvent>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in [EVENT_OPEN, EVENT_CLOSE, EVENT_MESSAGE, EVENT_ERROR] {
            let log = Rc::clone(&log);
            channel.on(scope, name, move |event: &ChannelEvent| {
                log.borrow_mut().push(event.clone());
                Ok(())
            });
        }
        log
    }

    #[test]
    fn test_new_channel_is_fresh() {
        let h = Harness::new();
        assert!(!h.channel.initialized());
        assert!(!h.channel.active());
        assert_eq!(h.channel.ready_state(), ReadyState::Closed);
        assert_eq!(h.channel.host(), "ws://example.test/socket");
        let key = h.channel.scope_key().unwrap();
        assert!(key.as_str().starts_with("vws_channel_"));
    }

    #[test]
    fn test_open_initializes_once() {
        let h = Harness::new();
        h.channel.open();
        assert!(h.channel.initialized());
        assert!(!h.channel.active());

        h.channel.open();
        assert_eq!(h.connector.connection_count(), 1);
    }

    #[test]
    fn test_open_failure_stays_fresh() {
        let h = Harness::new();
        h.connector.refuse_next("no route");
        h.channel.open();
        assert!(!h.channel.initialized());

        h.channel.open();
        assert!(h.channel.initialized());
    }

    #[test]
    fn test_transport_open_activates_and_emits() {
        let h = Harness::new();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));

        h.open_active();
        assert!(h.channel.active());
        assert_eq!(*log.borrow(), vec![ChannelEvent::Open]);
    }

    #[test]
    fn test_ready_not_initialized() {
        let h = Harness::new();
        let result = ready_result(&h.channel);
        assert_eq!(*result.borrow(), Some(Err(NotReady::NotInitialized)));
    }

    #[test]
    fn test_ready_when_active_is_immediate() {
        let h = Harness::new();
        h.open_active();

        let result = ready_result(&h.channel);
        assert_eq!(*result.borrow(), Some(Ok(())));
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn test_ready_waits_for_open() {
        let h = Harness::new();
        h.channel.open();

        let result = ready_result(&h.channel);
        assert!(result.borrow().is_none());
        assert_eq!(h.scheduler.pending(), 1);

        h.peer().open();
        assert_eq!(*result.borrow(), Some(Ok(())));
        // Timer cancelled by the open path
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.scheduler.advance(Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_ready_timeout_resets_channel() {
        let h = Harness::new();
        h.channel.open();
        let result = ready_result(&h.channel);

        h.scheduler.advance(Duration::from_millis(2999));
        assert!(result.borrow().is_none());
        h.scheduler.advance(Duration::from_millis(1));

        assert_eq!(*result.borrow(), Some(Err(NotReady::Timeout)));
        assert!(!h.channel.initialized());
        assert!(!h.channel.active());
        assert_eq!(h.peer().close_requests(), 1);
    }

    #[test]
    fn test_late_open_after_timeout_is_ignored() {
        let h = Harness::new();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));
        h.channel.open();
        let stale = h.peer();
        let _result = ready_result(&h.channel);
        h.scheduler.advance(Duration::from_secs(3));

        stale.open();
        assert!(!h.channel.active());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_superseded_ready_waiter_resolves_on_timer() {
        let h = Harness::new();
        h.channel.open();

        let first = ready_result(&h.channel);
        h.scheduler.advance(Duration::from_millis(1000));
        let second = ready_result(&h.channel);

        // Only the latest waiter listens for on_open
        h.peer().open();
        assert!(first.borrow().is_none());
        assert_eq!(*second.borrow(), Some(Ok(())));

        // The first waiter's timer still answers, and the channel stays up
        h.scheduler.advance(Duration::from_millis(2000));
        assert_eq!(*first.borrow(), Some(Ok(())));
        assert!(h.channel.active());
    }

    #[test]
    fn test_send_requires_active() {
        let h = Harness::new();
        assert!(!h.channel.send(json!({"a": 1}), None));

        h.channel.open();
        assert!(!h.channel.send(json!({"a": 1}), None));
        assert!(h.peer().sent().is_empty());
    }

    #[test]
    fn test_send_without_callback_is_untagged() {
        let h = Harness::new();
        let peer = h.open_active();

        assert!(h.channel.send(json!({"payload": "x"}), None));
        assert_eq!(peer.last_sent_json(), Some(json!({"payload": "x"})));
        assert_eq!(h.channel.pending_requests(), 0);
    }

    #[test]
    fn test_send_string_goes_out_raw() {
        let h = Harness::new();
        let peer = h.open_active();

        assert!(h.channel.send(json!("ping"), None));
        assert_eq!(peer.sent(), vec!["ping".to_string()]);
    }

    #[test]
    fn test_callback_on_non_object_is_dropped() {
        let h = Harness::new();
        let peer = h.open_active();

        assert!(h.channel.send(json!("ping"), Some(Box::new(|_| {}))));
        assert_eq!(peer.sent(), vec!["ping".to_string()]);
        assert_eq!(h.channel.pending_requests(), 0);
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn test_reply_resolves_callback_once() {
        let h = Harness::new();
        let peer = h.open_active();
        let calls = Rc::new(RefCell::new(Vec::new()));

        let seen = Rc::clone(&calls);
        h.channel.send(
            json!({"payload": "x"}),
            Some(Box::new(move |reply: Value| seen.borrow_mut().push(reply))),
        );
        let id = peer.last_sent_json().unwrap()["request_uuid"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(h.channel.pending_requests(), 1);

        let reply = json!({"request_uuid": id, "response": {"data": "y"}});
        peer.message_json(&reply);
        peer.message_json(&reply);

        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["response"]["data"], json!("y"));
        assert_eq!(calls[0]["request_uuid_handled"], json!(true));
        assert_eq!(h.channel.pending_requests(), 0);
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn test_request_timeout_evicts_silently() {
        let h = Harness::new();
        let peer = h.open_active();
        let called = Rc::new(Cell::new(false));

        let flag = Rc::clone(&called);
        h.channel.send(json!({"q": 1}), Some(Box::new(move |_| flag.set(true))));
        let id = peer.last_sent_json().unwrap()["request_uuid"].clone();

        h.scheduler.advance(Duration::from_millis(10_000));
        assert_eq!(h.channel.pending_requests(), 0);

        // Late reply only reaches the fan-out
        let log = event_log(&h.channel, &ScopeKey::generate("test"));
        peer.message_json(&json!({"request_uuid": id}));
        assert!(!called.get());
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_every_inbound_frame_is_emitted() {
        let h = Harness::new();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));
        let peer = h.open_active();

        peer.message("not json");
        peer.message(r#"{"push":true}"#);

        assert_eq!(
            *log.borrow(),
            vec![
                ChannelEvent::Open,
                ChannelEvent::Message(json!("not json")),
                ChannelEvent::Message(json!({"push": true})),
            ]
        );
    }

    #[test]
    fn test_non_string_request_ids_are_marked_handled() {
        let h = Harness::new();
        let peer = h.open_active();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));

        peer.message(r#"{"request_uuid":7}"#);
        peer.message(r#"{"request_uuid":0}"#);

        assert_eq!(
            *log.borrow(),
            vec![
                ChannelEvent::Message(json!({
                    "request_uuid": 7,
                    "request_uuid_handled": true
                })),
                ChannelEvent::Message(json!({"request_uuid": 0})),
            ]
        );
    }

    #[test]
    fn test_close_only_when_active() {
        let h = Harness::new();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));

        h.channel.open();
        h.channel.close();
        assert!(h.channel.initialized());
        assert!(log.borrow().is_empty());

        h.peer().open();
        h.channel.close();
        assert!(!h.channel.initialized());
        assert!(!h.channel.active());
        assert_eq!(h.peer().close_requests(), 1);
        assert_eq!(*log.borrow(), vec![ChannelEvent::Open, ChannelEvent::Close]);
    }

    #[test]
    fn test_remote_close_resets_flags() {
        let h = Harness::new();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));
        let peer = h.open_active();

        peer.remote_close(1001, "going away");
        assert!(!h.channel.initialized());
        assert!(!h.channel.active());
        assert_eq!(log.borrow().last(), Some(&ChannelEvent::Close));

        // A new open builds a new transport
        h.channel.open();
        assert_eq!(h.connector.connection_count(), 2);
    }

    #[test]
    fn test_transport_error_deactivates() {
        let h = Harness::new();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));
        let peer = h.open_active();

        peer.error("boom");
        assert!(!h.channel.active());
        assert!(h.channel.initialized());
        assert_eq!(
            log.borrow().last(),
            Some(&ChannelEvent::Error("boom".to_string()))
        );
        assert!(!h.channel.send(json!({}), None));
    }

    #[test]
    fn test_reset_drops_pool_and_reopens() {
        let h = Harness::new();
        let first = h.open_active();
        let called = Rc::new(Cell::new(false));

        let flag = Rc::clone(&called);
        h.channel.send(json!({"q": 1}), Some(Box::new(move |_| flag.set(true))));
        let id = first.last_sent_json().unwrap()["request_uuid"].clone();

        h.channel.reset();
        assert_eq!(h.channel.pending_requests(), 0);
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(first.close_requests(), 1);
        assert_eq!(h.connector.connection_count(), 2);
        assert!(h.channel.initialized());
        assert!(!h.channel.active());

        // Stale events from the first transport are ignored
        first.message_json(&json!({"request_uuid": id}));
        first.remote_close(1000, "bye");
        assert!(h.channel.initialized());
        assert!(!called.get());
    }

    #[test]
    fn test_reset_while_connecting() {
        let h = Harness::new();
        h.channel.open();
        let first = h.peer();

        h.channel.reset();
        assert_eq!(first.close_requests(), 1);
        assert_eq!(h.connector.connection_count(), 2);
        assert!(h.channel.initialized());
    }

    #[test]
    fn test_subscriber_scopes_are_isolated() {
        let h = Harness::new();
        let a = ScopeKey::generate("test");
        let b = ScopeKey::generate("test");
        let log_a = event_log(&h.channel, &a);
        let log_b = event_log(&h.channel, &b);

        h.channel.off(&a, &[]);
        h.open_active();

        assert!(log_a.borrow().is_empty());
        assert_eq!(*log_b.borrow(), vec![ChannelEvent::Open]);
    }

    #[test]
    fn test_ready_wait_keeps_other_scopes() {
        let h = Harness::new();
        let log = event_log(&h.channel, &ScopeKey::generate("test"));
        h.channel.open();

        let _result = ready_result(&h.channel);
        h.peer().open();
        assert_eq!(*log.borrow(), vec![ChannelEvent::Open]);
    }

    #[test]
    fn test_not_ready_display() {
        assert_eq!(
            NotReady::NotInitialized.to_string(),
            "Channel not initialized"
        );
        assert_eq!(
            NotReady::Timeout.to_string(),
            "Channel did not open in time"
        );
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ChannelEvent::Open.name(), "on_open");
        assert_eq!(ChannelEvent::Close.name(), "on_close");
        assert_eq!(ChannelEvent::Message(Value::Null).name(), "on_message");
        assert_eq!(ChannelEvent::Error(String::new()).name(), "on_error");
    }
}
