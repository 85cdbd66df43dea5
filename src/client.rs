//! Client facade over a lazily created [`Channel`].
//!
//! A [`Client`] is what applications hold. It owns exactly one channel,
//! created on first use, and exposes a narrower surface: fire-and-forget or
//! correlated `send`, lifecycle control, a connection flag and its own event
//! subscriptions.
//!
//! # Architecture
//!
//! ```text
//!   Client ──owns──► Channel ──owns──► Transport
//!     │                 │
//!     │◄── on_open / on_close / on_message / on_error (client scope)
//!     │
//!     └── re-emits each event to the client's subscribers
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use serde_json::json;
//!
//! # async fn demo() {
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(async {
//!         let client = vws::create("ws://localhost:8181/websocket");
//!         client.on(vws::EVENT_MESSAGE, |event| {
//!             log::info!("pushed: {event:?}");
//!             Ok(())
//!         });
//!         client.send(
//!             json!({"action": "ping"}),
//!             Some(Box::new(|reply| log::info!("reply: {reply}"))),
//!         );
//!     })
//!     .await;
//! # }
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use anyhow::Result;
use serde_json::{Map, Value};

use crate::channel::{Channel, ChannelEvent, ReplyCallback};
use crate::config::Config;
use crate::constants::{EVENT_CLOSE, EVENT_ERROR, EVENT_MESSAGE, EVENT_OPEN, FIELD_ERROR};
use crate::events::{ListenerId, ScopeKey, Scoped, ScopedEmitter};
use crate::timer::{SharedScheduler, TokioScheduler};
use crate::transport::{Connector, WsConnector};

/// Construction parameters for a [`Client`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientParams {
    /// Endpoint to connect to; the configured host when `None`.
    pub host: Option<String>,
}

impl From<&str> for ClientParams {
    fn from(host: &str) -> Self {
        Self {
            host: Some(host.to_string()),
        }
    }
}

impl From<String> for ClientParams {
    fn from(host: String) -> Self {
        Self { host: Some(host) }
    }
}

impl From<Option<String>> for ClientParams {
    fn from(host: Option<String>) -> Self {
        Self { host }
    }
}

/// Builder injecting the collaborators of a [`Client`].
pub struct ClientBuilder {
    params: ClientParams,
    config: Option<Config>,
    connector: Option<Rc<dyn Connector>>,
    scheduler: Option<SharedScheduler>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("params", &self.params)
            .field("config", &self.config)
            .field("custom_connector", &self.connector.is_some())
            .field("custom_scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Use `config` instead of [`Config::load`].
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `connector` instead of [`WsConnector`].
    #[must_use]
    pub fn connector(mut self, connector: Rc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use `scheduler` instead of [`TokioScheduler`].
    #[must_use]
    pub fn scheduler(mut self, scheduler: SharedScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the client. No connection is made yet.
    #[must_use]
    pub fn build(self) -> Client {
        let config = self.config.unwrap_or_else(Config::load);
        let connector = self
            .connector
            .unwrap_or_else(|| Rc::new(WsConnector::new()) as Rc<dyn Connector>);
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Rc::new(TokioScheduler::new()) as SharedScheduler);

        Client {
            shared: Rc::new(Shared {
                key: ScopeKey::generate("client"),
                host: self.params.host,
                emitter: ScopedEmitter::with_max_listeners(config.max_listeners),
                config,
                connector,
                scheduler,
                channel: RefCell::new(None),
                connected: Cell::new(false),
            }),
        }
    }
}

struct Shared {
    key: ScopeKey,
    host: Option<String>,
    config: Config,
    connector: Rc<dyn Connector>,
    scheduler: SharedScheduler,
    channel: RefCell<Option<Rc<Channel>>>,
    connected: Cell<bool>,
    emitter: ScopedEmitter<ChannelEvent>,
}

impl Scoped for Shared {
    fn scope_key(&self) -> Option<ScopeKey> {
        Some(self.key.clone())
    }
}

impl Shared {
    /// Track connection state and forward a channel event.
    fn relay(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Open => self.connected.set(true),
            ChannelEvent::Close | ChannelEvent::Error(_) => self.connected.set(false),
            ChannelEvent::Message(_) => {}
        }
        self.emitter.emit(event.name(), event);
    }
}

/// Application-facing handle owning one [`Channel`].
pub struct Client {
    shared: Rc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("key", &self.shared.key)
            .field("host", &self.host())
            .field("connected", &self.is_connected())
            .field("channel", &self.shared.channel.borrow())
            .finish()
    }
}

impl Scoped for Client {
    fn scope_key(&self) -> Option<ScopeKey> {
        self.shared.scope_key()
    }
}

impl Client {
    /// Create a client with the default connector, scheduler and
    /// configuration.
    ///
    /// The default scheduler and connector need a tokio
    /// [`tokio::task::LocalSet`] once the client starts connecting.
    #[must_use]
    pub fn new(params: impl Into<ClientParams>) -> Self {
        Self::builder(params).build()
    }

    /// Start building a client with injected collaborators.
    #[must_use]
    pub fn builder(params: impl Into<ClientParams>) -> ClientBuilder {
        ClientBuilder {
            params: params.into(),
            config: None,
            connector: None,
            scheduler: None,
        }
    }

    /// Host given at construction, or `""`.
    #[must_use]
    pub fn host(&self) -> &str {
        self.shared.host.as_deref().unwrap_or("")
    }

    /// Whether the last lifecycle event seen was `on_open`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.get()
    }

    /// Whether the channel exists and is active.
    #[must_use]
    pub fn active(&self) -> bool {
        self.existing_channel().is_some_and(|c| c.active())
    }

    /// Whether the channel exists and has a transport.
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.existing_channel().is_some_and(|c| c.initialized())
    }

    /// Requests waiting for a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.existing_channel().map_or(0, |c| c.pending_requests())
    }

    /// Open the channel, creating it first if needed.
    pub fn open(&self) {
        self.channel().open();
    }

    /// Close the channel. No-op before it was initialized.
    pub fn close(&self) {
        if let Some(channel) = self.existing_channel().filter(|c| c.initialized()) {
            channel.close();
        }
    }

    /// Reset the channel. No-op before it was initialized.
    pub fn reset(&self) {
        if let Some(channel) = self.existing_channel().filter(|c| c.initialized()) {
            channel.reset();
        }
    }

    /// Open the channel, wait for readiness, then send `message`.
    ///
    /// On success `callback` receives the correlated reply payload. If the
    /// channel cannot become ready, `callback` receives
    /// `{"error": "<reason>"}` instead.
    pub fn send(&self, message: Value, callback: Option<ReplyCallback>) {
        let channel = self.channel();
        channel.open();

        let weak = Rc::downgrade(&channel);
        channel.ready(move |result| match result {
            Ok(()) => {
                if let Some(channel) = weak.upgrade() {
                    channel.send(message, callback);
                }
            }
            Err(reason) => {
                log::warn!("Send failed: {reason}");
                if let Some(callback) = callback {
                    callback(error_reply(&reason.to_string()));
                }
            }
        });
    }

    /// Subscribe to a channel event relayed by this client.
    pub fn on<F>(&self, event: &str, listener: F) -> Option<ListenerId>
    where
        F: Fn(&ChannelEvent) -> Result<()> + 'static,
    {
        self.shared.emitter.on(self, event, listener)
    }

    /// Subscribe to the next occurrence of `event`.
    pub fn once<F>(&self, event: &str, listener: F) -> Option<ListenerId>
    where
        F: Fn(&ChannelEvent) -> Result<()> + 'static,
    {
        self.shared.emitter.once(self, event, listener)
    }

    /// Drop this client's listeners for `events` (every event when empty).
    pub fn off(&self, events: &[&str]) {
        self.shared.emitter.off(self, events);
    }

    fn existing_channel(&self) -> Option<Rc<Channel>> {
        self.shared.channel.borrow().clone()
    }

    fn channel(&self) -> Rc<Channel> {
        if let Some(channel) = self.existing_channel() {
            return channel;
        }

        let shared = &self.shared;
        let host = shared.host.as_deref().unwrap_or(&shared.config.host);
        let channel = Channel::new(
            host,
            &shared.config,
            Rc::clone(&shared.connector),
            Rc::clone(&shared.scheduler),
        );
        bind(shared, &channel);
        *shared.channel.borrow_mut() = Some(Rc::clone(&channel));
        channel
    }
}

/// Subscribe `shared` to the four lifecycle events of `channel`.
fn bind(shared: &Rc<Shared>, channel: &Channel) {
    for event in [EVENT_OPEN, EVENT_CLOSE, EVENT_MESSAGE, EVENT_ERROR] {
        let weak: Weak<Shared> = Rc::downgrade(shared);
        channel.on(shared.as_ref(), event, move |payload| {
            if let Some(shared) = weak.upgrade() {
                shared.relay(payload);
            }
            Ok(())
        });
    }
}

/// Synthesized reply for a request that never left.
fn error_reply(reason: &str) -> Value {
    let mut body = Map::new();
    body.insert(FIELD_ERROR.to_string(), Value::String(reason.to_string()));
    Value::Object(body)
}

/// Create a client, mirroring the launcher entry point.
#[must_use]
pub fn create(params: impl Into<ClientParams>) -> Client {
    Client::new(params)
}
