//! vws - multiplexed WebSocket request/response client.
//!
//! This crate turns one persistent WebSocket into a request/response channel
//! with scoped event fan-out.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! - **OrderedMap** - string-keyed storage with a live entry count
//! - **EventBus** - named events, ordered listeners, one-shot listeners
//! - **ScopedEmitter** - one bus per subscriber scope, fan-out emit
//! - **Scheduler** - one-shot timers (tokio or a virtual clock)
//! - **Transport** - text-socket boundary (tokio-tungstenite or in-memory)
//! - **Channel** - readiness gate, request correlation, lifecycle events
//! - **Client** - lazily builds and owns one channel
//!
//! Everything is single-threaded (`Rc`/`RefCell`). In production the client,
//! its socket task and its timers live on one [`tokio::task::LocalSet`].
//!
//! # Modules
//!
//! - [`collections`] - [`OrderedMap`]
//! - [`events`] - [`events::EventBus`] and [`events::ScopedEmitter`]
//! - [`timer`] - [`timer::Scheduler`] implementations
//! - [`transport`] - [`transport::Connector`] implementations
//! - [`channel`] - [`Channel`]
//! - [`client`] - [`Client`] and [`create`]
//! - [`config`] - configuration loading/saving
//! - [`logging`] - `env_logger` setup for binaries

// Library modules
pub mod channel;
pub mod client;
pub mod collections;
pub mod events;
pub mod timer;
pub mod transport;

pub mod config;
pub mod constants;
pub mod logging;

mod runtime;

// Re-export commonly used types
pub use channel::{Channel, ChannelEvent, NotReady, ReplyCallback};
pub use client::{create, Client, ClientBuilder, ClientParams};
pub use collections::OrderedMap;
pub use config::Config;
pub use constants::{DEFAULT_HOST, EVENT_CLOSE, EVENT_ERROR, EVENT_MESSAGE, EVENT_OPEN};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
