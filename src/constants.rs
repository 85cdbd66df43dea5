//! Protocol and timing constants for vws.
//!
//! This module centralizes every magic value the channel depends on:
//! envelope field names, lifecycle event names and the default timeouts.
//! Timeouts here are only defaults; [`crate::config::Config`] can override
//! them per client.
//!
//! # Categories
//!
//! - **Endpoints**: default connection target
//! - **Events**: lifecycle event names raised by channels and clients
//! - **Envelope**: JSON field names injected into messages
//! - **Timeouts**: readiness and correlation windows

use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// Host used when neither the caller nor the configuration names one.
///
/// Points at the default local development server.
pub const DEFAULT_HOST: &str = "ws://localhost:8181/websocket";

// ============================================================================
// Events
// ============================================================================

/// Raised when the underlying socket reports it is open.
pub const EVENT_OPEN: &str = "on_open";

/// Raised when the socket closes, remotely or through [`crate::Channel::close`].
pub const EVENT_CLOSE: &str = "on_close";

/// Raised for every inbound frame, correlated or not.
pub const EVENT_MESSAGE: &str = "on_message";

/// Raised when the transport reports an error.
pub const EVENT_ERROR: &str = "on_error";

// ============================================================================
// Envelope
// ============================================================================

/// Field carrying the correlation id on outgoing requests and their replies.
pub const FIELD_REQUEST_UUID: &str = "request_uuid";

/// Marker added to inbound payloads whose correlation id was processed.
pub const FIELD_REQUEST_UUID_HANDLED: &str = "request_uuid_handled";

/// Field carrying the reason in the synthesized failure reply of
/// [`crate::Client::send`].
pub const FIELD_ERROR: &str = "error";

// ============================================================================
// Timeouts
// ============================================================================

/// How long [`crate::Channel::ready`] waits for the socket to open.
pub const READY_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long a pending request callback waits for its reply before eviction.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

// ============================================================================
// Listeners
// ============================================================================

/// Listener cap applied to each event name of an [`crate::events::EventBus`].
///
/// The cap exists to surface leaked subscriptions (a reconnect loop that
/// re-subscribes without cleaning up), not to bound correctness.
pub const DEFAULT_MAX_LISTENERS: usize = 10;
