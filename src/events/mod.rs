//! Event plumbing for channels and clients.
//!
//! - [`bus`]: a single named-event registry ([`EventBus`])
//! - [`scoped`]: one registry per subscriber scope ([`ScopedEmitter`])

pub mod bus;
pub mod scoped;

pub use bus::{EventBus, Listener, ListenerId};
pub use scoped::{ScopeKey, Scoped, ScopedEmitter};
