//! Spawning `!Send` tasks without panicking.
//!
//! `tokio::task::spawn_local` panics when no [`tokio::task::LocalSet`] is
//! driving the current thread, which is the case under a plain
//! `#[tokio::main]`. Transports and timers go through [`spawn_local`] here
//! instead, which turns that panic into an error the caller can log.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

/// Spawn `future` on the current `LocalSet`.
///
/// # Errors
///
/// Returns an error when there is no tokio runtime, or when the runtime is
/// not driving a `LocalSet`.
pub(crate) fn spawn_local<F>(future: F) -> Result<JoinHandle<F::Output>>
where
    F: Future + 'static,
    F::Output: 'static,
{
    tokio::runtime::Handle::try_current().context("No tokio runtime on this thread")?;

    let result = catch_unwind(AssertUnwindSafe(|| tokio::task::spawn_local(future)));
    result.map_err(|panic_info| {
        let msg = panic_info
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| panic_info.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        anyhow::anyhow!("Cannot spawn local task outside a LocalSet: {msg}")
    })
}
