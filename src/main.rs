//! vws CLI - sends requests to and listens on a single WebSocket endpoint.
//!
//! This is the main binary entry point. See the `vws` library for the
//! channel and client implementation.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use serde_json::Value;
use tokio::sync::oneshot;

use vws::logging::{self, LogSettings};
use vws::{ChannelEvent, Client, Config, VERSION};
use vws::{EVENT_CLOSE, EVENT_ERROR, EVENT_MESSAGE, EVENT_OPEN};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "vws")]
#[command(version = VERSION)]
#[command(about = "Request/response client for a single WebSocket endpoint")]
struct Cli {
    /// Endpoint to connect to (defaults to the configured host)
    #[arg(long, global = true)]
    host: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the correlated reply
    Send {
        /// Message body; parsed as JSON, sent as raw text otherwise
        message: String,
        /// How long to wait for the reply, in milliseconds
        #[arg(long, default_value_t = 10_000)]
        wait_ms: u64,
    },
    /// Print every event the endpoint produces
    Listen {
        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, warnings) = Config::load_with_warnings();
    logging::init(&LogSettings::from(&config))?;
    for warning in warnings {
        log::warn!("{warning}");
    }

    match cli.command {
        Commands::Send { message, wait_ms } => {
            let wait = Duration::from_millis(wait_ms);
            run_local(send(cli.host, config, message, wait))?;
        }
        Commands::Listen { seconds } => {
            run_local(listen(cli.host, config, seconds.map(Duration::from_secs)))?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Drive `task` on a current-thread runtime inside a `LocalSet`.
fn run_local(task: impl Future<Output = Result<()>>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, task)
}

fn build_client(host: Option<String>, config: Config) -> Client {
    Client::builder(host).config(config).build()
}

async fn send(host: Option<String>, config: Config, message: String, wait: Duration) -> Result<()> {
    let body: Value = serde_json::from_str(&message).unwrap_or(Value::String(message));
    if !body.is_object() {
        log::warn!("Message is not a JSON object; no reply can be correlated");
    }

    let client = build_client(host, config);
    let (tx, rx) = oneshot::channel();
    client.send(
        body,
        Some(Box::new(move |reply| {
            let _ = tx.send(reply);
        })),
    );

    let reply = match tokio::time::timeout(wait, rx).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => bail!("Request was dropped before a reply arrived"),
        Err(_) => bail!("No reply within {wait:?}"),
    };
    client.close();

    println!("{}", serde_json::to_string_pretty(&reply)?);
    if let Some(error) = reply.get(vws::constants::FIELD_ERROR).and_then(Value::as_str) {
        bail!("Request failed: {error}");
    }
    Ok(())
}

async fn listen(host: Option<String>, config: Config, limit: Option<Duration>) -> Result<()> {
    let client = build_client(host, config);
    for event in [EVENT_OPEN, EVENT_CLOSE, EVENT_MESSAGE, EVENT_ERROR] {
        client.on(event, |payload: &ChannelEvent| {
            match payload {
                ChannelEvent::Message(body) => println!("{}", serde_json::to_string(body)?),
                other => eprintln!("[{}] {other:?}", other.name()),
            }
            Ok(())
        });
    }
    client.open();
    if !client.initialized() {
        bail!("Could not open a connection to {}", client.host());
    }

    match limit {
        Some(limit) => {
            tokio::select! {
                () = tokio::time::sleep(limit) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to wait for Ctrl-C")?;
        }
    }

    client.close();
    Ok(())
}
