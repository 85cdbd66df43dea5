//! WebSocket transport over `tokio-tungstenite`.
//!
//! # Architecture
//!
//! The handshake yields split ([`WsWriter`], [`WsReader`]) halves. Each
//! [`WsConnector`] connection runs as a `spawn_local` task that owns both
//! halves and multiplexes, in a
//! `tokio::select!` loop, inbound frames against outgoing frames queued by
//! [`WsTransport`] through an unbounded channel.
//!
//! ```text
//!   WsTransport::send ──mpsc──► connection task ──► WsWriter
//!                                     │
//!   TransportSink ◄── TransportEvent ─┴──────────── WsReader
//! ```
//!
//! The task shares the socket's [`ReadyState`] with the transport handle
//! through an `Rc<Cell<_>>`, so `ready_state()` never blocks.
//!
//! # Runtime
//!
//! Connections must be opened from inside a [`tokio::task::LocalSet`]; the
//! channel and its sink are `!Send`.

// Rust guideline compliant 2026-02

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::{Connector, ReadyState, Transport, TransportEvent, TransportSink};
use crate::runtime;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Client handshake request.
type WsRequest = tungstenite::handshake::client::Request;

/// Close code reported when the connection dies without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported when the local side asked to close.
const CLOSE_NORMAL: u16 = 1000;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            let converted = match message {
                tungstenite::Message::Text(text) => WsMessage::Text(text),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data),
                tungstenite::Message::Pong(data) => WsMessage::Pong(data),
                tungstenite::Message::Close(close_frame) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    WsMessage::Close { code, reason }
                }
                // Raw frames
                tungstenite::Message::Frame(_) => continue,
            };
            return Some(Ok(converted));
        }
    }
}

/// Perform the handshake and split the stream for a `tokio::select!` loop.
async fn connect_request(request: WsRequest) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://").replace("http://", "ws://")
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Frame queued for the connection task.
#[derive(Debug)]
enum WsOutgoing {
    Text(String),
    Close,
}

/// [`Connector`] producing tokio-tungstenite connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    /// Fails without a tokio runtime or outside a [`tokio::task::LocalSet`].
    fn connect(&self, host: &str, sink: TransportSink) -> Result<Rc<dyn Transport>> {
        let url = http_to_ws_scheme(host);
        let request = url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid WebSocket URL: {url}"))?;

        let state = Rc::new(Cell::new(ReadyState::Connecting));
        let (tx, rx) = mpsc::unbounded_channel();
        runtime::spawn_local(run_connection(request, sink, Rc::clone(&state), rx))
            .context("WebSocket transport requires a tokio LocalSet")?;

        log::debug!("Connecting WebSocket to {url}");
        Ok(Rc::new(WsTransport { url, state, tx }))
    }
}

/// Handle to one connection task.
#[derive(Debug)]
pub struct WsTransport {
    url: String,
    state: Rc<Cell<ReadyState>>,
    tx: mpsc::UnboundedSender<WsOutgoing>,
}

impl Transport for WsTransport {
    fn send(&self, text: &str) -> Result<()> {
        if self.state.get() != ReadyState::Open {
            anyhow::bail!(
                "WebSocket to {} is not open ({:?})",
                self.url,
                self.state.get()
            );
        }
        self.tx
            .send(WsOutgoing::Text(text.to_string()))
            .map_err(|e| task_exited(&self.url, &e))
    }

    fn close(&self) -> Result<()> {
        if matches!(self.state.get(), ReadyState::Closing | ReadyState::Closed) {
            return Ok(());
        }
        self.state.set(ReadyState::Closing);
        self.tx
            .send(WsOutgoing::Close)
            .map_err(|e| task_exited(&self.url, &e))
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }
}

fn task_exited(url: &str, e: &dyn std::fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("WebSocket task for {url} has exited: {e}")
}

/// Report a failure followed by the close it implies.
fn fail(sink: &TransportSink, state: &Cell<ReadyState>, error: String) {
    state.set(ReadyState::Closed);
    sink.deliver(TransportEvent::Error(error));
    sink.deliver(TransportEvent::Close {
        code: CLOSE_ABNORMAL,
        reason: "connection failed".to_string(),
    });
}

/// Drive a single connection until it closes or its handle is dropped.
///
/// Pushes [`TransportEvent`]s into `sink` and drains outgoing frames from
/// `send_rx`.
async fn run_connection(
    request: WsRequest,
    sink: TransportSink,
    state: Rc<Cell<ReadyState>>,
    mut send_rx: mpsc::UnboundedReceiver<WsOutgoing>,
) {
    let url = request.uri().to_string();

    let (mut writer, mut reader) = match connect_request(request).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("WebSocket connect to {url} failed: {e:#}");
            fail(&sink, &state, format!("{e:#}"));
            return;
        }
    };

    // A close requested mid-handshake stays queued and is handled below
    if state.get() == ReadyState::Connecting {
        state.set(ReadyState::Open);
    }
    log::info!("WebSocket connected to {url}");
    sink.deliver(TransportEvent::Open);

    loop {
        tokio::select! {
            // Incoming WebSocket frame
            frame = reader.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        sink.deliver(TransportEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        sink.deliver(TransportEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("WebSocket {url} closed by peer ({code})");
                        state.set(ReadyState::Closed);
                        sink.deliver(TransportEvent::Close { code, reason });
                        return;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Pings are auto-replied by tungstenite; ignore pongs
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket {url} read failed: {e:#}");
                        fail(&sink, &state, format!("{e:#}"));
                        return;
                    }
                    None => {
                        state.set(ReadyState::Closed);
                        sink.deliver(TransportEvent::Close {
                            code: CLOSE_ABNORMAL,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                }
            }
            // Outgoing frame from the transport handle
            outgoing = send_rx.recv() => {
                match outgoing {
                    Some(WsOutgoing::Text(text)) => {
                        if let Err(e) = writer.send_text(&text).await {
                            log::warn!("WebSocket {url} send failed: {e:#}");
                            fail(&sink, &state, format!("WebSocket send failed: {e:#}"));
                            return;
                        }
                    }
                    Some(WsOutgoing::Close) => {
                        if let Err(e) = writer.send_close().await {
                            log::debug!("WebSocket {url} close frame not sent: {e:#}");
                        }
                        state.set(ReadyState::Closed);
                        sink.deliver(TransportEvent::Close {
                            code: CLOSE_NORMAL,
                            reason: "client requested close".to_string(),
                        });
                        return;
                    }
                    None => {
                        // Handle dropped, owner no longer listens
                        state.set(ReadyState::Closed);
                        return;
                    }
                }
            }
        }
    }
}
