//! Transport boundary.
//!
//! The connection never touches socket framing. It consumes a transport
//! through three seams:
//!
//! - [`Transport`] - send bytes, close
//! - [`FrameSource`] - next inbound text frame, or the close notification
//! - [`Connector`] - open both for an endpoint
//!
//! [`pump`] feeds a frame source into a connection in delivery order and ends
//! with exactly one `on_close`. [`WsConnector`] is the WebSocket
//! implementation on top of [`crate::ws`].

// Rust guideline compliant 2026-02

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::connection::ChatConnection;
use super::ChatError;
use crate::constants::{ABNORMAL_CLOSE_CODE, NORMAL_CLOSE_CODE};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Inbound item delivered by a [`FrameSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// The socket closed. Always the last item.
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Whether a close handshake completed.
        was_clean: bool,
    },
}

/// Outbound half of a transport.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Transmit one serialized command.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransportClosed`] if the transport is gone, or
    /// [`ChatError::Transport`] if the payload cannot be sent.
    async fn send_bytes(&self, payload: Vec<u8>) -> Result<(), ChatError>;

    /// Begin closing the socket. The close notification still arrives
    /// through the frame source.
    async fn close(&self);
}

/// Inbound half of a transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next inbound item. Must not be called after it has
    /// returned [`Inbound::Closed`].
    async fn next_frame(&mut self) -> Inbound;
}

/// Opens transports for chat endpoints.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] if the connection cannot be opened.
    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<(Arc<dyn Transport>, Box<dyn FrameSource>), ChatError>;
}

/// Deliver every frame from `source` to `connection` until the socket closes.
///
/// Errors surfaced by [`ChatConnection::on_message`] are logged here; they
/// never stop delivery of later frames.
pub async fn pump(mut source: Box<dyn FrameSource>, connection: Arc<ChatConnection>) {
    loop {
        match source.next_frame().await {
            Inbound::Text(text) => {
                if let Err(e) = connection.on_message(&text) {
                    log::warn!("[ChatConnection] Unhandled inbound frame: {}", e);
                }
            }
            Inbound::Closed {
                code,
                reason,
                was_clean,
            } => {
                connection.on_close(code, &reason, was_clean);
                break;
            }
        }
    }
}

/// Item queued for the WebSocket writer task.
#[derive(Debug)]
enum Outgoing {
    Text(String),
    Pong(Vec<u8>),
    Close,
}

/// WebSocket [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    headers: Vec<(String, String)>,
}

impl WsConnector {
    /// Create a connector with no extra handshake headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to the WebSocket handshake (e.g. `User-Agent`).
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<(Arc<dyn Transport>, Box<dyn FrameSource>), ChatError> {
        let url = ws::http_to_ws_scheme(endpoint);
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        log::debug!("[WsConnector] Connecting to {}", url);
        let (writer, reader) = ws::connect(&url, &headers)
            .await
            .map_err(|e| ChatError::Transport(format!("{e:#}")))?;
        log::info!("[WsConnector] Connected to {}", url);

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(writer, outgoing_rx));

        let transport = WsTransport {
            outgoing: outgoing_tx.clone(),
        };
        let source = WsFrameSource {
            reader,
            outgoing: outgoing_tx,
        };
        Ok((Arc::new(transport), Box::new(source)))
    }
}

/// Writer half: commands are queued and written by a dedicated task.
#[derive(Debug)]
struct WsTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_bytes(&self, payload: Vec<u8>) -> Result<(), ChatError> {
        let text = String::from_utf8(payload)
            .map_err(|e| ChatError::Transport(format!("payload is not UTF-8: {e}")))?;
        if self.outgoing.send(Outgoing::Text(text)).is_err() {
            return Err(ChatError::TransportClosed);
        }
        Ok(())
    }

    async fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

/// Reader half.
#[derive(Debug)]
struct WsFrameSource {
    reader: WsReader,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Inbound {
        loop {
            match self.reader.recv().await {
                Some(Ok(WsMessage::Text(text))) => return Inbound::Text(text),
                Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Inbound::Text(text),
                    Err(e) => log::debug!("[WsConnector] Dropping non-UTF-8 binary frame: {}", e),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = self.outgoing.send(Outgoing::Pong(data));
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close { code, reason })) => {
                    return Inbound::Closed {
                        code,
                        reason,
                        was_clean: true,
                    };
                }
                Some(Err(e)) => {
                    log::warn!("[WsConnector] Read error: {:#}", e);
                    return Inbound::Closed {
                        code: ABNORMAL_CLOSE_CODE,
                        reason: e.to_string(),
                        was_clean: false,
                    };
                }
                None => {
                    return Inbound::Closed {
                        code: ABNORMAL_CLOSE_CODE,
                        reason: "stream ended".to_string(),
                        was_clean: false,
                    };
                }
            }
        }
    }
}

/// Drain the outgoing queue into the socket until close or write failure.
async fn run_writer(mut writer: WsWriter, mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(item) = outgoing_rx.recv().await {
        let result = match item {
            Outgoing::Text(text) => writer.send_text(&text).await,
            Outgoing::Pong(data) => writer.send_pong(data).await,
            Outgoing::Close => {
                log::debug!("[WsConnector] Sending close ({})", NORMAL_CLOSE_CODE);
                if let Err(e) = writer.send_close().await {
                    log::debug!("[WsConnector] Close frame not sent: {:#}", e);
                }
                break;
            }
        };
        if let Err(e) = result {
            log::warn!("[WsConnector] Write failed: {:#}", e);
            break;
        }
    }
    let _ = writer.close().await;
}
