//! WebSocket plumbing for chat endpoints.
//!
//! Wraps `tokio-tungstenite` behind a reader/writer pair so the rest of the
//! crate never names tungstenite types. [`connect`] builds the handshake
//! request (extra headers included), bounds it by [`CONNECT_TIMEOUT`] and
//! splits the resulting stream.

// Rust guideline compliant 2026-02

use std::borrow::Cow;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;

use crate::constants::{CONNECT_TIMEOUT, NORMAL_CLOSE_CODE, NO_STATUS_CLOSE_CODE};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame. Every chat frame arrives as one of these.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame. `code` is 1005 when the peer sent none.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Write half of a chat socket.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed or the write fails.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Answer a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Start the close handshake with a normal-closure code.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send_close(&mut self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(NORMAL_CLOSE_CODE),
            reason: Cow::Borrowed("client disconnect"),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flush and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a chat socket.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Next message, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            if let Some(message) = convert(message) {
                return Some(Ok(message));
            }
        }
    }
}

/// Map a tungstenite message, skipping raw frames.
fn convert(message: tungstenite::Message) -> Option<WsMessage> {
    match message {
        tungstenite::Message::Text(text) => Some(WsMessage::Text(text.to_string())),
        tungstenite::Message::Binary(data) => Some(WsMessage::Binary(data.to_vec())),
        tungstenite::Message::Ping(data) => Some(WsMessage::Ping(data.to_vec())),
        tungstenite::Message::Pong(data) => Some(WsMessage::Pong(data.to_vec())),
        tungstenite::Message::Close(frame) => {
            let (code, reason) = frame
                .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                .unwrap_or((NO_STATUS_CLOSE_CODE, String::new()));
            Some(WsMessage::Close { code, reason })
        }
        tungstenite::Message::Frame(_) => None,
    }
}

/// Open a chat socket.
///
/// `headers` are added to the handshake request as-is.
///
/// # Errors
///
/// Returns an error if the URL or a header is invalid, the handshake fails,
/// or it does not complete within [`CONNECT_TIMEOUT`].
pub async fn connect(url: &str, headers: &[(&str, &str)]) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) =
        tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .with_context(|| format!("WebSocket connect to {url} timed out"))?
            .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Rewrite an `http(s)://` endpoint to `ws(s)://`. Other URLs pass through.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
