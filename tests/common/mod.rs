//! In-memory chat transport shared by the integration tests.
//!
//! [`MemoryConnector`] hands the test one [`Peer`] per connection. The peer
//! plays the server: it pushes inbound frames, drops the socket, and reads
//! what the client sent.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mixer_chat::chat::{ChatError, Connector, FrameSource, Inbound, Transport};
use serde_json::Value;
use tokio::sync::mpsc;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct Peer {
    pub endpoint: String,
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    /// Deliver a text frame to the client.
    pub fn push(&self, frame: &str) {
        let _ = self.to_client.send(Inbound::Text(frame.to_string()));
    }

    /// Drop the socket without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self.to_client.send(Inbound::Closed {
            code: 1006,
            reason: "connection lost".to_string(),
            was_clean: false,
        });
    }

    /// Next command the client sent, decoded.
    pub async fn next_sent(&mut self) -> Value {
        let raw = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("client sent nothing")
            .expect("transport gone");
        serde_json::from_str(&raw).expect("client sent invalid JSON")
    }
}

#[derive(Debug)]
struct MemoryTransport {
    to_server: mpsc::UnboundedSender<String>,
    to_client: mpsc::UnboundedSender<Inbound>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_bytes(&self, payload: Vec<u8>) -> Result<(), ChatError> {
        let text = String::from_utf8(payload).map_err(|e| ChatError::Transport(e.to_string()))?;
        self.to_server
            .send(text)
            .map_err(|_| ChatError::TransportClosed)
    }

    async fn close(&self) {
        let _ = self.to_client.send(Inbound::Closed {
            code: 1000,
            reason: "client disconnect".to_string(),
            was_clean: true,
        });
    }
}

struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Inbound {
        self.inbound.recv().await.unwrap_or(Inbound::Closed {
            code: 1006,
            reason: "peer gone".to_string(),
            was_clean: false,
        })
    }
}

/// Connector producing in-memory connections.
#[derive(Debug)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<Peer>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Make every following connect fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connect calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<(Arc<dyn Transport>, Box<dyn FrameSource>), ChatError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChatError::Transport(format!("refused: {endpoint}")));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let _ = self.peers.send(Peer {
            endpoint: endpoint.to_string(),
            to_client: to_client.clone(),
            from_client,
        });

        let transport = MemoryTransport {
            to_server,
            to_client,
        };
        Ok((Arc::new(transport), Box::new(MemorySource { inbound })))
    }
}

/// Receive the next connection the client opened.
pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("no connection opened")
        .expect("connector dropped")
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// A chat message event frame from `user_id`.
pub fn chat_message_frame(user_id: i64, text: &str) -> String {
    serde_json::json!({
        "type": "event",
        "event": "ChatMessage",
        "data": {
            "channel": 1234,
            "id": "1c2b3a40-5d6e-4f70-8a9b-0c1d2e3f4a5b",
            "user_name": if user_id == -1 { "widget" } else { "viewer" },
            "user_id": user_id,
            "user_roles": ["User"],
            "user_level": 12,
            "message": {
                "message": [{ "type": "text", "data": text, "text": text }],
                "meta": {}
            }
        }
    })
    .to_string()
}

/// A successful reply frame for `id`.
pub fn reply_frame(id: u64) -> String {
    serde_json::json!({ "type": "reply", "id": id, "error": null, "data": {} }).to_string()
}
