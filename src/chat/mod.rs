//! Chat protocol client.
//!
//! A single WebSocket carries two multiplexed streams: replies to the
//! method calls we send (correlated by numeric `id`) and events pushed by the
//! server (identified by their `event` name). [`ChatConnection`] splits the
//! inbound stream between a [`ReplyRegistry`] and an [`EventRouter`].
//!
//! # Architecture
//!
//! ```text
//! ChatSession (producer, owns successive connections)
//!     │
//!     └── ChatConnection (one per socket)
//!             ├── ReplyRegistry  (id → PendingCall, consumed once)
//!             ├── EventRouter    (EventKind → handler set, never consumed)
//!             └── Transport      (send_bytes / close)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let chat = RestClient::new(DEFAULT_BASE_PATH, None)?.chat(channel).await?;
//! let session = ChatSession::new(Arc::new(WsConnector::new()), chat, ReconnectPolicy::default(), handle);
//! session.connect().await?;
//!
//! session.on(EventKind::ChatMessage, Arc::new(|event: &ChatEvent| {
//!     log::info!("{event:?}");
//! }))?;
//!
//! session.call_with_reply(
//!     |id| ChatMethod::msg(id, "hello"),
//!     ReplyHandler::<ChatMessageReply>::new(|reply| log::info!("sent {:?}", reply.id), |_| {}),
//! )?;
//! ```
//!
//! # Hand-off
//!
//! When a socket closes the connection notifies its producer exactly once.
//! The session opens a replacement and calls [`ChatConnection::inherit`]
//! before any frame reaches it, so subscriptions and in-flight replies
//! survive the reconnect.

pub mod connection;
pub mod event;
pub mod method;
pub mod reply;
pub mod router;
pub mod session;
pub mod transport;

use serde::Deserialize;

/// Connection lifecycle state.
///
/// There is no distinct closing state: once a close notification fires the
/// connection is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Transport is attached but frames are not yet flowing.
    #[default]
    Connecting,
    /// Frames are flowing.
    Open,
    /// Close notification has fired. Sends fail with [`ChatError::TransportClosed`].
    Closed,
}

/// Endpoint and session metadata for one chat channel.
///
/// Returned by `GET chats/{channel}`; every connection carries a copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    /// Channel the metadata belongs to (not part of the HTTP body).
    #[serde(default)]
    pub channel: u64,
    /// WebSocket endpoints, in server preference order.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Key used by the `auth` method. Absent for anonymous lookups.
    #[serde(default)]
    pub authkey: Option<String>,
    /// Roles of the authenticated user in this channel.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Permissions of the authenticated user in this channel.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ChatInfo {
    /// Metadata for a single known endpoint.
    pub fn with_endpoint(channel: u64, endpoint: impl Into<String>) -> Self {
        Self {
            channel,
            endpoints: vec![endpoint.into()],
            ..Self::default()
        }
    }

    /// Endpoint to use for the given connection attempt (round-robin).
    pub fn endpoint(&self, attempt: usize) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        self.endpoints
            .get(attempt % self.endpoints.len())
            .map(String::as_str)
    }
}

/// Errors produced by the chat client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Inbound frame does not match the expected or resolved shape.
    Decode(String),
    /// Wire event name has no known variant.
    UnknownEventType(String),
    /// Reply id matched no pending call.
    OrphanedReply(u64),
    /// Send attempted after the connection closed.
    TransportClosed,
    /// Session has no live connection.
    NotConnected,
    /// Transport failed to connect or transmit.
    Transport(String),
    /// REST side-channel request failed.
    Http(String),
    /// Pending call was dropped at hand-off because it was too old.
    Expired(u64),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "Decode error: {msg}"),
            Self::UnknownEventType(name) => write!(f, "Unknown event type: {name}"),
            Self::OrphanedReply(id) => write!(f, "No pending call for reply id {id}"),
            Self::TransportClosed => write!(f, "Transport closed"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Http(msg) => write!(f, "HTTP error: {msg}"),
            Self::Expired(id) => write!(f, "Pending call {id} expired before hand-off"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

// Re-exports
pub use connection::{ChatConnectable, ChatConnection, HandOff};
pub use event::{ChatEvent, EventKind};
pub use method::ChatMethod;
pub use reply::{
    AuthenticationReply, ChatMessageReply, ChatReply, GenericReply, HistoryReply, PendingCall,
    ReplyHandler, ReplyRegistry, WhisperReply,
};
pub use router::{EventHandler, EventRouter};
pub use session::{ChatSession, ChatSessionBuilder, ConnectHook, ReconnectPolicy};
pub use transport::{pump, Connector, FrameSource, Inbound, Transport, WsConnector};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_info_endpoint_round_robin() {
        let info = ChatInfo {
            endpoints: vec!["wss://a".into(), "wss://b".into()],
            ..ChatInfo::default()
        };
        assert_eq!(info.endpoint(0), Some("wss://a"));
        assert_eq!(info.endpoint(1), Some("wss://b"));
        assert_eq!(info.endpoint(2), Some("wss://a"));
    }

    #[test]
    fn test_chat_info_no_endpoints() {
        assert_eq!(ChatInfo::default().endpoint(0), None);
    }

    #[test]
    fn test_chat_info_deserialize() {
        let json = serde_json::json!({
            "roles": ["User"],
            "authkey": "abc",
            "permissions": ["chat"],
            "endpoints": ["wss://chat1.example.com:443"],
            "isLoadShed": false
        });
        let info: ChatInfo = serde_json::from_value(json).expect("valid ChatInfo");
        assert_eq!(info.authkey.as_deref(), Some("abc"));
        assert_eq!(info.endpoints.len(), 1);
        assert_eq!(info.channel, 0);
    }

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::TransportClosed.to_string(), "Transport closed");
        assert_eq!(
            ChatError::UnknownEventType("Nope".into()).to_string(),
            "Unknown event type: Nope"
        );
    }
}
