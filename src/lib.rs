//! Mixer Chat - real-time chat protocol client.
//!
//! This crate implements the client side of the chat WebSocket protocol:
//! outbound method calls correlated with their replies, and server-pushed
//! events fanned out to subscribers.
//!
//! # Architecture
//!
//! ```text
//!   ChatSession (producer)
//!         │  connect / notify_close / reconnect
//!         ▼
//!   ChatConnection ──── Transport (send_bytes)
//!     ├── ReplyRegistry   id → PendingCall
//!     └── EventRouter     EventKind → {handlers}
//!         ▲
//!         │  on_message / on_close
//!   pump(FrameSource)
//! ```
//!
//! # Modules
//!
//! - [`chat`] - Connection, registries, events, replies, methods, session
//! - [`ws`] - Shared WebSocket transport
//! - [`rest`] - HTTP side-channel (chat lookup, deprecated message delete)
//! - [`config`] - Configuration loading/saving

pub mod chat;
pub mod config;
pub mod constants;
pub mod rest;
pub mod ws;

// Re-export commonly used types
pub use chat::{
    ChatConnection, ChatError, ChatEvent, ChatInfo, ChatMethod, ChatSession, EventKind,
    ReconnectPolicy, ReplyHandler,
};
pub use config::Config;
pub use rest::{HttpDelete, RestClient};
