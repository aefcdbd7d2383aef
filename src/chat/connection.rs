//! One chat socket: outbound commands, reply correlation and event fan-out.
//!
//! # Protocol
//!
//! - Outbound: `send` serializes a [`ChatMethod`] and hands it to the
//!   transport from a spawned task, so callers never wait on the network.
//!   `send_with_reply` first registers a [`PendingCall`] under the method id.
//! - Inbound: every text frame goes through [`ChatConnection::on_message`]:
//!   - top-level `id` - a reply; resolved against the [`ReplyRegistry`]
//!   - top-level `event` - an event; resolved to an [`EventKind`] and
//!     dispatched through the [`EventRouter`]
//!   - anything else - dropped
//! - Close: [`ChatConnection::on_close`] makes the connection terminal and
//!   notifies the producer exactly once.
//!
//! Handlers run synchronously on the delivering task. A slow handler delays
//! every later frame on this connection. A panicking handler is logged and
//! skipped; other handlers still receive the event.
//!
//! Commands sent back to back are transmitted from separate tasks and may
//! reach the wire in a different order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;

use super::event::{self, ChatEvent, EventKind, IncomingMessageData};
use super::method::ChatMethod;
use super::reply::{PendingCall, ReplyHandler, ReplyRegistry};
use super::router::{EventHandler, EventRouter};
use super::transport::Transport;
use super::{ChatError, ChatInfo, ConnectionState};
use crate::constants::PENDING_HANDOFF_TTL;
use crate::rest::HttpDelete;

/// Owner of a connection, told when the socket closes.
///
/// The owner decides whether and how to replace the connection.
pub trait ChatConnectable: Send + Sync {
    /// Called once per connection when its socket closes.
    fn notify_close(&self, code: u16, reason: &str, was_clean: bool);
}

/// What [`ChatConnection::inherit`] carried over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandOff {
    /// Subscriptions newly added to the new connection.
    pub subscriptions: usize,
    /// Pending calls moved to the new connection.
    pub pending: usize,
    /// Pending calls left on a still-open previous connection; they move
    /// over when it closes, if still unanswered.
    pub deferred: usize,
    /// Pending calls failed with [`ChatError::Expired`] instead of moved.
    pub expired: usize,
    /// Pending calls dropped because the new connection already used their id.
    pub collided: usize,
}

/// A chat connection over one transport.
pub struct ChatConnection {
    transport: Arc<dyn Transport>,
    producer: Option<Weak<dyn ChatConnectable>>,
    http: Option<Arc<dyn HttpDelete>>,
    chat: ChatInfo,
    runtime: Handle,
    state: Mutex<ConnectionState>,
    replies: ReplyRegistry,
    events: EventRouter,
    handoff_ttl: Duration,
    successor: Mutex<Option<Weak<ChatConnection>>>,
}

impl std::fmt::Debug for ChatConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConnection")
            .field("channel", &self.chat.channel)
            .field("state", &self.state())
            .field("replies", &self.replies)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl ChatConnection {
    /// Create a connection in the `Connecting` state.
    ///
    /// `runtime` executes the deferred encode-and-transmit work of `send`.
    pub fn new(transport: Arc<dyn Transport>, chat: ChatInfo, runtime: Handle) -> Self {
        Self {
            transport,
            producer: None,
            http: None,
            chat,
            runtime,
            state: Mutex::new(ConnectionState::Connecting),
            replies: ReplyRegistry::new(),
            events: EventRouter::new(),
            handoff_ttl: PENDING_HANDOFF_TTL,
            successor: Mutex::new(None),
        }
    }

    /// Set the owner notified on close.
    #[must_use]
    pub fn with_producer(mut self, producer: Weak<dyn ChatConnectable>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Set the HTTP collaborator used by [`Self::delete`].
    #[must_use]
    pub fn with_http(mut self, http: Arc<dyn HttpDelete>) -> Self {
        self.http = Some(http);
        self
    }

    /// Age past which an inherited pending call is failed with
    /// [`ChatError::Expired`] instead of adopted.
    #[must_use]
    pub fn with_handoff_ttl(mut self, ttl: Duration) -> Self {
        self.handoff_ttl = ttl;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_successor(&self) -> MutexGuard<'_, Option<Weak<ChatConnection>>> {
        self.successor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    /// Endpoint and session metadata.
    pub fn chat(&self) -> &ChatInfo {
        &self.chat
    }

    /// Hand-off expiry age, see [`Self::with_handoff_ttl`].
    pub fn handoff_ttl(&self) -> Duration {
        self.handoff_ttl
    }

    /// Number of calls awaiting a reply.
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    /// Number of handlers subscribed to `kind`.
    pub fn subscriptions(&self, kind: EventKind) -> usize {
        self.events.handler_count(kind)
    }

    /// Move from `Connecting` to `Open`. No effect in any other state.
    pub fn mark_open(&self) {
        let mut state = self.lock_state();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
        }
    }

    /// Subscribe `handler` to events of `kind`.
    ///
    /// Returns `false` if this exact handler was already subscribed.
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> bool {
        self.events.subscribe(kind, handler)
    }

    /// Remove a subscription. Returns `true` if it existed.
    pub fn off(&self, kind: EventKind, handler: &EventHandler) -> bool {
        self.events.unsubscribe(kind, handler)
    }

    /// Send a command without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransportClosed`] once the connection has closed.
    pub fn send(&self, method: ChatMethod) -> Result<(), ChatError> {
        self.ensure_not_closed()?;
        self.transmit(method);
        Ok(())
    }

    /// Send a command and route its reply, decoded as `R`, to `handler`.
    ///
    /// The pending call is registered before transmission is scheduled.
    /// Reusing an id that is still in flight replaces the earlier call.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransportClosed`] once the connection has closed.
    pub fn send_with_reply<R>(&self, method: ChatMethod, handler: ReplyHandler<R>) -> Result<(), ChatError>
    where
        R: DeserializeOwned + 'static,
    {
        // Held across check and register so a call never lands after on_close.
        let replaced = {
            let state = self.lock_state();
            if *state == ConnectionState::Closed {
                return Err(ChatError::TransportClosed);
            }
            self.replies
                .register(method.id, PendingCall::from_handler(handler))
        };
        if let Some(replaced) = replaced {
            log::debug!(
                "[ChatConnection] Replaced pending call {} ({})",
                method.id,
                replaced.expected_type()
            );
        }
        self.transmit(method);
        Ok(())
    }

    fn ensure_not_closed(&self) -> Result<(), ChatError> {
        if self.state() == ConnectionState::Closed {
            return Err(ChatError::TransportClosed);
        }
        Ok(())
    }

    fn transmit(&self, method: ChatMethod) {
        let transport = Arc::clone(&self.transport);
        self.runtime.spawn(async move {
            let payload = match method.to_wire() {
                Ok(payload) => payload,
                Err(e) => {
                    log::error!("[ChatConnection] Failed to encode '{}': {}", method.method, e);
                    return;
                }
            };
            if let Err(e) = transport.send_bytes(payload).await {
                log::warn!(
                    "[ChatConnection] Failed to send '{}' (id={}): {}",
                    method.method,
                    method.id,
                    e
                );
            }
        });
    }

    /// Handle one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Decode`] when the frame cannot be handled and no
    /// pending call exists to receive the failure: unparsable JSON, a
    /// non-integer reply id, or an event payload that does not match its
    /// resolved variant. Unknown event types and orphaned replies are
    /// dropped and return `Ok`.
    pub fn on_message(&self, raw: &str) -> Result<(), ChatError> {
        let mut frame: Value = serde_json::from_str(raw)?;

        if let Some(id) = frame.get("id") {
            let id = id
                .as_u64()
                .ok_or_else(|| ChatError::Decode(format!("reply id is not an unsigned integer: {id}")))?;
            self.on_reply(id, raw);
            return Ok(());
        }

        if let Some(name) = frame.get("event") {
            let name = name
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| ChatError::Decode(format!("event name is not a string: {name}")))?;
            let payload = frame
                .get_mut("data")
                .map(Value::take)
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            return self.on_event(&name, payload);
        }

        log::trace!("[ChatConnection] Dropping unrecognized frame: {}", raw);
        Ok(())
    }

    fn on_reply(&self, id: u64, raw: &str) {
        match self.replies.resolve(id) {
            Some(call) => {
                log::trace!("[ChatConnection] Reply {} -> {}", id, call.expected_type());
                isolate("reply handler", || call.complete(raw));
            }
            None => log::debug!("[ChatConnection] {}", ChatError::OrphanedReply(id)),
        }
    }

    fn on_event(&self, name: &str, payload: Value) -> Result<(), ChatError> {
        let kind = match event::resolve_variant(name, &payload) {
            Ok(kind) => kind,
            Err(e) => {
                log::debug!("[ChatConnection] Dropping event: {}", e);
                return Ok(());
            }
        };

        let event = ChatEvent::decode(kind, payload)?;
        let invoked = self.events.dispatch_with(kind, &event, |handler, event| {
            isolate("event handler", || handler(event));
        });
        log::trace!("[ChatConnection] {} dispatched to {} handler(s)", kind, invoked);
        Ok(())
    }

    /// Mark the connection closed and notify the producer.
    ///
    /// Only the first call has any effect. Unanswered calls move to the
    /// successor registered by [`Self::inherit`], or stay in place for a
    /// later one.
    pub fn on_close(&self, code: u16, reason: &str, was_clean: bool) {
        let successor = {
            let mut state = self.lock_state();
            if *state == ConnectionState::Closed {
                log::debug!("[ChatConnection] Ignoring repeated close ({})", code);
                return;
            }
            *state = ConnectionState::Closed;
            self.lock_successor().take()
        };

        log::info!(
            "[ChatConnection] Closed (code={}, reason={:?}, clean={}, pending={})",
            code,
            reason,
            was_clean,
            self.replies.len()
        );

        if let Some(successor) = successor.as_ref().and_then(Weak::upgrade) {
            let hand_off = successor.adopt(self.replies.drain());
            log::info!("[ChatConnection] Handed over on close {:?}", hand_off);
        }

        if let Some(producer) = self.producer.as_ref().and_then(Weak::upgrade) {
            producer.notify_close(code, reason, was_clean);
        }
    }

    /// Take over the subscriptions and pending calls of `previous`.
    ///
    /// Additive: this connection's own subscriptions and pending ids are
    /// never replaced. Subscriptions are copied right away. Pending calls
    /// move only once `previous` is closed, since a reply arrives on the
    /// socket that carried its request: if `previous` is still open they
    /// stay resolvable there and whatever is unanswered moves over when it
    /// closes. Calls older than the hand-off TTL are failed with
    /// [`ChatError::Expired`] instead of moved. Call before this connection
    /// receives its first frame.
    pub fn inherit(self: &Arc<Self>, previous: &ChatConnection) -> HandOff {
        let subscriptions = self.events.merge_from(&previous.events);

        {
            let state = previous.lock_state();
            if *state != ConnectionState::Closed {
                *previous.lock_successor() = Some(Arc::downgrade(self));
                let hand_off = HandOff {
                    subscriptions,
                    deferred: previous.replies.len(),
                    ..HandOff::default()
                };
                log::info!("[ChatConnection] Inherited {:?}", hand_off);
                return hand_off;
            }
        }

        let hand_off = HandOff {
            subscriptions,
            ..self.adopt(previous.replies.drain())
        };
        log::info!("[ChatConnection] Inherited {:?}", hand_off);
        hand_off
    }

    fn adopt(&self, calls: Vec<(u64, PendingCall)>) -> HandOff {
        let (stale, fresh): (Vec<_>, Vec<_>) = calls
            .into_iter()
            .partition(|(_, call)| call.age() > self.handoff_ttl);

        let expired = stale.len();
        for (id, call) in stale {
            isolate("reply handler", || call.fail(ChatError::Expired(id)));
        }

        let offered = fresh.len();
        let collided = self.replies.merge(fresh);
        for (id, call) in &collided {
            log::debug!(
                "[ChatConnection] Dropping inherited call {} ({}): id already in use",
                id,
                call.expected_type()
            );
        }

        HandOff {
            pending: offered - collided.len(),
            expired,
            collided: collided.len(),
            ..HandOff::default()
        }
    }

    /// Delete a message through the REST side-channel.
    ///
    /// Deprecated by the protocol's `deleteMessage` method
    /// ([`ChatMethod::delete_message`]); kept for servers that only accept
    /// the HTTP route.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Http`] if no HTTP client is configured or the
    /// request fails.
    pub async fn delete(&self, message: &IncomingMessageData) -> Result<(), ChatError> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| ChatError::Http("no HTTP client configured".to_string()))?;
        let path = format!("chats/{}/message/{}", message.channel, message.id);
        http.delete(&path).await
    }

    /// Ask the transport to close. The close notification follows through
    /// the frame source.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

/// Run a user callback, logging instead of propagating a panic.
pub(super) fn isolate(context: &str, callback: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        log::error!("[ChatConnection] {} panicked: {}", context, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::reply::GenericReply;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct RecordingTransport {
        sent: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_bytes(&self, payload: Vec<u8>) -> Result<(), ChatError> {
            let _ = self.sent.send(String::from_utf8(payload).unwrap());
            Ok(())
        }
        async fn close(&self) {}
    }

    fn connection() -> (ChatConnection, mpsc::UnboundedReceiver<String>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let connection = ChatConnection::new(
            Arc::new(RecordingTransport { sent }),
            ChatInfo::with_endpoint(1234, "wss://chat.example.com"),
            Handle::current(),
        );
        (connection, rx)
    }

    #[tokio::test]
    async fn test_send_transmits_encoded_method() {
        let (connection, mut rx) = connection();
        connection.send(ChatMethod::msg(3, "hi")).unwrap();

        let wire: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(wire["method"], "msg");
        assert_eq!(wire["id"], 3);
        assert_eq!(connection.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_send_with_reply_registers_before_transmit() {
        let (connection, mut rx) = connection();
        let ok = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ok);
        connection
            .send_with_reply(
                ChatMethod::ping(4),
                ReplyHandler::<GenericReply>::on_success(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(connection.pending_replies(), 1);
        rx.recv().await.unwrap();

        connection
            .on_message(r#"{"type":"reply","id":4,"error":null,"data":null}"#)
            .unwrap();
        assert_eq!(ok.load(Ordering::SeqCst), 1);
        assert_eq!(connection.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_unparsable_frame_is_surfaced() {
        let (connection, _rx) = connection();
        assert!(matches!(connection.on_message("{not json"), Err(ChatError::Decode(_))));
    }

    #[tokio::test]
    async fn test_non_integer_reply_id_is_surfaced() {
        let (connection, _rx) = connection();
        assert!(matches!(
            connection.on_message(r#"{"id":"abc"}"#),
            Err(ChatError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unrecognized_frame_dropped() {
        let (connection, _rx) = connection();
        assert_eq!(connection.on_message(r#"{"type":"something"}"#), Ok(()));
        assert_eq!(connection.on_message("[1,2,3]"), Ok(()));
    }

    #[tokio::test]
    async fn test_event_decode_failure_is_surfaced() {
        let (connection, _rx) = connection();
        let result = connection.on_message(r#"{"type":"event","event":"ChatMessage","data":{"user_id":42}}"#);
        assert!(matches!(result, Err(ChatError::Decode(_))));
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_block_others() {
        let (connection, _rx) = connection();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        connection.on(
            EventKind::WelcomeEvent,
            Arc::new(|_: &ChatEvent| panic!("subscriber bug")),
        );
        connection.on(
            EventKind::WelcomeEvent,
            Arc::new(move |_: &ChatEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        connection
            .on_message(r#"{"type":"event","event":"WelcomeEvent","data":{}}"#)
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mark_open_only_from_connecting() {
        let (connection, _rx) = connection();
        assert_eq!(connection.state(), ConnectionState::Connecting);
        connection.mark_open();
        assert_eq!(connection.state(), ConnectionState::Open);
        connection.on_close(1000, "bye", true);
        connection.mark_open();
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_send_with_reply_after_close_registers_nothing() {
        let (connection, _rx) = connection();
        connection.on_close(1006, "lost", false);

        let result = connection.send_with_reply(
            ChatMethod::ping(5),
            ReplyHandler::<GenericReply>::on_success(|_| {}),
        );

        assert_eq!(result, Err(ChatError::TransportClosed));
        assert_eq!(connection.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_handoff_ttl_defaults_and_overrides() {
        let (connection, _rx) = connection();
        assert_eq!(connection.handoff_ttl(), PENDING_HANDOFF_TTL);
        let connection = connection.with_handoff_ttl(Duration::from_millis(250));
        assert_eq!(connection.handoff_ttl(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_delete_without_http_client() {
        let (connection, _rx) = connection();
        let message: IncomingMessageData = serde_json::from_value(serde_json::json!({
            "channel": 1234,
            "id": "5b2c4b38-6d7a-4a2e-9a3e-2f1c0d9e8b71",
            "user_name": "someone",
            "user_id": 42,
            "message": { "message": [], "meta": {} }
        }))
        .unwrap();
        assert!(matches!(connection.delete(&message).await, Err(ChatError::Http(_))));
    }
}
