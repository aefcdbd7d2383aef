//! Session: the producer that owns successive connections to one channel.
//!
//! A [`ChatSession`] opens a [`ChatConnection`] through its [`Connector`],
//! hands out command ids, and replaces the connection when its socket
//! closes. Each replacement inherits the subscriptions and in-flight calls
//! of the connection it replaces, so callers subscribe once per session.
//!
//! # Reconnection
//!
//! ```text
//! on_close ──► notify_close
//!                 ├── explicit disconnect   → stay down
//!                 ├── policy.reconnect off  → stay down
//!                 ├── stale connection      → ignore
//!                 └── spawn reconnect loop: sleep(backoff + jitter) → open
//!                        backoff doubles per failure, capped at max_backoff
//! ```

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use super::connection::{isolate, ChatConnectable, ChatConnection};
use super::event::{EventKind, IncomingMessageData};
use super::method::ChatMethod;
use super::reply::ReplyHandler;
use super::router::{EventHandler, EventRouter};
use super::transport::{pump, Connector};
use super::{ChatError, ChatInfo, ConnectionState};
use crate::constants::{BACKOFF_JITTER_MS, INITIAL_BACKOFF, MAX_BACKOFF, PENDING_HANDOFF_TTL};
use crate::rest::HttpDelete;

/// When and how fast a session replaces a closed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Replace connections that close without an explicit disconnect.
    pub reconnect: bool,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay.
    pub max_backoff: Duration,
    /// Upper bound of the random delay added to each attempt.
    pub jitter: Duration,
    /// Pending calls older than this are failed with
    /// [`ChatError::Expired`] at hand-off instead of carried over.
    pub handoff_ttl: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_attempts: 0,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            jitter: Duration::from_millis(BACKOFF_JITTER_MS),
            handoff_ttl: PENDING_HANDOFF_TTL,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            reconnect: false,
            ..Self::default()
        }
    }

    /// Delay before attempt `failures + 1`, without jitter.
    pub fn backoff(&self, failures: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(failures))
            .min(self.max_backoff)
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::random::<u64>() % max_ms)
    }
}

/// Callback run each time a session installs a new connection.
pub type ConnectHook = Arc<dyn Fn(&Arc<ChatSession>) + Send + Sync>;

/// Builder for [`ChatSession`].
pub struct ChatSessionBuilder {
    connector: Arc<dyn Connector>,
    chat: ChatInfo,
    policy: ReconnectPolicy,
    runtime: Option<Handle>,
    http: Option<Arc<dyn HttpDelete>>,
    subscriptions: EventRouter,
    on_connect: Option<ConnectHook>,
}

impl std::fmt::Debug for ChatSessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSessionBuilder")
            .field("channel", &self.chat.channel)
            .field("policy", &self.policy)
            .field("subscriptions", &self.subscriptions)
            .field("on_connect", &self.on_connect.is_some())
            .finish_non_exhaustive()
    }
}

impl ChatSessionBuilder {
    /// Reconnect policy (default: reconnect forever with backoff).
    #[must_use]
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runtime for sends, pumps and reconnects (default: the current one).
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// HTTP collaborator for the deprecated message delete.
    #[must_use]
    pub fn http(mut self, http: Arc<dyn HttpDelete>) -> Self {
        self.http = Some(http);
        self
    }

    /// Subscribe `handler` on every connection the session opens, before
    /// that connection reads its first frame.
    #[must_use]
    pub fn on(self, kind: EventKind, handler: EventHandler) -> Self {
        self.subscriptions.subscribe(kind, handler);
        self
    }

    /// Run `hook` after each connection is installed and its pump started,
    /// including reconnects. Used to re-authenticate a fresh socket.
    #[must_use]
    pub fn on_connect(mut self, hook: impl Fn(&Arc<ChatSession>) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Build the session.
    ///
    /// # Panics
    ///
    /// Panics if no runtime was set and this is called outside a tokio
    /// runtime.
    pub fn build(self) -> Arc<ChatSession> {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        Arc::new_cyclic(|me| ChatSession {
            connector: self.connector,
            chat: self.chat,
            policy: self.policy,
            runtime,
            http: self.http,
            subscriptions: self.subscriptions,
            on_connect: self.on_connect,
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
            attempts: AtomicUsize::new(0),
            explicit_close: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            me: me.clone(),
        })
    }
}

/// Owner of the connections to one chat channel.
pub struct ChatSession {
    connector: Arc<dyn Connector>,
    chat: ChatInfo,
    policy: ReconnectPolicy,
    runtime: Handle,
    http: Option<Arc<dyn HttpDelete>>,
    subscriptions: EventRouter,
    on_connect: Option<ConnectHook>,
    current: Mutex<Option<Arc<ChatConnection>>>,
    next_id: AtomicU64,
    attempts: AtomicUsize,
    explicit_close: AtomicBool,
    reconnecting: AtomicBool,
    me: Weak<ChatSession>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("channel", &self.chat.channel)
            .field("policy", &self.policy)
            .field("connection", &self.connection())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Create a session. Nothing connects until [`Self::connect`].
    pub fn new(
        connector: Arc<dyn Connector>,
        chat: ChatInfo,
        policy: ReconnectPolicy,
        runtime: Handle,
    ) -> Arc<Self> {
        Self::builder(connector, chat)
            .policy(policy)
            .runtime(runtime)
            .build()
    }

    /// Start building a session.
    pub fn builder(connector: Arc<dyn Connector>, chat: ChatInfo) -> ChatSessionBuilder {
        ChatSessionBuilder {
            connector,
            chat,
            policy: ReconnectPolicy::default(),
            runtime: None,
            http: None,
            subscriptions: EventRouter::new(),
            on_connect: None,
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<ChatConnection>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connection, if one has been opened.
    ///
    /// After a close this is the closed connection until a replacement is
    /// installed.
    pub fn connection(&self) -> Option<Arc<ChatConnection>> {
        self.lock_current().clone()
    }

    fn require_connection(&self) -> Result<Arc<ChatConnection>, ChatError> {
        self.connection().ok_or(ChatError::NotConnected)
    }

    /// Channel metadata this session connects with.
    pub fn chat(&self) -> &ChatInfo {
        &self.chat
    }

    /// State of the current connection (`Closed` when none).
    pub fn state(&self) -> ConnectionState {
        self.connection()
            .map_or(ConnectionState::Closed, |connection| connection.state())
    }

    /// Open a connection.
    ///
    /// Clears a previous explicit disconnect. A previously open connection
    /// is replaced: the new one inherits from it and it is then closed.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] if there is no endpoint or the
    /// connector fails.
    pub async fn connect(&self) -> Result<Arc<ChatConnection>, ChatError> {
        self.open_connection(true).await
    }

    /// `requested` marks a caller-initiated open, which clears an earlier
    /// explicit disconnect once the new connection is current.
    async fn open_connection(&self, requested: bool) -> Result<Arc<ChatConnection>, ChatError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let endpoint = self
            .chat
            .endpoint(attempt)
            .ok_or_else(|| ChatError::Transport("no chat endpoints".to_string()))?
            .to_string();

        let (transport, source) = self.connector.connect(&endpoint).await?;

        let producer: Weak<dyn ChatConnectable> = self.me.clone();
        let mut connection = ChatConnection::new(transport, self.chat.clone(), self.runtime.clone())
            .with_producer(producer)
            .with_handoff_ttl(self.policy.handoff_ttl);
        if let Some(http) = &self.http {
            connection = connection.with_http(Arc::clone(http));
        }
        for kind in EventKind::ALL {
            for handler in self.subscriptions.handlers(kind) {
                connection.on(kind, handler);
            }
        }
        let connection = Arc::new(connection);

        let previous = self.lock_current().replace(Arc::clone(&connection));
        if let Some(previous) = &previous {
            connection.inherit(previous);
        }
        connection.mark_open();
        if requested {
            self.explicit_close.store(false, Ordering::SeqCst);
        }
        self.reconnecting.store(false, Ordering::SeqCst);

        log::info!(
            "[ChatSession] Connected to {} (channel {}, attempt {})",
            endpoint,
            self.chat.channel,
            attempt
        );
        self.runtime.spawn(pump(source, Arc::clone(&connection)));

        if let (Some(hook), Some(session)) = (&self.on_connect, self.me.upgrade()) {
            isolate("connect hook", || hook(&session));
        }

        if let Some(previous) = previous {
            if previous.state() != ConnectionState::Closed {
                log::debug!("[ChatSession] Closing superseded connection");
                previous.close().await;
            }
        }

        Ok(connection)
    }

    /// Close the current connection without reconnecting.
    pub async fn disconnect(&self) {
        self.explicit_close.store(true, Ordering::SeqCst);
        let current = self.connection();
        if let Some(connection) = current {
            log::info!("[ChatSession] Disconnecting from channel {}", self.chat.channel);
            connection.close().await;
        }
    }

    /// Allocate a command id. Ids are unique for the life of the session.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Subscribe to events on the current connection (and its successors).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotConnected`] before the first connect.
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> Result<bool, ChatError> {
        Ok(self.require_connection()?.on(kind, handler))
    }

    /// Send `method` on the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotConnected`] without a connection, or
    /// [`ChatError::TransportClosed`] if it has closed.
    pub fn send(&self, method: ChatMethod) -> Result<(), ChatError> {
        self.require_connection()?.send(method)
    }

    /// Send `method` and route its reply to `handler`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub fn send_with_reply<R>(&self, method: ChatMethod, handler: ReplyHandler<R>) -> Result<(), ChatError>
    where
        R: DeserializeOwned + 'static,
    {
        self.require_connection()?.send_with_reply(method, handler)
    }

    /// Build a method with a fresh id and send it. Returns the id.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub fn call(&self, build: impl FnOnce(u64) -> ChatMethod) -> Result<u64, ChatError> {
        let id = self.next_id();
        self.send(build(id))?;
        Ok(id)
    }

    /// Build a method with a fresh id and send it with a reply handler.
    /// Returns the id.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub fn call_with_reply<R>(
        &self,
        build: impl FnOnce(u64) -> ChatMethod,
        handler: ReplyHandler<R>,
    ) -> Result<u64, ChatError>
    where
        R: DeserializeOwned + 'static,
    {
        let id = self.next_id();
        self.send_with_reply(build(id), handler)?;
        Ok(id)
    }

    /// Delete `message` through the REST side-channel.
    /// See [`ChatConnection::delete`].
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotConnected`] without a connection, otherwise
    /// whatever the HTTP collaborator reports.
    pub async fn delete(&self, message: &IncomingMessageData) -> Result<(), ChatError> {
        self.require_connection()?.delete(message).await
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let mut failures = 0u32;
        loop {
            let wait = self.policy.backoff(failures) + self.policy.jitter();
            log::info!(
                "[ChatSession] Reconnecting to channel {} in {:.1}s...",
                self.chat.channel,
                wait.as_secs_f32()
            );
            tokio::time::sleep(wait).await;

            if self.explicit_close.load(Ordering::SeqCst) {
                log::info!("[ChatSession] Disconnected during reconnect backoff");
                break;
            }

            match self.open_connection(false).await {
                Ok(_) => return,
                Err(e) => {
                    failures += 1;
                    log::warn!("[ChatSession] Reconnect attempt {} failed: {}", failures, e);
                    if self.policy.max_attempts != 0 && failures >= self.policy.max_attempts {
                        log::error!(
                            "[ChatSession] Giving up on channel {} after {} attempts",
                            self.chat.channel,
                            failures
                        );
                        break;
                    }
                }
            }
        }
        self.reconnecting.store(false, Ordering::SeqCst);
    }
}

impl ChatConnectable for ChatSession {
    fn notify_close(&self, code: u16, reason: &str, was_clean: bool) {
        if self.explicit_close.load(Ordering::SeqCst) {
            log::info!("[ChatSession] Connection closed after disconnect ({})", code);
            return;
        }
        if !self.policy.reconnect {
            log::info!(
                "[ChatSession] Connection closed ({} {:?}, clean={}); reconnect disabled",
                code,
                reason,
                was_clean
            );
            return;
        }
        if self.state() != ConnectionState::Closed {
            log::debug!("[ChatSession] Ignoring close of a superseded connection ({})", code);
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(session) = self.me.upgrade() else {
            return;
        };

        log::warn!(
            "[ChatSession] Connection closed ({} {:?}, clean={})",
            code,
            reason,
            was_clean
        );
        self.runtime.spawn(session.reconnect_loop());
    }
}
