//! Reply correlation.
//!
//! A [`PendingCall`] is created when a method is sent with a [`ReplyHandler`]
//! and lives in the [`ReplyRegistry`] until the first reply carrying its id
//! arrives. The expected reply shape is the handler's type parameter; it is
//! captured as a decode closure at registration so the registry itself stays
//! untyped.
//!
//! There is no timeout on the live path. A call whose reply never arrives
//! stays resident until hand-off (see [`ReplyRegistry::drain`]) or until the
//! owning connection is dropped, at which point its callbacks are dropped
//! without being invoked.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::event::IncomingMessageData;
use super::ChatError;

/// A reply frame: `{"type": "reply", "id": n, "error": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply<T = Value> {
    /// Id of the method this reply answers.
    pub id: u64,
    /// Server-side error, `null` on success.
    pub error: Option<Value>,
    /// Reply payload.
    pub data: Option<T>,
}

impl<T> ChatReply<T> {
    /// Returns `true` if the server reported an error for the call.
    pub fn is_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_null())
    }
}

/// Payload of the `auth` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthenticationData {
    /// Whether the credentials were accepted (anonymous joins report `false`).
    #[serde(default)]
    pub authenticated: bool,
    /// Roles granted in the channel.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Reply to `auth`.
pub type AuthenticationReply = ChatReply<AuthenticationData>;
/// Reply to `msg`: the message as the server stored it.
pub type ChatMessageReply = ChatReply<IncomingMessageData>;
/// Reply to `whisper`.
pub type WhisperReply = ChatReply<IncomingMessageData>;
/// Reply to `history`.
pub type HistoryReply = ChatReply<Vec<IncomingMessageData>>;
/// Reply with an untyped payload.
pub type GenericReply = ChatReply<Value>;

/// Caller-supplied callbacks for one reply, typed by the expected reply shape.
pub struct ReplyHandler<R> {
    on_success: Box<dyn FnOnce(R) + Send>,
    on_failure: Box<dyn FnOnce(ChatError) + Send>,
}

impl<R> std::fmt::Debug for ReplyHandler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandler")
            .field("expects", &std::any::type_name::<R>())
            .finish_non_exhaustive()
    }
}

impl<R> ReplyHandler<R> {
    /// Create a handler from success and failure callbacks.
    pub fn new(
        on_success: impl FnOnce(R) + Send + 'static,
        on_failure: impl FnOnce(ChatError) + Send + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    /// Create a handler that logs failures instead of reporting them.
    pub fn on_success(on_success: impl FnOnce(R) + Send + 'static) -> Self {
        Self::new(on_success, |e| {
            log::warn!("[ReplyRegistry] Unhandled reply failure: {}", e);
        })
    }
}

/// A registered correlation awaiting its reply.
pub struct PendingCall {
    expected: &'static str,
    registered_at: Instant,
    complete: Box<dyn FnOnce(Result<&str, ChatError>) + Send>,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("expected", &self.expected)
            .field("age", &self.registered_at.elapsed())
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    /// Capture a handler together with the decoder for its reply type.
    pub fn from_handler<R>(handler: ReplyHandler<R>) -> Self
    where
        R: DeserializeOwned + 'static,
    {
        let ReplyHandler {
            on_success,
            on_failure,
        } = handler;

        Self {
            expected: std::any::type_name::<R>(),
            registered_at: Instant::now(),
            complete: Box::new(move |outcome: Result<&str, ChatError>| {
                let decoded =
                    outcome.and_then(|frame| serde_json::from_str::<R>(frame).map_err(ChatError::from));
                match decoded {
                    Ok(reply) => on_success(reply),
                    Err(e) => on_failure(e),
                }
            }),
        }
    }

    /// Name of the reply type this call decodes into.
    pub fn expected_type(&self) -> &'static str {
        self.expected
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Decode `frame` as the expected type and invoke the matching callback.
    pub fn complete(self, frame: &str) {
        (self.complete)(Ok(frame));
    }

    /// Invoke the failure callback with `error`.
    pub fn fail(self, error: ChatError) {
        (self.complete)(Err(error));
    }
}

/// Outstanding request→reply correlations keyed by command id.
///
/// Shared between the send path (register) and the receive path (resolve);
/// every operation takes the lock once, so `resolve` is an atomic
/// remove-and-return.
#[derive(Default)]
pub struct ReplyRegistry {
    pending: Mutex<HashMap<u64, PendingCall>>,
}

impl std::fmt::Debug for ReplyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

impl ReplyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `call` under `id`, returning the call it replaced (last write wins).
    pub fn register(&self, id: u64, call: PendingCall) -> Option<PendingCall> {
        self.lock().insert(id, call)
    }

    /// Remove and return the call registered under `id`.
    pub fn resolve(&self, id: u64) -> Option<PendingCall> {
        self.lock().remove(&id)
    }

    /// Remove every pending call (hand-off source side).
    pub fn drain(&self) -> Vec<(u64, PendingCall)> {
        self.lock().drain().collect()
    }

    /// Add `calls` without replacing existing entries.
    ///
    /// Returns the calls that collided with an id already present here.
    pub fn merge(&self, calls: Vec<(u64, PendingCall)>) -> Vec<(u64, PendingCall)> {
        let mut pending = self.lock();
        let mut rejected = Vec::new();
        for (id, call) in calls {
            if pending.contains_key(&id) {
                rejected.push((id, call));
            } else {
                pending.insert(id, call);
            }
        }
        rejected
    }

    /// Number of pending calls.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
