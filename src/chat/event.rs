//! Server-pushed events and event-type resolution.
//!
//! Events arrive as `{"type": "event", "event": <name>, "data": {...}}`.
//! The wire name normally picks the variant, with one structural exception:
//! widgets post through the same `ChatMessage` event as people, and are only
//! distinguishable by `data.user_id == -1`. [`resolve_variant`] applies that
//! override before falling back to the name table.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::ChatError;

/// `user_id` carried by messages that automated widgets post.
pub const WIDGET_USER_ID: i64 = -1;

/// Known event variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Sent once after the socket opens.
    WelcomeEvent,
    /// A chat message from a person.
    ChatMessage,
    /// A chat message posted by a widget (`user_id == -1`).
    WidgetMessage,
    /// A user joined the channel.
    UserJoin,
    /// A user left the channel.
    UserLeave,
    /// A user's roles or permissions changed.
    UserUpdate,
    /// A user was timed out.
    UserTimeout,
    /// A poll started.
    PollStart,
    /// A poll ended (or received a vote).
    PollEnd,
    /// A single message was deleted.
    DeleteMessage,
    /// All messages from a user were removed.
    PurgeMessage,
    /// The chat was cleared.
    ClearMessages,
}

impl EventKind {
    /// Every known variant.
    pub const ALL: [Self; 12] = [
        Self::WelcomeEvent,
        Self::ChatMessage,
        Self::WidgetMessage,
        Self::UserJoin,
        Self::UserLeave,
        Self::UserUpdate,
        Self::UserTimeout,
        Self::PollStart,
        Self::PollEnd,
        Self::DeleteMessage,
        Self::PurgeMessage,
        Self::ClearMessages,
    ];

    /// Wire-level event name.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::WelcomeEvent => "WelcomeEvent",
            Self::ChatMessage => "ChatMessage",
            Self::WidgetMessage => "WidgetMessage",
            Self::UserJoin => "UserJoin",
            Self::UserLeave => "UserLeave",
            Self::UserUpdate => "UserUpdate",
            Self::UserTimeout => "UserTimeout",
            Self::PollStart => "PollStart",
            Self::PollEnd => "PollEnd",
            Self::DeleteMessage => "DeleteMessage",
            Self::PurgeMessage => "PurgeMessage",
            Self::ClearMessages => "ClearMessages",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Look up the variant for a wire event name.
///
/// # Errors
///
/// Returns [`ChatError::UnknownEventType`] if the name is not in the table.
pub fn resolve_name(wire_name: &str) -> Result<EventKind, ChatError> {
    EventKind::ALL
        .into_iter()
        .find(|kind| kind.wire_name() == wire_name)
        .ok_or_else(|| ChatError::UnknownEventType(wire_name.to_string()))
}

/// Resolve the variant of an event, applying the widget override first.
///
/// # Errors
///
/// Returns [`ChatError::UnknownEventType`] if no override applies and the
/// name is not in the table.
pub fn resolve_variant(wire_name: &str, payload: &Value) -> Result<EventKind, ChatError> {
    if payload.get("user_id").and_then(Value::as_i64) == Some(WIDGET_USER_ID) {
        return Ok(EventKind::WidgetMessage);
    }
    resolve_name(wire_name)
}

/// A user reference as it appears inside moderation events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatUser {
    /// User id.
    #[serde(default)]
    pub user_id: i64,
    /// Display name.
    #[serde(default)]
    pub user_name: String,
    /// Roles in the channel.
    #[serde(default)]
    pub user_roles: Vec<String>,
}

/// One fragment of a chat message (text, emoticon, link, tag...).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageFragment {
    /// Fragment kind (`"text"`, `"emoticon"`, `"link"`, `"tag"`).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Plain-text rendering of the fragment.
    #[serde(default)]
    pub text: String,
    /// Kind-specific attributes.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Body of a chat message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageComponent {
    /// Ordered fragments.
    #[serde(default)]
    pub message: Vec<MessageFragment>,
    /// Flags such as `me` or `whisper`.
    #[serde(default)]
    pub meta: serde_json::Map<String, Value>,
}

/// Payload of `ChatMessage` and `WidgetMessage` events (also returned by `msg`,
/// `whisper` and `history` replies).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IncomingMessageData {
    /// Channel the message was posted in.
    pub channel: u64,
    /// Message id.
    pub id: uuid::Uuid,
    /// Author name.
    pub user_name: String,
    /// Author id (`-1` for widgets).
    pub user_id: i64,
    /// Author roles.
    #[serde(default)]
    pub user_roles: Vec<String>,
    /// Author level, when the server reports one.
    #[serde(default)]
    pub user_level: Option<u32>,
    /// Author avatar URL.
    #[serde(default)]
    pub user_avatar: Option<String>,
    /// Message body.
    pub message: MessageComponent,
    /// Whisper recipient.
    #[serde(default)]
    pub target: Option<String>,
}

impl IncomingMessageData {
    /// Concatenated plain text of all fragments.
    pub fn text(&self) -> String {
        self.message
            .message
            .iter()
            .map(|fragment| fragment.text.as_str())
            .collect()
    }

    /// Returns `true` if a widget posted this message.
    pub fn is_widget(&self) -> bool {
        self.user_id == WIDGET_USER_ID
    }
}

/// Payload of `WelcomeEvent`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WelcomeData {
    /// Id of the chat server that accepted the socket.
    #[serde(default)]
    pub server: Option<String>,
}

/// Payload of `UserJoin` / `UserLeave`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresenceData {
    /// Channel the user joined or left.
    #[serde(default)]
    pub originating_channel: u64,
    /// User id.
    #[serde(default)]
    pub id: i64,
    /// User name (absent for some leave events).
    #[serde(default)]
    pub username: Option<String>,
    /// Roles in the channel.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Payload of `UserUpdate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserUpdateData {
    /// User id.
    pub user: i64,
    /// New user name, if it changed.
    #[serde(default)]
    pub username: Option<String>,
    /// Current roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Current permissions.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Payload of `UserTimeout`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserTimeoutData {
    /// The user that was timed out.
    pub user: ChatUser,
    /// Timeout length in milliseconds.
    #[serde(default)]
    pub duration: u64,
}

/// Payload of `PollStart` / `PollEnd`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollData {
    /// Question text.
    pub q: String,
    /// Answer options.
    #[serde(default)]
    pub answers: Vec<String>,
    /// Votes per answer.
    #[serde(default)]
    pub responses: BTreeMap<String, u64>,
    /// Number of voters so far.
    #[serde(default)]
    pub voters: u64,
    /// Poll length in milliseconds.
    #[serde(default)]
    pub duration: u64,
    /// End time (epoch milliseconds).
    #[serde(default)]
    pub ends_at: u64,
    /// Who started the poll.
    #[serde(default)]
    pub author: Option<ChatUser>,
}

/// Payload of `DeleteMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeleteMessageData {
    /// Deleted message id.
    pub id: uuid::Uuid,
    /// Moderator that deleted it.
    #[serde(default)]
    pub moderator: Option<ChatUser>,
}

/// Payload of `PurgeMessage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PurgeMessageData {
    /// User whose messages were removed.
    pub user_id: i64,
    /// Moderator that purged them.
    #[serde(default)]
    pub moderator: Option<ChatUser>,
}

/// Payload of `ClearMessages`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClearMessagesData {
    /// Who cleared the chat.
    #[serde(default)]
    pub clearer: Option<ChatUser>,
}

/// A decoded event, tagged by variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// See [`EventKind::WelcomeEvent`].
    Welcome(WelcomeData),
    /// See [`EventKind::ChatMessage`].
    ChatMessage(IncomingMessageData),
    /// See [`EventKind::WidgetMessage`].
    WidgetMessage(IncomingMessageData),
    /// See [`EventKind::UserJoin`].
    UserJoin(UserPresenceData),
    /// See [`EventKind::UserLeave`].
    UserLeave(UserPresenceData),
    /// See [`EventKind::UserUpdate`].
    UserUpdate(UserUpdateData),
    /// See [`EventKind::UserTimeout`].
    UserTimeout(UserTimeoutData),
    /// See [`EventKind::PollStart`].
    PollStart(PollData),
    /// See [`EventKind::PollEnd`].
    PollEnd(PollData),
    /// See [`EventKind::DeleteMessage`].
    DeleteMessage(DeleteMessageData),
    /// See [`EventKind::PurgeMessage`].
    PurgeMessage(PurgeMessageData),
    /// See [`EventKind::ClearMessages`].
    ClearMessages(ClearMessagesData),
}

impl ChatEvent {
    /// Decode `payload` (the frame's `data` object) as the shape of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Decode`] if the payload does not match.
    pub fn decode(kind: EventKind, payload: Value) -> Result<Self, ChatError> {
        let event = match kind {
            EventKind::WelcomeEvent => Self::Welcome(serde_json::from_value(payload)?),
            EventKind::ChatMessage => Self::ChatMessage(serde_json::from_value(payload)?),
            EventKind::WidgetMessage => Self::WidgetMessage(serde_json::from_value(payload)?),
            EventKind::UserJoin => Self::UserJoin(serde_json::from_value(payload)?),
            EventKind::UserLeave => Self::UserLeave(serde_json::from_value(payload)?),
            EventKind::UserUpdate => Self::UserUpdate(serde_json::from_value(payload)?),
            EventKind::UserTimeout => Self::UserTimeout(serde_json::from_value(payload)?),
            EventKind::PollStart => Self::PollStart(serde_json::from_value(payload)?),
            EventKind::PollEnd => Self::PollEnd(serde_json::from_value(payload)?),
            EventKind::DeleteMessage => Self::DeleteMessage(serde_json::from_value(payload)?),
            EventKind::PurgeMessage => Self::PurgeMessage(serde_json::from_value(payload)?),
            EventKind::ClearMessages => Self::ClearMessages(serde_json::from_value(payload)?),
        };
        Ok(event)
    }

    /// Variant tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Welcome(_) => EventKind::WelcomeEvent,
            Self::ChatMessage(_) => EventKind::ChatMessage,
            Self::WidgetMessage(_) => EventKind::WidgetMessage,
            Self::UserJoin(_) => EventKind::UserJoin,
            Self::UserLeave(_) => EventKind::UserLeave,
            Self::UserUpdate(_) => EventKind::UserUpdate,
            Self::UserTimeout(_) => EventKind::UserTimeout,
            Self::PollStart(_) => EventKind::PollStart,
            Self::PollEnd(_) => EventKind::PollEnd,
            Self::DeleteMessage(_) => EventKind::DeleteMessage,
            Self::PurgeMessage(_) => EventKind::PurgeMessage,
            Self::ClearMessages(_) => EventKind::ClearMessages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_payload(user_id: i64) -> Value {
        json!({
            "channel": 1234,
            "id": "5b2c4b38-6d7a-4a2e-9a3e-2f1c0d9e8b71",
            "user_name": "someone",
            "user_id": user_id,
            "user_roles": ["User"],
            "user_level": 12,
            "message": {
                "message": [
                    { "type": "text", "data": "hello ", "text": "hello " },
                    { "type": "emoticon", "source": "builtin", "pack": "default", "text": ":)" }
                ],
                "meta": {}
            }
        })
    }

    #[test]
    fn test_resolve_name_known() {
        assert_eq!(resolve_name("UserJoin"), Ok(EventKind::UserJoin));
        assert_eq!(resolve_name("ChatMessage"), Ok(EventKind::ChatMessage));
    }

    #[test]
    fn test_resolve_name_unknown() {
        assert_eq!(
            resolve_name("NotARealEvent"),
            Err(ChatError::UnknownEventType("NotARealEvent".into()))
        );
    }

    #[test]
    fn test_wire_names_round_trip_through_table() {
        for kind in EventKind::ALL {
            assert_eq!(resolve_name(kind.wire_name()), Ok(kind));
        }
    }

    #[test]
    fn test_widget_override_beats_wire_name() {
        assert_eq!(
            resolve_variant("ChatMessage", &message_payload(-1)),
            Ok(EventKind::WidgetMessage)
        );
        assert_eq!(
            resolve_variant("ChatMessage", &message_payload(42)),
            Ok(EventKind::ChatMessage)
        );
    }

    #[test]
    fn test_widget_override_applies_to_unknown_names() {
        assert_eq!(
            resolve_variant("SomethingNew", &json!({ "user_id": -1 })),
            Ok(EventKind::WidgetMessage)
        );
    }

    #[test]
    fn test_non_integer_user_id_is_not_widget() {
        assert_eq!(
            resolve_variant("ChatMessage", &json!({ "user_id": "-1" })),
            Ok(EventKind::ChatMessage)
        );
    }

    #[test]
    fn test_decode_chat_message() {
        let event = ChatEvent::decode(EventKind::ChatMessage, message_payload(42)).unwrap();
        let ChatEvent::ChatMessage(data) = event else {
            panic!("expected ChatMessage");
        };
        assert_eq!(data.text(), "hello :)");
        assert_eq!(data.user_level, Some(12));
        assert_eq!(data.message.message[1].extra["pack"], "default");
        assert!(!data.is_widget());
    }

    #[test]
    fn test_decode_widget_message_keeps_kind() {
        let event = ChatEvent::decode(EventKind::WidgetMessage, message_payload(-1)).unwrap();
        assert_eq!(event.kind(), EventKind::WidgetMessage);
    }

    #[test]
    fn test_decode_mismatched_shape_is_decode_error() {
        let result = ChatEvent::decode(EventKind::ChatMessage, json!({ "user_id": 42 }));
        assert!(matches!(result, Err(ChatError::Decode(_))));
    }

    #[test]
    fn test_decode_user_join() {
        let event = ChatEvent::decode(
            EventKind::UserJoin,
            json!({ "originatingChannel": 1234, "username": "viewer", "roles": ["User"], "id": 77 }),
        )
        .unwrap();
        assert_eq!(
            event,
            ChatEvent::UserJoin(UserPresenceData {
                originating_channel: 1234,
                id: 77,
                username: Some("viewer".into()),
                roles: vec!["User".into()],
            })
        );
    }

    #[test]
    fn test_decode_poll_start() {
        let event = ChatEvent::decode(
            EventKind::PollStart,
            json!({
                "q": "Best?",
                "answers": ["a", "b"],
                "responses": { "a": 1, "b": 0 },
                "voters": 1,
                "duration": 30000,
                "endsAt": 1700000000000_u64
            }),
        )
        .unwrap();
        let ChatEvent::PollStart(poll) = event else {
            panic!("expected PollStart");
        };
        assert_eq!(poll.responses["a"], 1);
        assert_eq!(poll.ends_at, 1_700_000_000_000);
    }
}
