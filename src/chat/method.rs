//! Outbound method calls.
//!
//! Every command on the wire has the shape
//! `{"type": "method", "method": <name>, "arguments": [...], "id": <n>}`.
//! The id is assigned by the producer and is what the server echoes back in
//! the matching reply.

use serde::Serialize;
use serde_json::{json, Value};

/// An outbound command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMethod {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Method name (e.g. `"msg"`, `"auth"`).
    pub method: String,
    /// Positional arguments.
    pub arguments: Vec<Value>,
    /// Correlation id, unique per connection.
    pub id: u64,
}

impl ChatMethod {
    /// Build an arbitrary method call.
    pub fn new(id: u64, method: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            kind: "method",
            method: method.into(),
            arguments,
            id,
        }
    }

    /// Authenticate as `user` in `channel` with the key from the chat lookup.
    pub fn auth(id: u64, channel: u64, user: u64, authkey: &str) -> Self {
        Self::new(id, "auth", vec![json!(channel), json!(user), json!(authkey)])
    }

    /// Join `channel` read-only.
    pub fn anonymous_auth(id: u64, channel: u64) -> Self {
        Self::new(id, "auth", vec![json!(channel)])
    }

    /// Post a chat message.
    pub fn msg(id: u64, text: &str) -> Self {
        Self::new(id, "msg", vec![json!(text)])
    }

    /// Send a private message to `username`.
    pub fn whisper(id: u64, username: &str, text: &str) -> Self {
        Self::new(id, "whisper", vec![json!(username), json!(text)])
    }

    /// Vote for option `index` of the running poll.
    pub fn vote_choose(id: u64, index: usize) -> Self {
        Self::new(id, "vote:choose", vec![json!(index)])
    }

    /// Start a poll lasting `duration_secs`.
    pub fn vote_start(id: u64, question: &str, answers: &[&str], duration_secs: u64) -> Self {
        Self::new(
            id,
            "vote:start",
            vec![json!(question), json!(answers), json!(duration_secs)],
        )
    }

    /// Time out `username`. `duration` uses the server's format (`"30s"`, `"5m"`).
    pub fn timeout(id: u64, username: &str, duration: &str) -> Self {
        Self::new(id, "timeout", vec![json!(username), json!(duration)])
    }

    /// Remove every message from `username`.
    pub fn purge(id: u64, username: &str) -> Self {
        Self::new(id, "purge", vec![json!(username)])
    }

    /// Delete a single message by its id.
    pub fn delete_message(id: u64, message_id: &uuid::Uuid) -> Self {
        Self::new(id, "deleteMessage", vec![json!(message_id.to_string())])
    }

    /// Clear the whole chat.
    pub fn clear_messages(id: u64) -> Self {
        Self::new(id, "clearMessages", Vec::new())
    }

    /// Request the last `count` messages.
    pub fn history(id: u64, count: usize) -> Self {
        Self::new(id, "history", vec![json!(count)])
    }

    /// Application-level ping.
    pub fn ping(id: u64) -> Self {
        Self::new(id, "ping", Vec::new())
    }

    /// Encode to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`super::ChatError::Decode`] if serialization fails.
    pub fn to_wire(&self) -> Result<Vec<u8>, super::ChatError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_wire_shape() {
        let bytes = ChatMethod::msg(7, "hello").to_wire().expect("serializable");
        let parsed: Value = serde_json::from_slice(&bytes).expect("valid JSON");
        assert_eq!(parsed["type"], "method");
        assert_eq!(parsed["method"], "msg");
        assert_eq!(parsed["arguments"], json!(["hello"]));
        assert_eq!(parsed["id"], 7);
    }

    #[test]
    fn test_auth_arguments() {
        let method = ChatMethod::auth(0, 1234, 42, "key");
        assert_eq!(method.method, "auth");
        assert_eq!(method.arguments, vec![json!(1234), json!(42), json!("key")]);
    }

    #[test]
    fn test_anonymous_auth_has_channel_only() {
        let method = ChatMethod::anonymous_auth(0, 1234);
        assert_eq!(method.arguments, vec![json!(1234)]);
    }

    #[test]
    fn test_vote_start_nests_answers() {
        let method = ChatMethod::vote_start(3, "Best?", &["a", "b"], 30);
        assert_eq!(method.method, "vote:start");
        assert_eq!(method.arguments[1], json!(["a", "b"]));
        assert_eq!(method.arguments[2], json!(30));
    }

    #[test]
    fn test_clear_messages_has_empty_arguments() {
        let bytes = ChatMethod::clear_messages(1).to_wire().expect("serializable");
        let parsed: Value = serde_json::from_slice(&bytes).expect("valid JSON");
        assert_eq!(parsed["arguments"], json!([]));
    }

    #[test]
    fn test_delete_message_uses_string_id() {
        let message_id = uuid::Uuid::new_v4();
        let method = ChatMethod::delete_message(9, &message_id);
        assert_eq!(method.arguments, vec![json!(message_id.to_string())]);
    }
}
