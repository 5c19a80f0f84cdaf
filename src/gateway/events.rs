use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};

/// Message kinds produced by the server. Everything else is app-defined
/// and relayed untouched.
pub mod kind {
    pub const CONNECTED: &str = "connected";
    pub const USER_LIST: &str = "user-list";
    pub const SYSTEM: &str = "system";
    pub const ERROR: &str = "error";

    pub const RESERVED: &[&str] = &[CONNECTED, USER_LIST, SYSTEM, ERROR];

    pub fn is_reserved(kind: &str) -> bool {
        RESERVED.contains(&kind)
    }
}

/// A pre-serialized outbound frame. Cloning shares the underlying buffer.
pub type Frame = Utf8Bytes;

/// Roster entry carried by `user-list` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
}

/// Relay message envelope. Empty fields are left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<UserInfo>>,
}

impl RelayMessage {
    pub fn connected(session_id: &str) -> Self {
        Self {
            kind: kind::CONNECTED.to_string(),
            from: session_id.to_string(),
            ..Default::default()
        }
    }

    pub fn user_list(room_id: &str, users: Vec<UserInfo>) -> Self {
        Self {
            kind: kind::USER_LIST.to_string(),
            room_id: room_id.to_string(),
            users: Some(users),
            ..Default::default()
        }
    }

    pub fn system(room_id: &str, username: &str, content: String) -> Self {
        Self {
            kind: kind::SYSTEM.to_string(),
            room_id: room_id.to_string(),
            username: username.to_string(),
            content,
            ..Default::default()
        }
    }

    pub fn error(content: &str) -> Self {
        Self {
            kind: kind::ERROR.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    pub fn is_directed(&self) -> bool {
        !self.to.is_empty()
    }

    /// Serialize once so the same frame can be handed to many mailboxes.
    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

pub fn joined_notice(username: &str) -> String {
    format!("{username} joined the room")
}

pub fn left_notice(username: &str) -> String {
    format!("{username} left the room")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_omits_empty_fields() {
        let frame = RelayMessage::connected("abc-123").encode().unwrap();
        let json: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["from"], "abc-123");
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2, "unexpected fields: {obj:?}");
    }

    #[test]
    fn test_user_list_serializes_roster() {
        let msg = RelayMessage::user_list(
            "lobby",
            vec![UserInfo {
                id: "1".into(),
                username: "alice".into(),
            }],
        );
        let json: serde_json::Value =
            serde_json::from_str(msg.encode().unwrap().as_str()).unwrap();
        assert_eq!(json["type"], "user-list");
        assert_eq!(json["room_id"], "lobby");
        assert_eq!(json["users"][0]["id"], "1");
        assert_eq!(json["users"][0]["username"], "alice");
    }

    #[test]
    fn test_decode_app_defined_message() {
        let text = r#"{"type":"offer","to":"peer","data":{"sdp":"v=0"},"from":"spoofed"}"#;
        let msg = RelayMessage::decode(text).unwrap();
        assert_eq!(msg.kind, "offer");
        assert_eq!(msg.to, "peer");
        assert_eq!(msg.from, "spoofed");
        assert_eq!(msg.data.unwrap()["sdp"], "v=0");
        assert!(msg.users.is_none());
    }

    #[test]
    fn test_decode_requires_type() {
        assert!(RelayMessage::decode(r#"{"to":"peer"}"#).is_err());
        assert!(RelayMessage::decode("not json").is_err());
    }

    #[test]
    fn test_is_directed() {
        let mut msg = RelayMessage::decode(r#"{"type":"chat"}"#).unwrap();
        assert!(!msg.is_directed());
        msg.to = "someone".into();
        assert!(msg.is_directed());
    }

    #[test]
    fn test_reserved_kinds() {
        assert!(kind::is_reserved("connected"));
        assert!(kind::is_reserved("user-list"));
        assert!(kind::is_reserved("system"));
        assert!(kind::is_reserved("error"));
        assert!(!kind::is_reserved("offer"));
        assert!(!kind::is_reserved("ice-candidate"));
    }

    #[test]
    fn test_notices() {
        assert_eq!(joined_notice("bob"), "bob joined the room");
        assert_eq!(left_notice("bob"), "bob left the room");
    }
}
