use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{GroupId, UserId, UserProfile},
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// `sender_username` is frozen at send time; later username changes do not
/// rewrite delivered or persisted messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessagePayload {
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub group_name: String,
    pub members: Vec<UserProfile>,
}

/// Events a connected client may send. One tagged union instead of ad-hoc
/// per-event handlers keeps the session state machine explicit and testable
/// without a live transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    Login(UserProfile),
    PrivateMessage(PrivateMessagePayload),
    GroupMessage(GroupMessagePayload),
    #[serde(rename_all = "camelCase")]
    JoinGroup { group_id: GroupId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    LeaveGroup { group_id: GroupId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    BlockUser {
        user_id: UserId,
        blocked_user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    UnblockUser {
        user_id: UserId,
        blocked_user_id: UserId,
    },
}

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full roster, broadcast to every connection after each login or
    /// disconnect.
    #[serde(rename = "onlineUsers")]
    OnlineUsers { users: Vec<UserProfile> },
    PrivateMessage(PrivateMessagePayload),
    GroupMessage(GroupMessagePayload),
    GroupUpdated { group: GroupSummary },
    #[serde(rename_all = "camelCase")]
    GroupLeft { group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    UserBlocked {
        user_id: UserId,
        blocked_user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    UserUnblocked {
        user_id: UserId,
        blocked_user_id: UserId,
    },
    Error(ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            id: UserId(1),
            username: "ada".into(),
            photo_url: "https://cdn.example/ada.png".into(),
            bio: "hello".into(),
        }
    }

    #[test]
    fn login_event_uses_wire_field_names() {
        let json = serde_json::to_value(ClientEvent::Login(profile())).expect("serialize");
        assert_eq!(json["type"], "login");
        assert_eq!(json["payload"]["photoUrl"], "https://cdn.example/ada.png");
        assert_eq!(json["payload"]["id"], 1);
    }

    #[test]
    fn roster_event_keeps_camel_case_tag() {
        let json = serde_json::to_value(ServerEvent::OnlineUsers {
            users: vec![profile()],
        })
        .expect("serialize");
        assert_eq!(json["type"], "onlineUsers");
        assert_eq!(json["payload"]["users"][0]["username"], "ada");
    }

    #[test]
    fn private_message_round_trips() {
        let raw = r#"{
            "type": "private_message",
            "payload": {
                "senderId": 1,
                "recipientId": 2,
                "content": "hi",
                "timestamp": "2024-05-01T12:00:00Z"
            }
        }"#;
        let event: ClientEvent = serde_json::from_str(raw).expect("deserialize");
        match event {
            ClientEvent::PrivateMessage(msg) => {
                assert_eq!(msg.sender_id, UserId(1));
                assert_eq!(msg.recipient_id, UserId(2));
                assert_eq!(msg.content, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn missing_login_field_fails_to_parse() {
        let raw = r#"{"type": "login", "payload": {"id": 1, "username": "ada"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }
}
