//! Records persisted by the server and carried inside wire events.
//!
//! Field names serialize in camelCase so the same JSON shape is used on
//! disk, on the websocket and over the HTTP query API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, ConversationId, MachineId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
}

/// One user's entry in the presence snapshot. Absence means offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub machine_id: MachineId,
    pub connection_handle_id: ConnectionId,
    pub last_seen: DateTime<Utc>,
    pub status: PresenceStatus,
}

/// The whole presence document: userId -> record.
pub type PresenceSnapshot = BTreeMap<UserId, PresenceRecord>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
}

/// A single message inside a conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: MessageId,
    pub sender_user_id: UserId,
    pub receiver_user_id: UserId,
    /// Message text. Named `message` on the wire.
    #[serde(rename = "message")]
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub machine_id: MachineId,
    pub kind: MessageKind,
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// A two-party conversation (a "chat session" on the wire).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub initiating_machine_id: MachineId,
    pub sender_user_id: UserId,
    pub receiver_user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub participants: [UserId; 2],
}

impl Conversation {
    pub fn new(machine_id: MachineId, sender: UserId, receiver: UserId) -> Self {
        Self {
            conversation_id: ConversationId::new(),
            initiating_machine_id: machine_id,
            participants: [sender.clone(), receiver.clone()],
            sender_user_id: sender,
            receiver_user_id: receiver,
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }

    /// The participant that is not `user_id`, if `user_id` takes part at all.
    pub fn counterpart_of(&self, user_id: &UserId) -> Option<&UserId> {
        match &self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            conversation_id: self.conversation_id,
            participants: self.participants.clone(),
            created_at: self.created_at,
            last_message: self.messages.last().cloned(),
        }
    }
}

/// Listing entry returned by the per-user conversation query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub participants: [UserId; 2],
    pub created_at: DateTime<Utc>,
    pub last_message: Option<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterpart() {
        let conv = Conversation::new("m1".into(), "alice".into(), "bob".into());
        assert_eq!(conv.counterpart_of(&"alice".into()), Some(&UserId::from("bob")));
        assert_eq!(conv.counterpart_of(&"bob".into()), Some(&UserId::from("alice")));
        assert_eq!(conv.counterpart_of(&"carol".into()), None);
    }

    #[test]
    fn test_message_body_is_named_message_on_the_wire() {
        let msg = Message {
            message_id: MessageId::new(),
            sender_user_id: "alice".into(),
            receiver_user_id: "bob".into(),
            body: "hi".into(),
            timestamp: Utc::now(),
            machine_id: "m1".into(),
            kind: MessageKind::User,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["message"], "hi");
        assert_eq!(value["senderUserId"], "alice");
        assert_eq!(value["kind"], "user");
    }

    #[test]
    fn test_summary_carries_last_message() {
        let mut conv = Conversation::new("m1".into(), "alice".into(), "bob".into());
        assert!(conv.summary().last_message.is_none());

        conv.messages.push(Message {
            message_id: MessageId::new(),
            sender_user_id: "alice".into(),
            receiver_user_id: "bob".into(),
            body: "second".into(),
            timestamp: Utc::now(),
            machine_id: "m1".into(),
            kind: MessageKind::User,
        });
        assert_eq!(conv.summary().last_message.unwrap().body, "second");
    }
}
