//! Websocket wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}` with camelCase payload fields.
//! Inbound payload fields default to empty strings when missing so that
//! validation (and the matching `*_error` reply) happens in one place on
//! the server instead of failing at decode time.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::{Conversation, Message};
use crate::types::{ConversationId, MachineId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Inbound (client -> server)
// ---------------------------------------------------------------------------

/// The four event names a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    RegisterUser,
    CreateChatSession,
    SendMessage,
    LogOff,
}

impl InboundKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "register_user" => Some(Self::RegisterUser),
            "create_chat_session" => Some(Self::CreateChatSession),
            "send_message" => Some(Self::SendMessage),
            "log_off" => Some(Self::LogOff),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterUser => "register_user",
            Self::CreateChatSession => "create_chat_session",
            Self::SendMessage => "send_message",
            Self::LogOff => "log_off",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterUser {
    pub machine_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateChatSession {
    pub machine_id: String,
    pub sender_user_id: String,
    pub receiver_user_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessage {
    pub session_id: String,
    pub machine_id: String,
    pub sender_user_id: String,
    pub receiver_user_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LogOff {
    pub machine_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    RegisterUser(RegisterUser),
    CreateChatSession(CreateChatSession),
    SendMessage(SendMessage),
    LogOff(LogOff),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    /// Decode one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: RawFrame = serde_json::from_str(text).map_err(ProtocolError::InvalidFrame)?;
        let kind = InboundKind::from_name(&frame.event)
            .ok_or_else(|| ProtocolError::UnknownEvent(frame.event.clone()))?;

        // `null` or a missing `data` behaves like an empty object.
        let data = match frame.data {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        let malformed = |source| ProtocolError::MalformedPayload { kind, source };

        let event = match kind {
            InboundKind::RegisterUser => {
                Self::RegisterUser(serde_json::from_value(data).map_err(malformed)?)
            }
            InboundKind::CreateChatSession => {
                Self::CreateChatSession(serde_json::from_value(data).map_err(malformed)?)
            }
            InboundKind::SendMessage => {
                Self::SendMessage(serde_json::from_value(data).map_err(malformed)?)
            }
            InboundKind::LogOff => Self::LogOff(serde_json::from_value(data).map_err(malformed)?),
        };
        Ok(event)
    }

    pub fn kind(&self) -> InboundKind {
        match self {
            Self::RegisterUser(_) => InboundKind::RegisterUser,
            Self::CreateChatSession(_) => InboundKind::CreateChatSession,
            Self::SendMessage(_) => InboundKind::SendMessage,
            Self::LogOff(_) => InboundKind::LogOff,
        }
    }

    /// Encode as a frame. Used by clients and tests.
    pub fn encode(&self) -> String {
        let (name, data) = match self {
            Self::RegisterUser(p) => (self.kind().name(), serde_json::to_value(p)),
            Self::CreateChatSession(p) => (self.kind().name(), serde_json::to_value(p)),
            Self::SendMessage(p) => (self.kind().name(), serde_json::to_value(p)),
            Self::LogOff(p) => (self.kind().name(), serde_json::to_value(p)),
        };
        serde_json::json!({ "event": name, "data": data.unwrap_or_default() }).to_string()
    }
}

// ---------------------------------------------------------------------------
// Outbound (server -> client)
// ---------------------------------------------------------------------------

/// Events pushed to a client connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    RegistrationSuccess {
        message: String,
    },
    RegistrationError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: ConversationId,
        session_data: Conversation,
        message: String,
    },
    SessionError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    NewChatSession {
        session_id: ConversationId,
        sender_user_id: UserId,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    MessageSent {
        message_id: MessageId,
        session_id: ConversationId,
    },
    MessageError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        session_id: ConversationId,
        message: Message,
        sender_user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    ReceiverUnavailable {
        message: String,
        receiver_user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    LogOffSuccess {
        message: String,
        user_id: UserId,
        machine_id: MachineId,
    },
    LogOffError {
        message: String,
    },
    /// Reply to a frame that could not be attributed to any inbound event.
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// The `*_error` event answering a rejected inbound event of `kind`.
    pub fn error_for(kind: InboundKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            InboundKind::RegisterUser => Self::RegistrationError { message },
            InboundKind::CreateChatSession => Self::SessionError { message },
            InboundKind::SendMessage => Self::MessageError { message },
            InboundKind::LogOff => Self::LogOffError { message },
        }
    }

    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegistrationSuccess { .. } => "registration_success",
            Self::RegistrationError { .. } => "registration_error",
            Self::SessionCreated { .. } => "session_created",
            Self::SessionError { .. } => "session_error",
            Self::NewChatSession { .. } => "new_chat_session",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageError { .. } => "message_error",
            Self::NewMessage { .. } => "new_message",
            Self::ReceiverUnavailable { .. } => "receiver_unavailable",
            Self::LogOffSuccess { .. } => "log_off_success",
            Self::LogOffError { .. } => "log_off_error",
            Self::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_register_user() {
        let text = r#"{"event":"register_user","data":{"machineId":"m1","userId":"alice"}}"#;
        let event = ClientEvent::decode(text).unwrap();
        assert_eq!(
            event,
            ClientEvent::RegisterUser(RegisterUser {
                machine_id: "m1".into(),
                user_id: "alice".into(),
            })
        );
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let event = ClientEvent::decode(r#"{"event":"log_off"}"#).unwrap();
        assert_eq!(event, ClientEvent::LogOff(LogOff::default()));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = ClientEvent::decode(r#"{"event":"typing","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(name) if name == "typing"));
    }

    #[test]
    fn test_malformed_payload_keeps_kind() {
        let err = ClientEvent::decode(r#"{"event":"send_message","data":{"message":42}}"#)
            .unwrap_err();
        assert_eq!(err.inbound_kind(), Some(InboundKind::SendMessage));
    }

    #[test]
    fn test_not_json() {
        let err = ClientEvent::decode("hello").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrame(_)));
        assert_eq!(err.inbound_kind(), None);
    }

    #[test]
    fn test_encode_decode_send_message() {
        let event = ClientEvent::SendMessage(SendMessage {
            session_id: "abc".into(),
            machine_id: "m1".into(),
            sender_user_id: "alice".into(),
            receiver_user_id: "bob".into(),
            message: "hi".into(),
        });
        assert_eq!(ClientEvent::decode(&event.encode()).unwrap(), event);
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::ReceiverUnavailable {
            message: "bob is offline".into(),
            receiver_user_id: "bob".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "receiver_unavailable");
        assert_eq!(value["data"]["receiverUserId"], "bob");
        assert_eq!(event.name(), "receiver_unavailable");
    }

    #[test]
    fn test_error_for_maps_each_kind() {
        assert!(matches!(
            ServerEvent::error_for(InboundKind::RegisterUser, "x"),
            ServerEvent::RegistrationError { .. }
        ));
        assert!(matches!(
            ServerEvent::error_for(InboundKind::CreateChatSession, "x"),
            ServerEvent::SessionError { .. }
        ));
        assert!(matches!(
            ServerEvent::error_for(InboundKind::SendMessage, "x"),
            ServerEvent::MessageError { .. }
        ));
        assert!(matches!(
            ServerEvent::error_for(InboundKind::LogOff, "x"),
            ServerEvent::LogOffError { .. }
        ));
    }
}
