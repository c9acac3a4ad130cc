use thiserror::Error;

use crate::protocol::InboundKind;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Malformed {} payload: {source}", .kind.name())]
    MalformedPayload {
        kind: InboundKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// The inbound event this error belongs to, when the event name was readable.
    pub fn inbound_kind(&self) -> Option<InboundKind> {
        match self {
            ProtocolError::MalformedPayload { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
