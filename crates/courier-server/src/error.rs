use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use courier_shared::{ConversationId, UserId};
use courier_store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Receiver {0} is not online")]
    ReceiverOffline(UserId),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Message too long: {length} characters (max {max})")]
    MessageTooLong { length: usize, max: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    /// Message sent back to the client in a `*_error` event.
    pub fn client_message(&self) -> String {
        match self {
            // Storage details stay in the server log.
            ChatError::Storage(_) => "Storage error, please retry".to_string(),
            other => other.to_string(),
        }
    }
}

/// Reject blank identifiers and bodies.
pub(crate) fn require(value: &str, field: &str) -> Result<(), ChatError> {
    if value.trim().is_empty() {
        return Err(ChatError::validation(format!("{field} is required")));
    }
    Ok(())
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::ReceiverOffline(_) => StatusCode::CONFLICT,
            ChatError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::MessageTooLong { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ChatError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.client_message(),
        });

        (status, axum::Json(body)).into_response()
    }
}
