//! Connection lifecycle handler.
//!
//! Entry point for everything a connection does: decoded inbound events,
//! and the transport's connect/disconnect signals. Each inbound event gets
//! exactly one direct reply on the originating connection (a success event
//! or the matching `*_error`); cross-notifications to other connections
//! follow the reply and never change it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use courier_shared::protocol::{ClientEvent, InboundKind, ServerEvent};
use courier_shared::{Conversation, ConversationId, MachineId, Message, PresenceRecord, UserId};

use crate::connection::ConnectionHandle;
use crate::conversation::ConversationManager;
use crate::delivery::DeliveryCoordinator;
use crate::error::{require, ChatError};
use crate::presence::PresenceRegistry;

pub struct LifecycleHandler {
    presence: Arc<PresenceRegistry>,
    conversations: Arc<ConversationManager>,
    delivery: Arc<DeliveryCoordinator>,
}

impl LifecycleHandler {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        conversations: Arc<ConversationManager>,
        delivery: Arc<DeliveryCoordinator>,
    ) -> Self {
        Self {
            presence,
            conversations,
            delivery,
        }
    }

    /// A new, still anonymous connection. No presence effect.
    pub fn on_connect(&self, conn: &ConnectionHandle) {
        debug!(conn = %conn.id().short(), "Connection opened");
    }

    /// Decode one text frame and handle it.
    pub async fn handle_frame(&self, conn: &ConnectionHandle, text: &str) {
        match ClientEvent::decode(text) {
            Ok(event) => self.dispatch(conn, event).await,
            Err(e) => {
                warn!(conn = %conn.id().short(), error = %e, "Rejected inbound frame");
                let reply = match e.inbound_kind() {
                    Some(kind) => ServerEvent::error_for(kind, e.to_string()),
                    None => ServerEvent::Error {
                        message: e.to_string(),
                    },
                };
                conn.push(reply);
            }
        }
    }

    /// Frames other than text are not part of the protocol.
    pub fn handle_binary_frame(&self, conn: &ConnectionHandle, len: usize) {
        debug!(conn = %conn.id().short(), len, "Rejected binary frame");
        conn.push(ServerEvent::Error {
            message: "binary frames are not supported".to_string(),
        });
    }

    /// Route a decoded event. Each handler has already pushed its reply by
    /// the time it returns, so the results are only useful to direct callers.
    pub async fn dispatch(&self, conn: &ConnectionHandle, event: ClientEvent) {
        match event {
            ClientEvent::RegisterUser(p) => {
                let _ = self
                    .on_register(conn, MachineId::new(p.machine_id), UserId::new(p.user_id))
                    .await;
            }
            ClientEvent::CreateChatSession(p) => {
                let _ = self
                    .on_create_chat_session(
                        conn,
                        MachineId::new(p.machine_id),
                        UserId::new(p.sender_user_id),
                        UserId::new(p.receiver_user_id),
                    )
                    .await;
            }
            ClientEvent::SendMessage(p) => {
                let _ = self
                    .on_send_message(
                        conn,
                        &p.session_id,
                        MachineId::new(p.machine_id),
                        UserId::new(p.sender_user_id),
                        UserId::new(p.receiver_user_id),
                        p.message,
                    )
                    .await;
            }
            ClientEvent::LogOff(p) => {
                let _ = self
                    .on_log_off(conn, MachineId::new(p.machine_id), UserId::new(p.user_id))
                    .await;
            }
        }
    }

    pub async fn on_register(
        &self,
        conn: &ConnectionHandle,
        machine_id: MachineId,
        user_id: UserId,
    ) -> Result<PresenceRecord, ChatError> {
        let result: Result<PresenceRecord, ChatError> = async {
            require(machine_id.as_str(), "machineId")?;
            require(user_id.as_str(), "userId")?;
            Ok(self
                .presence
                .set_online(user_id.clone(), machine_id.clone(), conn.clone())
                .await)
        }
        .await;

        reply(conn, InboundKind::RegisterUser, &result, |record| {
            ServerEvent::RegistrationSuccess {
                message: format!(
                    "User {} registered on machine {}",
                    record.user_id, record.machine_id
                ),
            }
        });
        result
    }

    pub async fn on_create_chat_session(
        &self,
        conn: &ConnectionHandle,
        machine_id: MachineId,
        sender: UserId,
        receiver: UserId,
    ) -> Result<Conversation, ChatError> {
        let result = self
            .conversations
            .create_conversation(machine_id, sender, receiver)
            .await;

        reply(conn, InboundKind::CreateChatSession, &result, |conversation| {
            ServerEvent::SessionCreated {
                session_id: conversation.conversation_id,
                session_data: conversation.clone(),
                message: "Chat session created".to_string(),
            }
        });

        if let Ok(conversation) = &result {
            self.delivery.announce_new_conversation(conversation).await;
        }
        result
    }

    /// Persist then route a message. `message_sent` is only sent once the
    /// conversation document has been durably rewritten.
    pub async fn on_send_message(
        &self,
        conn: &ConnectionHandle,
        session_id: &str,
        machine_id: MachineId,
        sender: UserId,
        receiver: UserId,
        body: String,
    ) -> Result<Message, ChatError> {
        let result: Result<(ConversationId, Message), ChatError> = async {
            require(session_id, "sessionId")?;
            let conversation_id = ConversationId::parse(session_id)
                .map_err(|_| ChatError::validation(format!("Invalid sessionId: {session_id}")))?;
            let message = self
                .conversations
                .append_message(conversation_id, sender, receiver, body, machine_id)
                .await?;
            Ok((conversation_id, message))
        }
        .await;

        reply(conn, InboundKind::SendMessage, &result, |(conversation_id, message)| {
            ServerEvent::MessageSent {
                message_id: message.message_id,
                session_id: *conversation_id,
            }
        });

        let (conversation_id, message) = result?;
        self.delivery
            .deliver_or_report(conversation_id, &message, conn)
            .await;
        Ok(message)
    }

    pub async fn on_log_off(
        &self,
        conn: &ConnectionHandle,
        machine_id: MachineId,
        user_id: UserId,
    ) -> Result<(), ChatError> {
        let result: Result<(), ChatError> = async {
            require(machine_id.as_str(), "machineId")?;
            require(user_id.as_str(), "userId")?;

            // Already offline: nothing to announce.
            if self.presence.is_registered(&user_id).await {
                self.delivery.announce_presence_change(&user_id, false).await;
            }
            self.presence.set_offline(&user_id, &machine_id).await;
            Ok(())
        }
        .await;

        reply(conn, InboundKind::LogOff, &result, |_| ServerEvent::LogOffSuccess {
            message: format!("User {user_id} logged off"),
            user_id: user_id.clone(),
            machine_id: machine_id.clone(),
        });
        result
    }

    /// The transport lost `conn`. Same as a log-off for whoever was
    /// registered on it, minus the acknowledgment.
    ///
    /// Presence is cleared before the announcement: only a pair this handle
    /// still owned is announced, so a re-registration that raced the
    /// disconnect keeps its presence and gets no offline notice.
    pub async fn on_disconnect(&self, conn: &ConnectionHandle) {
        if let Some((machine_id, user_id)) = self.presence.remove_by_connection(conn.id()).await {
            info!(
                conn = %conn.id().short(),
                user = %user_id,
                machine = %machine_id,
                "Registered connection dropped"
            );
            self.delivery.announce_presence_change(&user_id, false).await;
        }
        debug!(conn = %conn.id().short(), "Connection closed");
    }
}

/// Push the direct reply for one inbound event.
fn reply<T>(
    conn: &ConnectionHandle,
    kind: InboundKind,
    result: &Result<T, ChatError>,
    success: impl FnOnce(&T) -> ServerEvent,
) {
    let event = match result {
        Ok(value) => success(value),
        Err(e) => {
            match e {
                ChatError::Storage(inner) => {
                    warn!(conn = %conn.id().short(), event = kind.name(), error = %inner, "Storage failure");
                }
                other => {
                    debug!(conn = %conn.id().short(), event = kind.name(), error = %other, "Request rejected");
                }
            }
            ServerEvent::error_for(kind, e.client_message())
        }
    };
    conn.push(event);
}
