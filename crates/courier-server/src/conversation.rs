//! Conversation manager.
//!
//! Every conversation is one document rewritten wholesale on each append.
//! Appends therefore run as read-modify-write inside the store's exclusive
//! section for that conversation: two concurrent senders on the same
//! conversation are serialized, senders on different conversations are not.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use courier_shared::constants::{CONVERSATIONS_COLLECTION, SYSTEM_MACHINE_ID};
use courier_shared::{
    Conversation, ConversationId, ConversationSummary, MachineId, Message, MessageId, MessageKind,
    UserId,
};
use courier_store::DocumentStore;

use crate::error::{require, ChatError};
use crate::presence::PresenceRegistry;

pub struct ConversationManager {
    store: Arc<DocumentStore>,
    presence: Arc<PresenceRegistry>,
    max_message_length: usize,
}

impl ConversationManager {
    pub fn new(
        store: Arc<DocumentStore>,
        presence: Arc<PresenceRegistry>,
        max_message_length: usize,
    ) -> Self {
        Self {
            store,
            presence,
            max_message_length,
        }
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Start a conversation from `sender` to `receiver`.
    ///
    /// The receiver must be online according to the persisted presence
    /// snapshot; otherwise nothing is written.
    pub async fn create_conversation(
        &self,
        machine_id: MachineId,
        sender: UserId,
        receiver: UserId,
    ) -> Result<Conversation, ChatError> {
        require(machine_id.as_str(), "machineId")?;
        require(sender.as_str(), "senderUserId")?;
        require(receiver.as_str(), "receiverUserId")?;
        if sender == receiver {
            return Err(ChatError::validation(
                "Sender and receiver must be different users",
            ));
        }

        if !self.presence.is_online(&receiver).await? {
            debug!(sender = %sender, receiver = %receiver, "Conversation refused, receiver offline");
            return Err(ChatError::ReceiverOffline(receiver));
        }

        let conversation = Conversation::new(machine_id, sender, receiver);
        self.store
            .put(
                CONVERSATIONS_COLLECTION,
                &conversation.conversation_id.to_string(),
                &conversation,
            )
            .await?;

        info!(
            conversation = %conversation.conversation_id,
            sender = %conversation.sender_user_id,
            receiver = %conversation.receiver_user_id,
            "Conversation created"
        );
        Ok(conversation)
    }

    /// Append a user message. Returns only after the conversation document
    /// has been durably rewritten.
    pub async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        receiver: UserId,
        body: String,
        machine_id: MachineId,
    ) -> Result<Message, ChatError> {
        require(sender.as_str(), "senderUserId")?;
        require(receiver.as_str(), "receiverUserId")?;
        require(machine_id.as_str(), "machineId")?;
        require(&body, "message")?;

        let length = body.chars().count();
        if length > self.max_message_length {
            return Err(ChatError::MessageTooLong {
                length,
                max: self.max_message_length,
            });
        }

        self.append(conversation_id, |conversation| {
            if !conversation.has_participant(&sender) || !conversation.has_participant(&receiver)
            {
                return Err(ChatError::validation(
                    "Sender and receiver must be participants of the conversation",
                ));
            }
            if sender == receiver {
                return Err(ChatError::validation(
                    "Sender and receiver must be different users",
                ));
            }
            Ok(Message {
                message_id: MessageId::new(),
                sender_user_id: sender,
                receiver_user_id: receiver,
                body,
                timestamp: Utc::now(),
                machine_id,
                kind: MessageKind::User,
            })
        })
        .await
    }

    /// Append a server-generated message about `about_user` (for example a
    /// presence transition). Same durability contract as
    /// [`Self::append_message`].
    pub async fn append_system_message(
        &self,
        conversation_id: ConversationId,
        about_user: &UserId,
        text: String,
    ) -> Result<Message, ChatError> {
        self.append(conversation_id, |conversation| {
            let counterpart = conversation.counterpart_of(about_user).ok_or_else(|| {
                ChatError::validation(format!("{about_user} is not part of this conversation"))
            })?;
            Ok(Message {
                message_id: MessageId::new(),
                sender_user_id: about_user.clone(),
                receiver_user_id: counterpart.clone(),
                body: text,
                timestamp: Utc::now(),
                machine_id: MachineId::new(SYSTEM_MACHINE_ID),
                kind: MessageKind::System,
            })
        })
        .await
    }

    async fn append(
        &self,
        conversation_id: ConversationId,
        build: impl FnOnce(&Conversation) -> Result<Message, ChatError>,
    ) -> Result<Message, ChatError> {
        let key = conversation_id.to_string();
        let _section = self.store.lock(CONVERSATIONS_COLLECTION, &key).await;

        let mut conversation: Conversation = self
            .store
            .get(CONVERSATIONS_COLLECTION, &key)
            .await?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;

        let message = build(&conversation)?;
        conversation.messages.push(message.clone());
        self.store
            .put(CONVERSATIONS_COLLECTION, &key, &conversation)
            .await?;

        debug!(
            conversation = %conversation_id,
            message = %message.message_id,
            kind = ?message.kind,
            count = conversation.messages.len(),
            "Message appended"
        );
        Ok(message)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Conversation, ChatError> {
        self.store
            .get(CONVERSATIONS_COLLECTION, &conversation_id.to_string())
            .await?
            .ok_or(ChatError::ConversationNotFound(conversation_id))
    }

    /// Every conversation `user_id` takes part in, oldest first. Reads all
    /// documents on each call.
    pub async fn conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Conversation>, ChatError> {
        let mut conversations: Vec<Conversation> = self
            .store
            .list::<Conversation>(CONVERSATIONS_COLLECTION)
            .await?
            .into_iter()
            .filter(|c| c.has_participant(user_id))
            .collect();
        conversations.sort_by_key(|c| c.created_at);
        Ok(conversations)
    }

    pub async fn list_conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        Ok(self
            .conversations_for_user(user_id)
            .await?
            .iter()
            .map(Conversation::summary)
            .collect())
    }
}
