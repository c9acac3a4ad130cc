//! Delivery coordinator.
//!
//! Routes events to live connections through the presence registry's
//! in-memory path. Delivery is at-most-once while the receiver is online:
//! nothing is queued or retried, and every notification here is
//! best-effort. Failures are logged and never surface to the caller's
//! primary operation.

use std::sync::Arc;

use tracing::{debug, warn};

use courier_shared::constants::SYSTEM_SENDER_ID;
use courier_shared::protocol::ServerEvent;
use courier_shared::{Conversation, ConversationId, Message, UserId};

use crate::connection::ConnectionHandle;
use crate::conversation::ConversationManager;
use crate::presence::PresenceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    ReceiverUnavailable,
}

pub struct DeliveryCoordinator {
    presence: Arc<PresenceRegistry>,
    conversations: Arc<ConversationManager>,
}

impl DeliveryCoordinator {
    pub fn new(presence: Arc<PresenceRegistry>, conversations: Arc<ConversationManager>) -> Self {
        Self {
            presence,
            conversations,
        }
    }

    /// Push `message` to its receiver, or tell `origin` it could not be
    /// delivered. Either way this is final for the message.
    pub async fn deliver_or_report(
        &self,
        conversation_id: ConversationId,
        message: &Message,
        origin: &ConnectionHandle,
    ) -> DeliveryOutcome {
        let receiver = &message.receiver_user_id;

        if let Some(conn) = self.presence.lookup_connection(receiver).await {
            let delivered = conn.push(ServerEvent::NewMessage {
                session_id: conversation_id,
                message: message.clone(),
                sender_user_id: message.sender_user_id.clone(),
            });
            if delivered {
                debug!(
                    conversation = %conversation_id,
                    message = %message.message_id,
                    receiver = %receiver,
                    "Message delivered"
                );
                return DeliveryOutcome::Delivered;
            }
        }

        debug!(
            conversation = %conversation_id,
            message = %message.message_id,
            receiver = %receiver,
            "Receiver unavailable"
        );
        origin.push(ServerEvent::ReceiverUnavailable {
            message: format!("{receiver} is not available right now"),
            receiver_user_id: receiver.clone(),
        });
        DeliveryOutcome::ReceiverUnavailable
    }

    /// Invite the receiver of a freshly created conversation, if reachable.
    pub async fn announce_new_conversation(&self, conversation: &Conversation) -> bool {
        let receiver = &conversation.receiver_user_id;
        let Some(conn) = self.presence.lookup_connection(receiver).await else {
            debug!(
                conversation = %conversation.conversation_id,
                receiver = %receiver,
                "Receiver has no live connection, invite not sent"
            );
            return false;
        };

        conn.push(ServerEvent::NewChatSession {
            session_id: conversation.conversation_id,
            sender_user_id: conversation.sender_user_id.clone(),
            message: format!("{} started a chat with you", conversation.sender_user_id),
        })
    }

    /// Tell conversation counterparts that `user_id` changed presence.
    ///
    /// Going offline appends one system message to each of the user's
    /// conversations whose counterpart is reachable right now, and pushes
    /// it to that counterpart. Coming online is not broadcast. Returns the
    /// number of counterparts notified.
    pub async fn announce_presence_change(&self, user_id: &UserId, went_online: bool) -> usize {
        if went_online {
            return 0;
        }

        let conversations = match self.conversations.conversations_for_user(user_id).await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Could not list conversations for offline notice");
                return 0;
            }
        };

        let mut notified = 0;
        for conversation in conversations {
            let Some(counterpart) = conversation.counterpart_of(user_id) else {
                continue;
            };
            let Some(conn) = self
                .presence
                .lookup_connection(counterpart)
                .await
                .filter(|conn| !conn.is_closed())
            else {
                continue;
            };

            let message = match self
                .conversations
                .append_system_message(
                    conversation.conversation_id,
                    user_id,
                    format!("{user_id} went offline"),
                )
                .await
            {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        conversation = %conversation.conversation_id,
                        user = %user_id,
                        error = %e,
                        "Failed to record offline notice"
                    );
                    continue;
                }
            };

            if conn.push(ServerEvent::NewMessage {
                session_id: conversation.conversation_id,
                message,
                sender_user_id: UserId::new(SYSTEM_SENDER_ID),
            }) {
                notified += 1;
            }
        }

        debug!(user = %user_id, notified, "Offline notice sent");
        notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::MessageKind;
    use courier_store::DocumentStore;
    use tempfile::TempDir;
    use tokio::sync::mpsc::Receiver;

    struct Fixture {
        presence: Arc<PresenceRegistry>,
        conversations: Arc<ConversationManager>,
        delivery: DeliveryCoordinator,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DocumentStore::open(dir.path()).await.unwrap());
        let presence = Arc::new(PresenceRegistry::new(store.clone()));
        let conversations = Arc::new(ConversationManager::new(store, presence.clone(), 500));
        let delivery = DeliveryCoordinator::new(presence.clone(), conversations.clone());
        Fixture {
            presence,
            conversations,
            delivery,
            _dir: dir,
        }
    }

    async fn online(
        f: &Fixture,
        user: &str,
    ) -> (ConnectionHandle, Receiver<ServerEvent>) {
        let (conn, rx) = ConnectionHandle::new();
        f.presence
            .set_online(user.into(), format!("{user}-m").as_str().into(), conn.clone())
            .await;
        (conn, rx)
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_deliver_to_online_receiver() {
        let f = fixture().await;
        let (alice, mut alice_rx) = online(&f, "alice").await;
        let (_bob, mut bob_rx) = online(&f, "bob").await;

        let conv = f
            .conversations
            .create_conversation("alice-m".into(), "alice".into(), "bob".into())
            .await
            .unwrap();
        let msg = f
            .conversations
            .append_message(conv.conversation_id, "alice".into(), "bob".into(), "hi".into(), "alice-m".into())
            .await
            .unwrap();

        let outcome = f.delivery.deliver_or_report(conv.conversation_id, &msg, &alice).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::NewMessage { message, .. } if message.body == "hi"));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_report_when_receiver_offline() {
        let f = fixture().await;
        let (alice, mut alice_rx) = online(&f, "alice").await;
        let (_bob, mut bob_rx) = online(&f, "bob").await;

        let conv = f
            .conversations
            .create_conversation("alice-m".into(), "alice".into(), "bob".into())
            .await
            .unwrap();
        f.presence.set_offline(&"bob".into(), &"bob-m".into()).await;

        let msg = f
            .conversations
            .append_message(conv.conversation_id, "alice".into(), "bob".into(), "hi".into(), "alice-m".into())
            .await
            .unwrap();
        let outcome = f.delivery.deliver_or_report(conv.conversation_id, &msg, &alice).await;
        assert_eq!(outcome, DeliveryOutcome::ReceiverUnavailable);

        let events = drain(&mut alice_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::ReceiverUnavailable { receiver_user_id, .. } if receiver_user_id.as_str() == "bob"
        ));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_closed_receiver_counts_as_unavailable() {
        let f = fixture().await;
        let (alice, mut alice_rx) = online(&f, "alice").await;
        let (_bob, bob_rx) = online(&f, "bob").await;
        let conv = f
            .conversations
            .create_conversation("alice-m".into(), "alice".into(), "bob".into())
            .await
            .unwrap();
        drop(bob_rx);

        let msg = f
            .conversations
            .append_message(conv.conversation_id, "alice".into(), "bob".into(), "hi".into(), "alice-m".into())
            .await
            .unwrap();
        let outcome = f.delivery.deliver_or_report(conv.conversation_id, &msg, &alice).await;
        assert_eq!(outcome, DeliveryOutcome::ReceiverUnavailable);
        assert_eq!(drain(&mut alice_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_receiver_counts_as_unavailable() {
        let f = fixture().await;
        let (alice, mut alice_rx) = online(&f, "alice").await;
        let (bob, mut bob_rx) = ConnectionHandle::with_capacity(1);
        f.presence
            .set_online("bob".into(), "bob-m".into(), bob.clone())
            .await;
        let conv = f
            .conversations
            .create_conversation("alice-m".into(), "alice".into(), "bob".into())
            .await
            .unwrap();

        // Bob never reads: the only slot is taken.
        assert!(bob.push(ServerEvent::Error {
            message: "unread".into()
        }));

        let msg = f
            .conversations
            .append_message(conv.conversation_id, "alice".into(), "bob".into(), "hi".into(), "alice-m".into())
            .await
            .unwrap();
        let outcome = f.delivery.deliver_or_report(conv.conversation_id, &msg, &alice).await;
        assert_eq!(outcome, DeliveryOutcome::ReceiverUnavailable);
        assert!(matches!(
            &drain(&mut alice_rx)[..],
            [ServerEvent::ReceiverUnavailable { .. }]
        ));
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_announce_new_conversation() {
        let f = fixture().await;
        let (_bob, mut bob_rx) = online(&f, "bob").await;
        let conv = f
            .conversations
            .create_conversation("alice-m".into(), "alice".into(), "bob".into())
            .await
            .unwrap();

        assert!(f.delivery.announce_new_conversation(&conv).await);
        let events = drain(&mut bob_rx);
        assert!(matches!(
            &events[..],
            [ServerEvent::NewChatSession { session_id, sender_user_id, .. }]
                if *session_id == conv.conversation_id && sender_user_id.as_str() == "alice"
        ));
    }

    #[tokio::test]
    async fn test_offline_notice_only_to_reachable_counterparts() {
        let f = fixture().await;
        let (_alice, _alice_rx) = online(&f, "alice").await;
        let (_bob, mut bob_rx) = online(&f, "bob").await;
        let (_carol, _carol_rx) = online(&f, "carol").await;

        let with_bob = f
            .conversations
            .create_conversation("alice-m".into(), "alice".into(), "bob".into())
            .await
            .unwrap();
        let with_carol = f
            .conversations
            .create_conversation("alice-m".into(), "alice".into(), "carol".into())
            .await
            .unwrap();
        f.presence.set_offline(&"carol".into(), &"carol-m".into()).await;

        let notified = f.delivery.announce_presence_change(&"alice".into(), false).await;
        assert_eq!(notified, 1);

        let events = drain(&mut bob_rx);
        assert!(matches!(
            &events[..],
            [ServerEvent::NewMessage { message, sender_user_id, .. }]
                if message.kind == MessageKind::System && sender_user_id.as_str() == SYSTEM_SENDER_ID
        ));

        let bob_conv = f.conversations.get_conversation(with_bob.conversation_id).await.unwrap();
        assert_eq!(bob_conv.messages.len(), 1);
        assert_eq!(bob_conv.messages[0].body, "alice went offline");

        let carol_conv = f.conversations.get_conversation(with_carol.conversation_id).await.unwrap();
        assert!(carol_conv.messages.is_empty());
    }

    #[tokio::test]
    async fn test_going_online_is_not_broadcast() {
        let f = fixture().await;
        let (_bob, mut bob_rx) = online(&f, "bob").await;
        f.conversations
            .create_conversation("alice-m".into(), "alice".into(), "bob".into())
            .await
            .unwrap();

        assert_eq!(f.delivery.announce_presence_change(&"alice".into(), true).await, 0);
        assert!(drain(&mut bob_rx).is_empty());
    }
}
