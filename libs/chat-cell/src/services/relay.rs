use serde_json::json;
use tracing::info;
use uuid::Uuid;

use shared_models::auth::UserProfile;
use shared_realtime::rooms;
use shared_realtime::{ConnectionHandle, SessionRegistry};

use crate::error::ChatError;
use crate::models::{ChatServerEvent, Conversation, WireMessage};
use crate::services::presence::PresenceBroadcaster;
use crate::services::store::ChatStore;

/// Persists chat messages and fans them out to the conversation room.
#[derive(Clone)]
pub struct ChatRelay {
    store: ChatStore,
    registry: SessionRegistry,
    notifier: PresenceBroadcaster,
}

impl ChatRelay {
    pub fn new(store: ChatStore, registry: SessionRegistry, notifier: PresenceBroadcaster) -> Self {
        Self {
            store,
            registry,
            notifier,
        }
    }

    /// Validates, persists and broadcasts one message. The room sees a
    /// `chat_message` envelope minus the sending connection; the created
    /// payload comes back to the caller for its `message_sent` reply.
    ///
    /// The sender's other connections do receive the broadcast; clients
    /// deduplicate against `temp_id`.
    pub async fn send_message(
        &self,
        conversation: &Conversation,
        sender: &UserProfile,
        sender_conn: &ConnectionHandle,
        receiver_id: Option<&str>,
        content: Option<&str>,
    ) -> Result<WireMessage, ChatError> {
        let content = content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        let receiver_id = receiver_id
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or(ChatError::InvalidReceiver)?;

        if !conversation.is_participant(sender.id) || !conversation.is_participant(receiver_id) {
            return Err(ChatError::MessageRejected);
        }

        let message = self
            .store
            .create_message(conversation.id, sender.id, receiver_id, content)
            .await?
            .ok_or(ChatError::MessageRejected)?;

        let wire = WireMessage::from_message(&message, &sender.username);
        let delivered = self
            .registry
            .broadcast(
                &rooms::chat_room(conversation.id),
                &ChatServerEvent::ChatMessage {
                    message: wire.clone(),
                },
                Some(sender_conn.id()),
            )
            .await;

        info!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            delivered,
            "chat message relayed"
        );

        self.notifier
            .push_notification(
                receiver_id,
                "new_message",
                json!({
                    "conversation_id": message.conversation_id.to_string(),
                    "message_id": message.id.to_string(),
                    "sender_id": message.sender_id.to_string(),
                    "sender_username": sender.username,
                }),
            )
            .await;

        Ok(wire)
    }

    /// Only the original sender may edit; the store enforces that through
    /// its sender filter and answers with no row otherwise.
    pub async fn edit_message(
        &self,
        conversation: &Conversation,
        sender: &UserProfile,
        sender_conn: &ConnectionHandle,
        message_id: &str,
        new_content: &str,
    ) -> Result<WireMessage, ChatError> {
        if new_content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }
        let message_id =
            Uuid::parse_str(message_id).map_err(|_| ChatError::InvalidMessageId)?;

        let message = self
            .store
            .update_message_content(message_id, sender.id, new_content)
            .await?
            .ok_or(ChatError::EditRejected)?;

        let wire = WireMessage::from_message(&message, &sender.username);
        self.registry
            .broadcast(
                &rooms::chat_room(conversation.id),
                &ChatServerEvent::MessageEdited {
                    message: wire.clone(),
                },
                Some(sender_conn.id()),
            )
            .await;

        Ok(wire)
    }

    pub async fn delete_message(
        &self,
        conversation: &Conversation,
        sender: &UserProfile,
        sender_conn: &ConnectionHandle,
        message_id: &str,
    ) -> Result<String, ChatError> {
        let message_id =
            Uuid::parse_str(message_id).map_err(|_| ChatError::InvalidMessageId)?;

        let message = self
            .store
            .soft_delete_message(message_id, sender.id)
            .await?
            .ok_or(ChatError::DeleteRejected)?;

        let wire_id = message.id.to_string();
        self.registry
            .broadcast(
                &rooms::chat_room(conversation.id),
                &ChatServerEvent::MessageDeleted {
                    message_id: wire_id.clone(),
                    deleted_by: sender.id.to_string(),
                },
                Some(sender_conn.id()),
            )
            .await;

        Ok(wire_id)
    }

    /// Marks everything addressed to the reader in this conversation as
    /// seen. No room broadcast; unread counters surface over the
    /// notification stream.
    pub async fn mark_read(
        &self,
        conversation: &Conversation,
        reader: &UserProfile,
    ) -> Result<u64, ChatError> {
        let updated = self
            .store
            .mark_messages_read(conversation.id, reader.id)
            .await?;
        info!(
            conversation_id = %conversation.id,
            reader_id = %reader.id,
            updated,
            "messages marked read"
        );
        Ok(updated)
    }
}
