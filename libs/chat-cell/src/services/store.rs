use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{Conversation, Message, Notification};

/// Store access for one socket. Carries the connection's own bearer token
/// so row-level security applies to every call it makes.
#[derive(Clone)]
pub struct ChatStore {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl ChatStore {
    pub fn new(supabase: Arc<SupabaseClient>, auth_token: Option<String>) -> Self {
        Self {
            supabase,
            auth_token,
        }
    }

    fn token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let path = format!("/rest/v1/conversations?id=eq.{}&limit=1", conversation_id);
        let rows: Vec<Conversation> = self
            .supabase
            .request(Method::GET, &path, self.token(), None)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Inserts a message row. The store may refuse the insert (row-level
    /// security, foreign keys) and answer with an empty representation;
    /// that surfaces as `None`.
    pub async fn create_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Option<Message>> {
        let body = json!({
            "conversation_id": conversation_id,
            "sender_id": sender_id,
            "receiver_id": receiver_id,
            "content": content,
            "status": "sent",
        });

        let rows: Vec<Message> = self
            .supabase
            .request(Method::POST, "/rest/v1/messages", self.token(), Some(body))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Rewrites a message body. The sender filter makes the store reject
    /// edits by anyone but the original sender, and a deleted message
    /// cannot be edited; both cases come back as `None`.
    pub async fn update_message_content(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        new_content: &str,
    ) -> Result<Option<Message>> {
        let path = format!(
            "/rest/v1/messages?id=eq.{}&sender_id=eq.{}&is_deleted=eq.false",
            message_id, sender_id
        );
        let body = json!({
            "content": new_content,
            "is_edited": true,
            "updated_at": Utc::now(),
        });

        let rows: Vec<Message> = self
            .supabase
            .request(Method::PATCH, &path, self.token(), Some(body))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Soft delete. The row survives with `is_deleted` set; same sender
    /// filter as editing.
    pub async fn soft_delete_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Option<Message>> {
        let path = format!(
            "/rest/v1/messages?id=eq.{}&sender_id=eq.{}&is_deleted=eq.false",
            message_id, sender_id
        );
        let body = json!({
            "is_deleted": true,
            "updated_at": Utc::now(),
        });

        let rows: Vec<Message> = self
            .supabase
            .request(Method::PATCH, &path, self.token(), Some(body))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Marks every message addressed to `reader_id` in the conversation as
    /// seen. Returns how many rows changed.
    pub async fn mark_messages_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64> {
        let path = format!(
            "/rest/v1/messages?conversation_id=eq.{}&receiver_id=eq.{}&status=neq.seen",
            conversation_id, reader_id
        );
        let body = json!({
            "status": "seen",
            "updated_at": Utc::now(),
        });

        let rows: Vec<Message> = self
            .supabase
            .request(Method::PATCH, &path, self.token(), Some(body))
            .await?;
        Ok(rows.len() as u64)
    }

    pub async fn create_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        payload: Value,
    ) -> Result<Option<Notification>> {
        let body = json!({
            "user_id": user_id,
            "notification_type": notification_type,
            "payload": payload,
        });

        let rows: Vec<Notification> = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/notifications",
                self.token(),
                Some(body),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Most-recent unread notifications plus the total unread count, which
    /// may exceed the page returned.
    pub async fn unread_notifications(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<(Vec<Notification>, u64)> {
        let path = format!(
            "/rest/v1/notifications?user_id=eq.{}&is_read=eq.false&order=created_at.desc&limit={}",
            user_id, limit
        );
        self.supabase
            .request_with_count(Method::GET, &path, self.token(), None)
            .await
    }

    /// `None` when the notification does not exist or belongs to somebody
    /// else.
    pub async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Notification>> {
        let path = format!(
            "/rest/v1/notifications?id=eq.{}&user_id=eq.{}",
            notification_id, user_id
        );
        let body = json!({ "is_read": true });

        let rows: Vec<Notification> = self
            .supabase
            .request(Method::PATCH, &path, self.token(), Some(body))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        let path = format!(
            "/rest/v1/notifications?user_id=eq.{}&is_read=eq.false&limit=1",
            user_id
        );
        let (_rows, count): (Vec<Notification>, u64) = self
            .supabase
            .request_with_count(Method::GET, &path, self.token(), None)
            .await?;
        Ok(count)
    }
}
