use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_models::auth::UserProfile;

// ==============================================================================
// STORE ROWS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

/// A row from the `messages` table. Deleted messages keep their row; the
/// relay only ever flips `is_deleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `conversations` table. Exactly one patient and one
/// doctor; everyone else is a stranger to the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.patient_id == user_id || self.doctor_id == user_id
    }
}

/// A row from the `notifications` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// INBOUND CLIENT EVENTS
// ==============================================================================

/// Frames a client may send on the chat socket. Fields the router needs
/// for error envelopes (`temp_id`) stay optional so a half-formed frame
/// still yields a usable parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatClientEvent {
    ChatMessage {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        receiver_id: Option<String>,
        #[serde(default)]
        temp_id: Option<String>,
    },
    #[serde(alias = "typing_indicator")]
    Typing {
        #[serde(default)]
        is_typing: bool,
    },
    MarkAsRead,
    EditMessage {
        message_id: String,
        #[serde(alias = "message")]
        new_content: String,
    },
    DeleteMessage {
        message_id: String,
    },
    ConnectionTest,
}

impl ChatClientEvent {
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "chat_message",
        "typing",
        "typing_indicator",
        "mark_as_read",
        "edit_message",
        "delete_message",
        "connection_test",
    ];

    /// The client-side correlation id, when this frame carries one. Error
    /// envelopes thread it back so optimistic UI can roll back.
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            ChatClientEvent::ChatMessage { temp_id, .. } => temp_id.as_deref(),
            _ => None,
        }
    }
}

/// Frames a client may send on the notification socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationClientEvent {
    MarkNotificationRead { notification_id: String },
    ConnectionTest,
}

impl NotificationClientEvent {
    pub const KNOWN_TYPES: &'static [&'static str] =
        &["mark_notification_read", "connection_test"];
}

// ==============================================================================
// OUTBOUND WIRE SHAPES
// ==============================================================================

/// Identity payload embedded in connection and presence envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUser {
    pub id: String,
    pub username: String,
}

impl From<&UserProfile> for WireUser {
    fn from(profile: &UserProfile) -> Self {
        Self {
            id: profile.id.to_string(),
            username: profile.username.clone(),
        }
    }
}

/// Message payload as clients see it. Identifiers and timestamps go out as
/// strings so every envelope survives a plain JSON round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub receiver_id: String,
    pub content: String,
    pub status: MessageStatus,
    pub is_edited: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl WireMessage {
    pub fn from_message(message: &Message, sender_username: &str) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            sender_id: message.sender_id.to_string(),
            sender_username: sender_username.to_string(),
            receiver_id: message.receiver_id.to_string(),
            content: message.content.clone(),
            status: message.status,
            is_edited: message.is_edited,
            created_at: message.created_at.to_rfc3339(),
            updated_at: message.updated_at.to_rfc3339(),
        }
    }
}

/// Notification payload as clients see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNotification {
    pub id: String,
    pub notification_type: String,
    pub payload: Value,
    pub is_read: bool,
    pub created_at: String,
}

impl From<&Notification> for WireNotification {
    fn from(notification: &Notification) -> Self {
        Self {
            id: notification.id.to_string(),
            notification_type: notification.notification_type.clone(),
            payload: notification.payload.clone(),
            is_read: notification.is_read,
            created_at: notification.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

// ==============================================================================
// OUTBOUND SERVER EVENTS
// ==============================================================================

/// Every frame the chat and notification sockets can emit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatServerEvent {
    ConnectionEstablished {
        conversation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<WireUser>,
    },
    ConnectionConfirmed {
        timestamp: String,
        user: WireUser,
    },
    MessageSent {
        message: WireMessage,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    ChatMessage {
        message: WireMessage,
    },
    MessageEditedConfirmation {
        message: WireMessage,
    },
    MessageEdited {
        message: WireMessage,
    },
    MessageDeletedConfirmation {
        message_id: String,
    },
    MessageDeleted {
        message_id: String,
        deleted_by: String,
    },
    MessagesRead {
        conversation_id: String,
        updated_count: u64,
    },
    UserStatusChanged {
        user_id: String,
        username: String,
        status: PresenceStatus,
    },
    TypingIndicator {
        user_id: String,
        username: String,
        is_typing: bool,
    },
    NotificationsBatch {
        notifications: Vec<WireNotification>,
        unread_count: u64,
    },
    Notification {
        notification: WireNotification,
        unread_count: u64,
    },
    NotificationRead {
        notification_id: String,
        unread_count: u64,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
}

impl ChatServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ChatServerEvent::Error {
            message: message.into(),
            temp_id: None,
        }
    }

    pub fn error_with_temp_id(message: impl Into<String>, temp_id: Option<&str>) -> Self {
        ChatServerEvent::Error {
            message: message.into(),
            temp_id: temp_id.map(str::to_string),
        }
    }
}
