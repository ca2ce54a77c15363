use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("Invalid receiver id")]
    InvalidReceiver,

    #[error("Failed to create message - invalid receiver or conversation")]
    MessageRejected,

    #[error("Invalid message id")]
    InvalidMessageId,

    #[error("Message not found or edit not permitted")]
    EditRejected,

    #[error("Message not found or delete not permitted")]
    DeleteRejected,

    #[error("Invalid notification id")]
    InvalidNotificationId,

    #[error("Notification not found")]
    NotificationNotFound,

    #[error("Database error: {message}")]
    Database { message: String },
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Database {
            message: err.to_string(),
        }
    }
}

impl ChatError {
    /// Text for the `error` envelope sent back to the offending sender.
    /// Store failures get logged in full and surfaced generically.
    pub fn wire_message(&self) -> String {
        match self {
            ChatError::Database { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ChatError::Database { .. })
    }
}
