use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("Invalid callee id")]
    InvalidCallee,

    #[error("Callee not found")]
    CalleeNotFound,

    #[error("Invalid call id")]
    InvalidCallId,

    #[error("Call not found or already ended")]
    CallNotFound,

    #[error("Only the callee can accept or reject this call")]
    NotCallee,

    #[error("Not a participant of this call")]
    NotParticipant,

    #[error("Call room does not match this call")]
    RoomMismatch,

    #[error("Invalid call state transition")]
    InvalidTransition,

    #[error("No active call")]
    NoActiveCall,

    #[error("Database error: {message}")]
    Database { message: String },
}

impl From<anyhow::Error> for CallError {
    fn from(err: anyhow::Error) -> Self {
        CallError::Database {
            message: err.to_string(),
        }
    }
}

impl CallError {
    /// Text for the `error` envelope sent back to the offending sender.
    /// Store failures get logged in full and surfaced generically.
    pub fn wire_message(&self) -> String {
        match self {
            CallError::Database { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CallError::Database { .. })
    }
}
