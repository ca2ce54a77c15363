//! # Chat Cell
//!
//! Real-time messaging between patients and doctors over WebSockets.
//!
//! Two socket endpoints live here: the per-conversation chat socket
//! (`/ws/chat/{conversation_id}`) carrying messages, edits, read receipts
//! and presence, and the personal notification socket
//! (`/ws/notifications`) that streams unread notifications to one user.
//! Message rows, conversations and notifications are persisted through the
//! shared Supabase client; live fan-out goes through the session registry.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::ChatError;
pub use models::*;
pub use router::{chat_ws_routes, ChatState};
pub use services::{ChatRelay, ChatStore, PresenceBroadcaster};
