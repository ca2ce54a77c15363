use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_realtime::SessionRegistry;

use crate::handlers::{chat_ws_handler, notifications_ws_handler};

/// Shared state behind the chat and notification sockets. The registry is
/// handed in rather than built here so every cell fans out through the
/// same room map.
#[derive(Clone)]
pub struct ChatState {
    pub config: Arc<AppConfig>,
    pub supabase: Arc<SupabaseClient>,
    pub registry: SessionRegistry,
}

impl ChatState {
    pub fn new(
        config: Arc<AppConfig>,
        supabase: Arc<SupabaseClient>,
        registry: SessionRegistry,
    ) -> Self {
        Self {
            config,
            supabase,
            registry,
        }
    }
}

/// Creates the chat WebSocket routes
pub fn chat_ws_routes(state: ChatState) -> Router {
    Router::new()
        .route("/chat/{conversation_id}", get(chat_ws_handler))
        .route("/notifications", get(notifications_ws_handler))
        .with_state(state)
}
