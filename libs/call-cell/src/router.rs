use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_realtime::SessionRegistry;

use crate::handlers::call_ws_handler;
use crate::services::active_calls::ActiveCallRegistry;

/// Shared state for the call cell's WebSocket route.
///
/// The session registry is handed in rather than built here so call rings
/// land in the same personal rooms the notification stream serves. The
/// active-call registry is process-wide for the same reason: both sides of
/// a call may connect through different sockets.
#[derive(Clone)]
pub struct CallState {
    pub config: Arc<AppConfig>,
    pub supabase: Arc<SupabaseClient>,
    pub registry: SessionRegistry,
    pub active_calls: ActiveCallRegistry,
}

impl CallState {
    pub fn new(
        config: Arc<AppConfig>,
        supabase: Arc<SupabaseClient>,
        registry: SessionRegistry,
        active_calls: ActiveCallRegistry,
    ) -> Self {
        Self {
            config,
            supabase,
            registry,
            active_calls,
        }
    }
}

/// Creates the call signaling WebSocket routes
pub fn call_ws_routes(state: CallState) -> Router {
    Router::new()
        .route("/call/{user_id}", get(call_ws_handler))
        .with_state(state)
}
