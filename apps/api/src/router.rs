use std::sync::Arc;

use axum::{
    Json,
    Router,
    routing::get,
};
use chrono::Utc;
use serde_json::{json, Value};

use call_cell::{call_ws_routes, ActiveCallRegistry, CallState};
use chat_cell::{chat_ws_routes, ChatState};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_realtime::SessionRegistry;

pub fn create_router(
    config: Arc<AppConfig>,
    supabase: Arc<SupabaseClient>,
    registry: SessionRegistry,
    active_calls: ActiveCallRegistry,
) -> Router {
    let chat_state = ChatState::new(config.clone(), supabase.clone(), registry.clone());
    let call_state = CallState::new(config, supabase, registry, active_calls);

    Router::new()
        .route("/", get(|| async { "CuraLink API is running!" }))
        .route("/health", get(health_check))
        .nest(
            "/ws",
            chat_ws_routes(chat_state).merge(call_ws_routes(call_state)),
        )
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "curalink-api",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
