use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use chat_cell::{ChatStore, PresenceBroadcaster, WireUser};
use shared_models::auth::UserProfile;
use shared_realtime::gateway::{
    self, ResolvedToken, CLOSE_FORBIDDEN, CLOSE_INTERNAL_ERROR, CLOSE_MALFORMED_SCOPE,
    CLOSE_UNAUTHENTICATED,
};
use shared_realtime::rooms;
use shared_realtime::wire;
use shared_realtime::ConnectionHandle;

use crate::error::CallError;
use crate::models::{CallClientEvent, CallServerEvent};
use crate::router::CallState;
use crate::services::signaling::CallSignaling;
use crate::services::store::CallStore;

#[derive(Debug, Deserialize)]
pub struct WsTokenQuery {
    pub token: Option<String>,
}

/// Upgrade handler for `/call/{user_id}`.
///
/// The user id stays a raw string here: scope validation happens after the
/// upgrade so the client gets the documented close code instead of a plain
/// HTTP rejection.
pub async fn call_ws_handler(
    State(state): State<CallState>,
    Path(user_id): Path<String>,
    Query(query): Query<WsTokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = gateway::extract_token(query.token.as_deref(), &headers);
    let ws = match token.as_ref().and_then(|t| t.echo_protocol.clone()) {
        Some(echo) => ws.protocols([echo]),
        None => ws,
    };
    ws.on_upgrade(move |socket| run_call_socket(socket, state, user_id, token))
}

async fn run_call_socket(
    socket: WebSocket,
    state: CallState,
    raw_user_id: String,
    token: Option<ResolvedToken>,
) {
    let Ok(path_user_id) = Uuid::parse_str(&raw_user_id) else {
        gateway::close_with(socket, CLOSE_MALFORMED_SCOPE, "malformed user id").await;
        return;
    };

    let identity = match gateway::resolve_identity(
        &state.supabase,
        &state.config.supabase_jwt_secret,
        token.as_ref(),
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            error!("identity resolution failed: {}", e);
            gateway::close_with(socket, CLOSE_INTERNAL_ERROR, "identity lookup failed").await;
            return;
        }
    };

    let Some(user) = identity.user().cloned() else {
        gateway::close_with(socket, CLOSE_UNAUTHENTICATED, "authentication required").await;
        return;
    };

    // The path scope must be the connecting user's own id.
    if user.id != path_user_id {
        gateway::close_with(socket, CLOSE_FORBIDDEN, "call socket is scoped to its own user").await;
        return;
    }

    let auth_token = token.map(|t| t.token);
    let store = CallStore::new(state.supabase.clone(), auth_token.clone());
    let notifier = PresenceBroadcaster::new(
        ChatStore::new(state.supabase.clone(), auth_token),
        state.registry.clone(),
    );
    let signaling = CallSignaling::new(
        store,
        state.registry.clone(),
        state.active_calls.clone(),
        notifier,
    );

    let (conn, outbound) = ConnectionHandle::new(identity);

    // Incoming rings arrive through the personal room.
    state.registry.join(&rooms::user_room(user.id), &conn).await;

    let (sink, mut stream) = socket.split();
    let pump = gateway::spawn_outbound_pump(sink, outbound);

    conn.send_direct(&CallServerEvent::ConnectionEstablished {
        user: WireUser::from(&user),
    })
    .await;
    info!(connection_id = %conn.id(), user_id = %user.id, "call socket connected");

    // The signaling room of the call this connection is currently in, set
    // by initiate and accept, cleared by end. Negotiation frames are
    // refused without one.
    let mut active_room: Option<String> = None;

    while let Some(inbound) = stream.next().await {
        match inbound {
            Ok(Message::Text(text)) => {
                handle_call_frame(&signaling, &conn, &user, &mut active_room, &text).await
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %conn.id(), "socket error: {}", e);
                break;
            }
        }
    }

    signaling.handle_disconnect(&conn).await;
    pump.abort();
    info!(connection_id = %conn.id(), "call socket disconnected");
}

async fn handle_call_frame(
    signaling: &CallSignaling,
    conn: &ConnectionHandle,
    user: &UserProfile,
    active_room: &mut Option<String>,
    text: &str,
) {
    let event = match wire::decode::<CallClientEvent>(text, CallClientEvent::KNOWN_TYPES) {
        Ok(event) => event,
        Err(e) => {
            conn.send_direct(&CallServerEvent::error(e.to_string())).await;
            return;
        }
    };

    match event {
        CallClientEvent::CallInitiate { callee_id } => {
            match signaling.initiate(user, conn, &callee_id).await {
                Ok(initiated) => {
                    *active_room = Some(initiated.room_name.clone());
                    conn.send_direct(&CallServerEvent::CallInitiated {
                        call_id: initiated.call_id.to_string(),
                        room_name: initiated.room_name,
                    })
                    .await;
                }
                Err(e) => send_call_error(conn, &e).await,
            }
        }
        CallClientEvent::CallAccept { call_id, room_name } => {
            match signaling.accept(user, conn, &call_id, &room_name).await {
                Ok(()) => {
                    *active_room = Some(room_name);
                }
                Err(e) => send_call_error(conn, &e).await,
            }
        }
        CallClientEvent::CallReject { call_id, room_name } => {
            if let Err(e) = signaling.reject(user, conn, &call_id, &room_name).await {
                send_call_error(conn, &e).await;
            }
        }
        CallClientEvent::CallEnd { call_id, room_name } => {
            match signaling.end(user, conn, &call_id, &room_name).await {
                Ok(()) => {
                    *active_room = None;
                }
                Err(e) => send_call_error(conn, &e).await,
            }
        }
        CallClientEvent::Offer { payload } => {
            relay_negotiation(
                signaling,
                conn,
                active_room.as_deref(),
                CallServerEvent::Offer {
                    payload,
                    sender_id: user.id.to_string(),
                },
            )
            .await;
        }
        CallClientEvent::Answer { payload } => {
            relay_negotiation(
                signaling,
                conn,
                active_room.as_deref(),
                CallServerEvent::Answer {
                    payload,
                    sender_id: user.id.to_string(),
                },
            )
            .await;
        }
        CallClientEvent::IceCandidate { payload } => {
            relay_negotiation(
                signaling,
                conn,
                active_room.as_deref(),
                CallServerEvent::IceCandidate {
                    payload,
                    sender_id: user.id.to_string(),
                },
            )
            .await;
        }
    }
}

async fn relay_negotiation(
    signaling: &CallSignaling,
    conn: &ConnectionHandle,
    active_room: Option<&str>,
    event: CallServerEvent,
) {
    let Some(room_name) = active_room else {
        send_call_error(conn, &CallError::NoActiveCall).await;
        return;
    };
    signaling.relay(conn, room_name, &event).await;
}

async fn send_call_error(conn: &ConnectionHandle, e: &CallError) {
    if e.is_internal() {
        error!(connection_id = %conn.id(), "call operation failed: {}", e);
    }
    conn.send_direct(&CallServerEvent::error(e.wire_message())).await;
}
