use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_models::auth::UserProfile;
use shared_realtime::gateway::{
    self, ResolvedToken, CLOSE_FORBIDDEN, CLOSE_INTERNAL_ERROR, CLOSE_MALFORMED_SCOPE,
    CLOSE_UNAUTHENTICATED,
};
use shared_realtime::rooms;
use shared_realtime::wire;
use shared_realtime::ConnectionHandle;

use crate::error::ChatError;
use crate::models::{
    ChatClientEvent, ChatServerEvent, Conversation, NotificationClientEvent, WireUser,
};
use crate::router::ChatState;
use crate::services::presence::PresenceBroadcaster;
use crate::services::relay::ChatRelay;
use crate::services::store::ChatStore;

#[derive(Debug, Deserialize)]
pub struct WsTokenQuery {
    pub token: Option<String>,
}

/// Upgrade handler for `/chat/{conversation_id}`.
///
/// The conversation id stays a raw string here: scope validation happens
/// after the upgrade so the client gets the documented close code instead
/// of a plain HTTP rejection.
pub async fn chat_ws_handler(
    State(state): State<ChatState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<WsTokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = gateway::extract_token(query.token.as_deref(), &headers);
    let ws = match token.as_ref().and_then(|t| t.echo_protocol.clone()) {
        Some(echo) => ws.protocols([echo]),
        None => ws,
    };
    ws.on_upgrade(move |socket| run_chat_socket(socket, state, conversation_id, token))
}

/// Upgrade handler for `/notifications`.
pub async fn notifications_ws_handler(
    State(state): State<ChatState>,
    Query(query): Query<WsTokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = gateway::extract_token(query.token.as_deref(), &headers);
    let ws = match token.as_ref().and_then(|t| t.echo_protocol.clone()) {
        Some(echo) => ws.protocols([echo]),
        None => ws,
    };
    ws.on_upgrade(move |socket| run_notifications_socket(socket, state, token))
}

/// Everything one chat connection's dispatch needs. `auth` is `Some` only
/// for authenticated participants; anonymous listeners keep `None` and
/// have every frame refused.
struct ChatSocketCtx {
    conn: ConnectionHandle,
    relay: ChatRelay,
    presence: PresenceBroadcaster,
    room: String,
    auth: Option<(UserProfile, Conversation)>,
}

async fn run_chat_socket(
    socket: WebSocket,
    state: ChatState,
    raw_conversation_id: String,
    token: Option<ResolvedToken>,
) {
    let Ok(conversation_id) = Uuid::parse_str(&raw_conversation_id) else {
        gateway::close_with(socket, CLOSE_MALFORMED_SCOPE, "malformed conversation id").await;
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

    let store = ChatStore::new(state.supabase.clone(), token.map(|t| t.token));

    // Authenticated users must be conversation participants before any
    // room state exists.
    let auth = match identity.user() {
        Some(user) => match store.get_conversation(conversation_id).await {
            Ok(Some(conversation)) if conversation.is_participant(user.id) => {
                Some((user.clone(), conversation))
            }
            Ok(_) => {
                gateway::close_with(socket, CLOSE_FORBIDDEN, "not a conversation participant")
                    .await;
                return;
            }
            Err(e) => {
                error!(conversation_id = %conversation_id, "conversation lookup failed: {}", e);
                gateway::close_with(socket, CLOSE_INTERNAL_ERROR, "conversation lookup failed")
                    .await;
                return;
            }
        },
        None => None,
    };

    let (conn, outbound) = ConnectionHandle::new(identity);
    let presence = PresenceBroadcaster::new(store.clone(), state.registry.clone());
    let relay = ChatRelay::new(store, state.registry.clone(), presence.clone());

    let room = rooms::chat_room(conversation_id);
    state.registry.join(&room, &conn).await;

    let (sink, mut stream) = socket.split();
    let pump = gateway::spawn_outbound_pump(sink, outbound);

    conn.send_direct(&ChatServerEvent::ConnectionEstablished {
        conversation_id: conversation_id.to_string(),
        user: auth.as_ref().map(|(user, _)| WireUser::from(user)),
    })
    .await;
    if let Some((user, _)) = auth.as_ref() {
        presence.announce_online(&room, user, &conn).await;
    }

    info!(
        connection_id = %conn.id(),
        conversation_id = %conversation_id,
        authenticated = auth.is_some(),
        "chat socket connected"
    );

    let ctx = ChatSocketCtx {
        conn,
        relay,
        presence,
        room,
        auth,
    };

    while let Some(inbound) = stream.next().await {
        match inbound {
            Ok(Message::Text(text)) => handle_chat_frame(&ctx, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %ctx.conn.id(), "socket error: {}", e);
                break;
            }
        }
    }

    let announce = ctx
        .auth
        .as_ref()
        .map(|(user, _)| (ctx.room.as_str(), user));
    ctx.presence.handle_disconnect(&ctx.conn, announce).await;
    pump.abort();
    info!(connection_id = %ctx.conn.id(), "chat socket disconnected");
}

async fn handle_chat_frame(ctx: &ChatSocketCtx, text: &str) {
    let event = match wire::decode::<ChatClientEvent>(text, ChatClientEvent::KNOWN_TYPES) {
        Ok(event) => event,
        Err(e) => {
            ctx.conn.send_direct(&ChatServerEvent::error(e.to_string())).await;
            return;
        }
    };

    let Some((user, conversation)) = ctx.auth.as_ref() else {
        ctx.conn
            .send_direct(&ChatServerEvent::error_with_temp_id(
                "Authentication required",
                event.temp_id(),
            ))
            .await;
        return;
    };

    match event {
        ChatClientEvent::ChatMessage {
            message,
            receiver_id,
            temp_id,
        } => {
            let sent = ctx
                .relay
                .send_message(
                    conversation,
                    user,
                    &ctx.conn,
                    receiver_id.as_deref(),
                    message.as_deref(),
                )
                .await;
            match sent {
                Ok(wire_message) => {
                    ctx.conn
                        .send_direct(&ChatServerEvent::MessageSent {
                            message: wire_message,
                            temp_id,
                        })
                        .await;
                }
                Err(e) => send_chat_error(&ctx.conn, &e, temp_id.as_deref()).await,
            }
        }
        ChatClientEvent::Typing { is_typing } => {
            ctx.presence
                .broadcast_typing(&ctx.room, user, &ctx.conn, is_typing)
                .await;
        }
        ChatClientEvent::MarkAsRead => match ctx.relay.mark_read(conversation, user).await {
            Ok(updated_count) => {
                ctx.conn
                    .send_direct(&ChatServerEvent::MessagesRead {
                        conversation_id: conversation.id.to_string(),
                        updated_count,
                    })
                    .await;
            }
            Err(e) => send_chat_error(&ctx.conn, &e, None).await,
        },
        ChatClientEvent::EditMessage {
            message_id,
            new_content,
        } => {
            let edited = ctx
                .relay
                .edit_message(conversation, user, &ctx.conn, &message_id, &new_content)
                .await;
            match edited {
                Ok(wire_message) => {
                    ctx.conn
                        .send_direct(&ChatServerEvent::MessageEditedConfirmation {
                            message: wire_message,
                        })
                        .await;
                }
                Err(e) => send_chat_error(&ctx.conn, &e, None).await,
            }
        }
        ChatClientEvent::DeleteMessage { message_id } => {
            let deleted = ctx
                .relay
                .delete_message(conversation, user, &ctx.conn, &message_id)
                .await;
            match deleted {
                Ok(deleted_id) => {
                    ctx.conn
                        .send_direct(&ChatServerEvent::MessageDeletedConfirmation {
                            message_id: deleted_id,
                        })
                        .await;
                }
                Err(e) => send_chat_error(&ctx.conn, &e, None).await,
            }
        }
        ChatClientEvent::ConnectionTest => {
            ctx.conn
                .send_direct(&ChatServerEvent::ConnectionConfirmed {
                    timestamp: Utc::now().to_rfc3339(),
                    user: WireUser::from(user),
                })
                .await;
        }
    }
}

async fn run_notifications_socket(
    socket: WebSocket,
    state: ChatState,
    token: Option<ResolvedToken>,
) {
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

    let store = ChatStore::new(state.supabase.clone(), token.map(|t| t.token));
    let presence = PresenceBroadcaster::new(store, state.registry.clone());
    let (conn, outbound) = ConnectionHandle::new(identity);

    // The unread backlog is part of the connect handshake: a store failure
    // closes the socket before it joins any room.
    if let Err(e) = presence.flush_unread(&user, &conn).await {
        error!(user_id = %user.id, "unread notification fetch failed: {}", e);
        gateway::close_with(socket, CLOSE_INTERNAL_ERROR, "notification fetch failed").await;
        return;
    }

    state.registry.join(&rooms::user_room(user.id), &conn).await;
    info!(connection_id = %conn.id(), user_id = %user.id, "notification socket connected");

    let (sink, mut stream) = socket.split();
    let pump = gateway::spawn_outbound_pump(sink, outbound);

    while let Some(inbound) = stream.next().await {
        match inbound {
            Ok(Message::Text(text)) => {
                handle_notification_frame(&presence, &conn, &user, &text).await
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %conn.id(), "socket error: {}", e);
                break;
            }
        }
    }

    presence.handle_disconnect(&conn, None).await;
    pump.abort();
    info!(connection_id = %conn.id(), "notification socket disconnected");
}

async fn handle_notification_frame(
    presence: &PresenceBroadcaster,
    conn: &ConnectionHandle,
    user: &UserProfile,
    text: &str,
) {
    let event = match wire::decode::<NotificationClientEvent>(
        text,
        NotificationClientEvent::KNOWN_TYPES,
    ) {
        Ok(event) => event,
        Err(e) => {
            conn.send_direct(&ChatServerEvent::error(e.to_string())).await;
            return;
        }
    };

    match event {
        NotificationClientEvent::MarkNotificationRead { notification_id } => {
            match presence.mark_notification_read(user, &notification_id).await {
                Ok(reply) => {
                    conn.send_direct(&reply).await;
                }
                Err(e) => send_chat_error(conn, &e, None).await,
            }
        }
        NotificationClientEvent::ConnectionTest => {
            conn.send_direct(&ChatServerEvent::ConnectionConfirmed {
                timestamp: Utc::now().to_rfc3339(),
                user: WireUser::from(user),
            })
            .await;
        }
    }
}

async fn send_chat_error(conn: &ConnectionHandle, e: &ChatError, temp_id: Option<&str>) {
    if e.is_internal() {
        error!(connection_id = %conn.id(), "chat operation failed: {}", e);
    }
    conn.send_direct(&ChatServerEvent::error_with_temp_id(
        e.wire_message(),
        temp_id,
    ))
    .await;
}
