use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use shared_models::auth::UserProfile;
use shared_realtime::rooms;
use shared_realtime::{ConnectionHandle, SessionRegistry};

use crate::error::ChatError;
use crate::models::{ChatServerEvent, PresenceStatus, WireNotification};
use crate::services::store::ChatStore;

/// Most-recent unread notifications flushed when a notification socket
/// connects.
pub const NOTIFICATION_BATCH_LIMIT: usize = 20;

/// Announces presence transitions to conversation rooms and feeds the
/// personal notification stream.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    store: ChatStore,
    registry: SessionRegistry,
}

impl PresenceBroadcaster {
    pub fn new(store: ChatStore, registry: SessionRegistry) -> Self {
        Self { store, registry }
    }

    pub async fn announce_online(&self, room: &str, user: &UserProfile, conn: &ConnectionHandle) {
        self.announce(room, user, conn, PresenceStatus::Online)
            .await;
    }

    async fn announce(
        &self,
        room: &str,
        user: &UserProfile,
        conn: &ConnectionHandle,
        status: PresenceStatus,
    ) {
        self.registry
            .broadcast(
                room,
                &ChatServerEvent::UserStatusChanged {
                    user_id: user.id.to_string(),
                    username: user.username.clone(),
                    status,
                },
                Some(conn.id()),
            )
            .await;
    }

    pub async fn broadcast_typing(
        &self,
        room: &str,
        user: &UserProfile,
        conn: &ConnectionHandle,
        is_typing: bool,
    ) {
        self.registry
            .broadcast(
                room,
                &ChatServerEvent::TypingIndicator {
                    user_id: user.id.to_string(),
                    username: user.username.clone(),
                    is_typing,
                },
                Some(conn.id()),
            )
            .await;
    }

    /// Sends the connect-time unread batch to this connection. An empty
    /// batch still goes out so clients can reset their badge state.
    pub async fn flush_unread(
        &self,
        user: &UserProfile,
        conn: &ConnectionHandle,
    ) -> Result<(), ChatError> {
        let (notifications, unread_count) = self
            .store
            .unread_notifications(user.id, NOTIFICATION_BATCH_LIMIT)
            .await?;

        conn.send_direct(&ChatServerEvent::NotificationsBatch {
            notifications: notifications.iter().map(WireNotification::from).collect(),
            unread_count,
        })
        .await;
        Ok(())
    }

    /// Persists a notification and pushes it live to the user's personal
    /// room. Failures are logged and swallowed; notifying must never fail
    /// the operation that triggered it.
    pub async fn push_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        payload: Value,
    ) {
        let notification = match self
            .store
            .create_notification(user_id, notification_type, payload)
            .await
        {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                warn!(user_id = %user_id, "notification insert returned no row");
                return;
            }
            Err(e) => {
                warn!(user_id = %user_id, "failed to store notification: {}", e);
                return;
            }
        };

        let unread_count = match self.store.unread_count(user_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id = %user_id, "failed to count unread notifications: {}", e);
                return;
            }
        };

        self.registry
            .broadcast(
                &rooms::user_room(user_id),
                &ChatServerEvent::Notification {
                    notification: WireNotification::from(&notification),
                    unread_count,
                },
                None,
            )
            .await;
    }

    pub async fn mark_notification_read(
        &self,
        user: &UserProfile,
        notification_id: &str,
    ) -> Result<ChatServerEvent, ChatError> {
        let notification_id =
            Uuid::parse_str(notification_id).map_err(|_| ChatError::InvalidNotificationId)?;

        self.store
            .mark_notification_read(notification_id, user.id)
            .await?
            .ok_or(ChatError::NotificationNotFound)?;

        let unread_count = self.store.unread_count(user.id).await?;
        Ok(ChatServerEvent::NotificationRead {
            notification_id: notification_id.to_string(),
            unread_count,
        })
    }

    /// Disconnect cleanup, safe to call more than once per connection: the
    /// first call empties the registry and, when the connection had an
    /// authenticated chat presence, tells the room the user went offline.
    pub async fn handle_disconnect(
        &self,
        conn: &ConnectionHandle,
        announce: Option<(&str, &UserProfile)>,
    ) {
        if !conn.begin_close() {
            return;
        }
        self.registry.disconnect(conn).await;
        if let Some((room, user)) = announce {
            self.announce(room, user, conn, PresenceStatus::Offline)
                .await;
        }
    }
}
