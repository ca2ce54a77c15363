use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::Identity;

use crate::wire;

pub type ConnectionId = Uuid;

/// Frames queued per connection before best-effort fan-out starts dropping.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// One WebSocket connection as the rest of the system sees it: an id, the
/// identity resolved at connect time, and the sending half of the outbound
/// frame queue. The connection task owns the receiving half.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    sender: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(identity: Identity) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Self {
            id: Uuid::new_v4(),
            identity,
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queues an event for this connection's own socket. Best-effort like
    /// the room fan-out: a full or closed queue drops the frame.
    pub fn send<T: Serialize>(&self, event: &T) -> bool {
        let frame = match wire::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = %self.id, "failed to encode outbound event: {}", e);
                return false;
            }
        };

        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection_id = %self.id, "outbound queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %self.id, "outbound queue closed, dropping event");
                false
            }
        }
    }

    /// Queues a direct reply for this connection, waiting for queue capacity
    /// when the backlog is full. The socket's outbound pump drains the queue
    /// from its own task, so waiting here cannot stall delivery. Returns
    /// `false` only when the connection is gone or the event fails to encode.
    pub async fn send_direct<T: Serialize>(&self, event: &T) -> bool {
        let frame = match wire::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = %self.id, "failed to encode outbound event: {}", e);
                return false;
            }
        };

        match self.sender.send(frame).await {
            Ok(()) => true,
            Err(_) => {
                debug!(connection_id = %self.id, "outbound queue closed, dropping reply");
                false
            }
        }
    }

    /// Flips the closed flag. Only the first caller gets `true`; cleanup code
    /// uses this to run exactly once per connection.
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    rooms: HashMap<String, HashMap<ConnectionId, mpsc::Sender<String>>>,
    joined: HashMap<ConnectionId, HashSet<String>>,
}

/// Process-wide room membership map backing all fan-out. Clones share the
/// same underlying state.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection to a room. Joining twice is a no-op.
    pub async fn join(&self, room: &str, conn: &ConnectionHandle) {
        let mut inner = self.inner.write().await;
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn.id(), conn.sender.clone());
        inner
            .joined
            .entry(conn.id())
            .or_default()
            .insert(room.to_string());
        debug!(connection_id = %conn.id(), room = %room, "joined room");
    }

    /// Removes the connection from a room. Leaving an unjoined room is a
    /// no-op.
    pub async fn leave(&self, room: &str, conn: &ConnectionHandle) {
        let mut inner = self.inner.write().await;
        remove_member(&mut inner.rooms, room, conn.id());
        if let Some(rooms) = inner.joined.get_mut(&conn.id()) {
            rooms.remove(room);
            if rooms.is_empty() {
                inner.joined.remove(&conn.id());
            }
        }
    }

    pub async fn is_member(&self, room: &str, id: ConnectionId) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|members| members.contains_key(&id))
            .unwrap_or(false)
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Fans an event out to the room's members as of this call. Best-effort:
    /// a member whose outbound queue is full or closed misses the event, and
    /// connections joining afterwards never see it. Returns how many members
    /// the frame was handed to.
    pub async fn broadcast<T: Serialize>(
        &self,
        room: &str,
        event: &T,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let frame = match wire::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = %room, "failed to encode broadcast event: {}", e);
                return 0;
            }
        };

        // Snapshot the member senders so a concurrent disconnect cannot race
        // the delivery loop.
        let members: Vec<(ConnectionId, mpsc::Sender<String>)> = {
            let inner = self.inner.read().await;
            match inner.rooms.get(room) {
                Some(members) => members
                    .iter()
                    .filter(|(id, _)| Some(**id) != exclude)
                    .map(|(id, sender)| (*id, sender.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (id, sender) in members {
            match sender.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(connection_id = %id, room = %room, "dropping broadcast frame: {}", e)
                }
            }
        }
        delivered
    }

    /// Removes the connection from every room it joined, returning those
    /// rooms. Later calls for the same connection return an empty list.
    pub async fn disconnect(&self, conn: &ConnectionHandle) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let rooms = inner.joined.remove(&conn.id()).unwrap_or_default();
        for room in &rooms {
            remove_member(&mut inner.rooms, room, conn.id());
        }
        debug!(connection_id = %conn.id(), rooms = rooms.len(), "connection removed from registry");
        rooms.into_iter().collect()
    }
}

fn remove_member(
    rooms: &mut HashMap<String, HashMap<ConnectionId, mpsc::Sender<String>>>,
    room: &str,
    id: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(room) {
        members.remove(&id);
        if members.is_empty() {
            rooms.remove(room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn anonymous_conn() -> (ConnectionHandle, mpsc::Receiver<String>) {
        ConnectionHandle::new(Identity::Anonymous)
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = anonymous_conn();

        registry.join("chat_a", &conn).await;
        registry.join("chat_a", &conn).await;

        assert_eq!(registry.room_size("chat_a").await, 1);
    }

    #[tokio::test]
    async fn leave_unjoined_room_is_noop() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = anonymous_conn();

        registry.leave("chat_a", &conn).await;

        assert!(!registry.is_member("chat_a", conn.id()).await);
        assert_eq!(registry.room_size("chat_a").await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_members_and_honors_exclusion() {
        let registry = SessionRegistry::new();
        let (sender_conn, mut sender_rx) = anonymous_conn();
        let (peer_conn, mut peer_rx) = anonymous_conn();

        registry.join("chat_a", &sender_conn).await;
        registry.join("chat_a", &peer_conn).await;

        let delivered = registry
            .broadcast("chat_a", &json!({"type": "ping"}), Some(sender_conn.id()))
            .await;

        assert_eq!(delivered, 1);
        let frame = peer_rx.try_recv().expect("peer should receive the frame");
        let event: Value = serde_json::from_str(&frame).expect("frame should be JSON");
        assert_eq!(event["type"], "ping");
        assert!(
            sender_rx.try_recv().is_err(),
            "excluded sender must not receive its own broadcast"
        );
    }

    #[tokio::test]
    async fn broadcast_does_not_cross_rooms() {
        let registry = SessionRegistry::new();
        let (conn_a, mut rx_a) = anonymous_conn();
        let (conn_b, mut rx_b) = anonymous_conn();

        registry.join("chat_a", &conn_a).await;
        registry.join("chat_b", &conn_b).await;

        registry.broadcast("chat_a", &json!({"type": "ping"}), None).await;

        assert!(rx_a.try_recv().is_ok(), "room member should receive");
        assert!(
            rx_b.try_recv().is_err(),
            "member of another room must not receive"
        );
    }

    #[tokio::test]
    async fn broadcast_to_closed_member_is_dropped() {
        let registry = SessionRegistry::new();
        let (conn, rx) = anonymous_conn();
        registry.join("chat_a", &conn).await;
        drop(rx);

        let delivered = registry
            .broadcast("chat_a", &json!({"type": "ping"}), None)
            .await;

        assert_eq!(delivered, 0, "closed queues count as missed deliveries");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = anonymous_conn();

        registry.join("chat_a", &conn).await;
        registry.join("user_x", &conn).await;

        let mut first = registry.disconnect(&conn).await;
        first.sort();
        assert_eq!(first, vec!["chat_a".to_string(), "user_x".to_string()]);
        assert_eq!(registry.room_size("chat_a").await, 0);

        let second = registry.disconnect(&conn).await;
        assert!(second.is_empty(), "second disconnect must be a no-op");
    }

    #[tokio::test]
    async fn begin_close_fires_once() {
        let (conn, _rx) = anonymous_conn();

        assert!(conn.begin_close());
        assert!(!conn.begin_close());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn handle_send_queues_encoded_frame() {
        let (conn, mut rx) = anonymous_conn();

        assert!(conn.send(&json!({"type": "connection_established"})));

        let frame = rx.try_recv().expect("frame should be queued");
        let event: Value = serde_json::from_str(&frame).expect("frame should be JSON");
        assert_eq!(event["type"], "connection_established");
    }

    #[tokio::test]
    async fn direct_send_waits_out_a_full_queue() {
        let (conn, mut rx) = anonymous_conn();

        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            assert!(conn.send(&json!({"type": "notification"})));
        }
        assert!(
            !conn.send(&json!({"type": "notification"})),
            "fan-out frames drop once the queue is full"
        );

        let writer = conn.clone();
        let reply = tokio::spawn(async move {
            writer.send_direct(&json!({"type": "message_sent"})).await
        });

        // Draining the backlog frees capacity for the waiting reply.
        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            rx.recv().await.expect("backlog frame");
        }
        assert!(reply.await.expect("send task"), "the reply must not be dropped");

        let frame = rx.recv().await.expect("reply frame");
        let event: Value = serde_json::from_str(&frame).expect("frame should be JSON");
        assert_eq!(event["type"], "message_sent");
    }

    #[tokio::test]
    async fn direct_send_to_closed_queue_reports_failure() {
        let (conn, rx) = anonymous_conn();
        drop(rx);

        assert!(!conn.send_direct(&json!({"type": "message_sent"})).await);
    }
}
