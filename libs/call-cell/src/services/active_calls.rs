use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use shared_realtime::ConnectionId;

use crate::models::{ActiveCall, CallStatus};

/// Process-wide map of live call bindings, keyed by call record id.
///
/// A binding exists from `call_initiate` until the call reaches a terminal
/// state or a participant's connection drops. It is ephemeral bookkeeping;
/// the persisted record outlives it.
#[derive(Debug, Clone, Default)]
pub struct ActiveCallRegistry {
    inner: Arc<RwLock<HashMap<Uuid, ActiveCall>>>,
}

impl ActiveCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, call: ActiveCall) {
        self.inner.write().await.insert(call.call_id, call);
    }

    pub async fn get(&self, call_id: Uuid) -> Option<ActiveCall> {
        self.inner.read().await.get(&call_id).cloned()
    }

    /// Flips the binding to answered and records which connection the
    /// callee picked up on.
    pub async fn mark_answered(
        &self,
        call_id: Uuid,
        callee_conn: ConnectionId,
    ) -> Option<ActiveCall> {
        let mut inner = self.inner.write().await;
        let call = inner.get_mut(&call_id)?;
        call.status = CallStatus::Answered;
        call.callee_conn = Some(callee_conn);
        Some(call.clone())
    }

    pub async fn remove(&self, call_id: Uuid) -> Option<ActiveCall> {
        self.inner.write().await.remove(&call_id)
    }

    /// Drops every binding the connection participates in, as caller or
    /// callee, and returns them. The stored records are left untouched.
    pub async fn remove_by_connection(&self, conn_id: ConnectionId) -> Vec<ActiveCall> {
        let mut inner = self.inner.write().await;
        let ids: Vec<Uuid> = inner
            .values()
            .filter(|call| call.involves_connection(conn_id))
            .map(|call| call.call_id)
            .collect();
        ids.into_iter().filter_map(|id| inner.remove(&id)).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
