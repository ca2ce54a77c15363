use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use chat_cell::PresenceBroadcaster;
use shared_models::UserProfile;
use shared_realtime::rooms;
use shared_realtime::{ConnectionHandle, SessionRegistry};

use crate::error::CallError;
use crate::models::{ActiveCall, CallServerEvent, CallStatus, InitiatedCall};
use crate::services::active_calls::ActiveCallRegistry;
use crate::services::store::CallStore;

/// Call lifecycle and negotiation relay for one connection.
///
/// Lifecycle events run against the persisted record and the active-call
/// registry; negotiation frames only touch the signaling room. Delivery
/// follows one rule: lifecycle outcomes go to the signaling room, and a
/// participant who is not in that room gets a direct copy.
#[derive(Clone)]
pub struct CallSignaling {
    store: CallStore,
    registry: SessionRegistry,
    active_calls: ActiveCallRegistry,
    notifier: PresenceBroadcaster,
}

impl CallSignaling {
    pub fn new(
        store: CallStore,
        registry: SessionRegistry,
        active_calls: ActiveCallRegistry,
        notifier: PresenceBroadcaster,
    ) -> Self {
        Self {
            store,
            registry,
            active_calls,
            notifier,
        }
    }

    /// Starts a call: persists the record, binds it to a fresh signaling
    /// room, joins the caller to that room and rings the callee's personal
    /// room with `incoming_call`.
    pub async fn initiate(
        &self,
        caller: &UserProfile,
        caller_conn: &ConnectionHandle,
        callee_id: &str,
    ) -> Result<InitiatedCall, CallError> {
        let callee_id = Uuid::parse_str(callee_id).map_err(|_| CallError::InvalidCallee)?;

        self.store
            .lookup_callee(callee_id)
            .await?
            .ok_or(CallError::CalleeNotFound)?;

        let record = self
            .store
            .create_call_record(caller.id, callee_id)
            .await?
            .ok_or_else(|| CallError::Database {
                message: "call record insert returned no row".to_string(),
            })?;

        let room_name = rooms::call_room(record.id);
        self.active_calls
            .insert(ActiveCall {
                call_id: record.id,
                room_name: room_name.clone(),
                caller_id: caller.id,
                callee_id,
                caller_conn: caller_conn.id(),
                callee_conn: None,
                status: record.status,
            })
            .await;
        self.registry.join(&room_name, caller_conn).await;

        let ringing = self
            .registry
            .broadcast(
                &rooms::user_room(callee_id),
                &CallServerEvent::IncomingCall {
                    call_id: record.id.to_string(),
                    room_name: room_name.clone(),
                    caller_id: caller.id.to_string(),
                    caller_name: caller.display_name().to_string(),
                },
                None,
            )
            .await;
        info!(call_id = %record.id, callee_id = %callee_id, ringing, "call initiated");

        // Offline callees still learn about the attempt the next time their
        // notification socket connects.
        self.notifier
            .push_notification(
                callee_id,
                "incoming_call",
                json!({
                    "call_id": record.id.to_string(),
                    "room_name": room_name.clone(),
                    "caller_id": caller.id.to_string(),
                    "caller_name": caller.display_name(),
                }),
            )
            .await;

        Ok(InitiatedCall {
            call_id: record.id,
            room_name,
        })
    }

    /// Accepts a ringing call. The callee's connection joins the signaling
    /// room before the broadcast so both parties see `call_accepted`.
    pub async fn accept(
        &self,
        accepter: &UserProfile,
        accepter_conn: &ConnectionHandle,
        call_id: &str,
        room_name: &str,
    ) -> Result<(), CallError> {
        let call_id = Uuid::parse_str(call_id).map_err(|_| CallError::InvalidCallId)?;
        let call = self
            .active_calls
            .get(call_id)
            .await
            .ok_or(CallError::CallNotFound)?;

        if call.callee_id != accepter.id {
            return Err(CallError::NotCallee);
        }
        if call.room_name != room_name {
            return Err(CallError::RoomMismatch);
        }
        if !call.status.can_transition_to(CallStatus::Answered) {
            return Err(CallError::InvalidTransition);
        }

        self.store
            .update_call_status(call_id, accepter.id, CallStatus::Answered)
            .await?
            .ok_or(CallError::InvalidTransition)?;

        self.active_calls
            .mark_answered(call_id, accepter_conn.id())
            .await;
        self.registry.join(&call.room_name, accepter_conn).await;

        self.registry
            .broadcast(
                &call.room_name,
                &CallServerEvent::CallAccepted {
                    call_id: call_id.to_string(),
                    accepter_id: accepter.id.to_string(),
                },
                None,
            )
            .await;
        info!(call_id = %call_id, "call accepted");
        Ok(())
    }

    /// Declines a ringing call. The rejecting callee never joined the
    /// signaling room, so the caller learns through the room broadcast and
    /// the callee through a direct copy.
    pub async fn reject(
        &self,
        rejecter: &UserProfile,
        rejecter_conn: &ConnectionHandle,
        call_id: &str,
        room_name: &str,
    ) -> Result<(), CallError> {
        let call_id = Uuid::parse_str(call_id).map_err(|_| CallError::InvalidCallId)?;
        let call = self
            .active_calls
            .get(call_id)
            .await
            .ok_or(CallError::CallNotFound)?;

        if call.callee_id != rejecter.id {
            return Err(CallError::NotCallee);
        }
        if call.room_name != room_name {
            return Err(CallError::RoomMismatch);
        }
        if !call.status.can_transition_to(CallStatus::Rejected) {
            return Err(CallError::InvalidTransition);
        }

        self.store
            .update_call_status(call_id, rejecter.id, CallStatus::Rejected)
            .await?
            .ok_or(CallError::InvalidTransition)?;

        self.active_calls.remove(call_id).await;

        let event = CallServerEvent::CallRejected {
            call_id: call_id.to_string(),
            rejected_by: rejecter.id.to_string(),
        };
        self.deliver(&call.room_name, &event, rejecter_conn).await;
        info!(call_id = %call_id, "call rejected");
        Ok(())
    }

    /// Ends a call from either side. The active binding may already be gone
    /// when a participant disconnected first; the stored record still moves
    /// to `ended` as long as its status admits the transition and the ender
    /// is one of its participants, so dropped calls can be closed out
    /// afterwards but not by a stranger who learned the call id.
    pub async fn end(
        &self,
        ender: &UserProfile,
        ender_conn: &ConnectionHandle,
        call_id: &str,
        room_name: &str,
    ) -> Result<(), CallError> {
        let call_id = Uuid::parse_str(call_id).map_err(|_| CallError::InvalidCallId)?;

        if let Some(call) = self.active_calls.get(call_id).await {
            if !call.is_participant(ender.id) {
                return Err(CallError::NotParticipant);
            }
            if call.room_name != room_name {
                return Err(CallError::RoomMismatch);
            }
        }

        self.store
            .update_call_status(call_id, ender.id, CallStatus::Ended)
            .await?
            .ok_or(CallError::CallNotFound)?;

        self.active_calls.remove(call_id).await;

        let event = CallServerEvent::CallEnded {
            call_id: call_id.to_string(),
            ended_by: ender.id.to_string(),
        };
        self.deliver(room_name, &event, ender_conn).await;
        info!(call_id = %call_id, ended_by = %ender.id, "call ended");
        Ok(())
    }

    /// Relays one negotiation frame to every other member of the signaling
    /// room. Returns how many peers it reached.
    pub async fn relay(
        &self,
        sender_conn: &ConnectionHandle,
        room_name: &str,
        event: &CallServerEvent,
    ) -> usize {
        self.registry
            .broadcast(room_name, event, Some(sender_conn.id()))
            .await
    }

    /// Disconnect cleanup, safe to call more than once per connection. Any
    /// active call the connection participated in loses its binding; the
    /// stored record keeps its status for the surviving side to end.
    pub async fn handle_disconnect(&self, conn: &ConnectionHandle) {
        if !conn.begin_close() {
            return;
        }
        self.registry.disconnect(conn).await;
        let dropped = self.active_calls.remove_by_connection(conn.id()).await;
        for call in &dropped {
            debug!(call_id = %call.call_id, connection_id = %conn.id(), "active call binding dropped with connection");
        }
    }

    /// Room broadcast without exclusion, plus a direct copy when the acting
    /// participant is not a room member.
    async fn deliver(&self, room_name: &str, event: &CallServerEvent, conn: &ConnectionHandle) {
        self.registry.broadcast(room_name, event, None).await;
        if !self.registry.is_member(room_name, conn.id()).await {
            conn.send_direct(event).await;
        }
    }
}
