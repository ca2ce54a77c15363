use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use chat_cell::WireUser;
use shared_realtime::ConnectionId;

/// Lifecycle state of a call record.
///
/// Signaling drives `initiated -> answered -> ended` plus the early exits
/// `rejected` and `ended`-before-answer. `ringing` and `missed` exist for
/// delivery tracking outside the socket protocol; `ringing` admits the same
/// transitions as `initiated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Ended,
    Missed,
    Rejected,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Missed | CallStatus::Rejected)
    }

    pub fn can_transition_to(&self, to: CallStatus) -> bool {
        CallStatus::allowed_sources(to).contains(self)
    }

    /// Statuses a transition into `to` may legally start from. The store
    /// uses this as the guard filter on conditional updates so a lost race
    /// surfaces as zero matched rows rather than a clobbered terminal state.
    pub fn allowed_sources(to: CallStatus) -> &'static [CallStatus] {
        match to {
            CallStatus::Answered | CallStatus::Rejected => {
                &[CallStatus::Initiated, CallStatus::Ringing]
            }
            CallStatus::Ended => {
                &[CallStatus::Initiated, CallStatus::Ringing, CallStatus::Answered]
            }
            _ => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Ended => "ended",
            CallStatus::Missed => "missed",
            CallStatus::Rejected => "rejected",
        }
    }
}

/// Persisted call row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub caller_id: Uuid,
    pub callee_id: Uuid,
    pub status: CallStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// In-memory binding of a live call to its signaling room and participant
/// connections. Dropping a binding never touches the stored [`CallRecord`].
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_id: Uuid,
    pub room_name: String,
    pub caller_id: Uuid,
    pub callee_id: Uuid,
    pub caller_conn: ConnectionId,
    pub callee_conn: Option<ConnectionId>,
    pub status: CallStatus,
}

impl ActiveCall {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    pub fn involves_connection(&self, conn_id: ConnectionId) -> bool {
        self.caller_conn == conn_id || self.callee_conn == Some(conn_id)
    }
}

/// What a successful `call_initiate` hands back to the connection task: the
/// reply for the caller plus the room to track as the connection's active
/// call.
#[derive(Debug, Clone)]
pub struct InitiatedCall {
    pub call_id: Uuid,
    pub room_name: String,
}

/// Client-to-server frames on the call socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallClientEvent {
    CallInitiate {
        callee_id: String,
    },
    CallAccept {
        call_id: String,
        room_name: String,
    },
    CallReject {
        call_id: String,
        room_name: String,
    },
    CallEnd {
        call_id: String,
        room_name: String,
    },
    Offer {
        #[serde(default)]
        payload: Value,
    },
    Answer {
        #[serde(default)]
        payload: Value,
    },
    IceCandidate {
        #[serde(default)]
        payload: Value,
    },
}

impl CallClientEvent {
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "call_initiate",
        "call_accept",
        "call_reject",
        "call_end",
        "offer",
        "answer",
        "ice_candidate",
    ];
}

/// Server-to-client frames on the call socket.
///
/// Negotiation frames (`offer`, `answer`, `ice_candidate`) carry the client
/// payload untouched, tagged with the sending peer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallServerEvent {
    ConnectionEstablished {
        user: WireUser,
    },
    CallInitiated {
        call_id: String,
        room_name: String,
    },
    IncomingCall {
        call_id: String,
        room_name: String,
        caller_id: String,
        caller_name: String,
    },
    CallAccepted {
        call_id: String,
        accepter_id: String,
    },
    CallRejected {
        call_id: String,
        rejected_by: String,
    },
    CallEnded {
        call_id: String,
        ended_by: String,
    },
    Offer {
        payload: Value,
        sender_id: String,
    },
    Answer {
        payload: Value,
        sender_id: String,
    },
    IceCandidate {
        payload: Value,
        sender_id: String,
    },
    Error {
        message: String,
    },
}

impl CallServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        CallServerEvent::Error {
            message: message.into(),
        }
    }
}
