use assert_matches::assert_matches;
use serde_json::{json, Value};
use uuid::Uuid;

use call_cell::models::{CallClientEvent, CallRecord, CallServerEvent, CallStatus};
use shared_realtime::wire::{self, InboundError};
use shared_utils::test_utils::MockSupabaseResponses;

#[test]
fn test_signaling_transitions_are_legal() {
    assert!(CallStatus::Initiated.can_transition_to(CallStatus::Answered));
    assert!(CallStatus::Initiated.can_transition_to(CallStatus::Rejected));
    assert!(CallStatus::Initiated.can_transition_to(CallStatus::Ended));
    assert!(CallStatus::Ringing.can_transition_to(CallStatus::Answered));
    assert!(CallStatus::Ringing.can_transition_to(CallStatus::Rejected));
    assert!(CallStatus::Ringing.can_transition_to(CallStatus::Ended));
    assert!(CallStatus::Answered.can_transition_to(CallStatus::Ended));
}

#[test]
fn test_answered_call_cannot_be_rejected() {
    assert!(!CallStatus::Answered.can_transition_to(CallStatus::Rejected));
    assert!(!CallStatus::Answered.can_transition_to(CallStatus::Answered));
}

#[test]
fn test_terminal_states_admit_no_transitions() {
    for terminal in [CallStatus::Ended, CallStatus::Missed, CallStatus::Rejected] {
        assert!(terminal.is_terminal());
        for target in [CallStatus::Answered, CallStatus::Rejected, CallStatus::Ended] {
            assert!(
                !terminal.can_transition_to(target),
                "{:?} must not move to {:?}",
                terminal,
                target
            );
        }
    }
}

#[test]
fn test_allowed_sources_back_the_store_guard() {
    assert_eq!(
        CallStatus::allowed_sources(CallStatus::Answered),
        &[CallStatus::Initiated, CallStatus::Ringing]
    );
    assert_eq!(
        CallStatus::allowed_sources(CallStatus::Rejected),
        &[CallStatus::Initiated, CallStatus::Ringing]
    );
    assert_eq!(
        CallStatus::allowed_sources(CallStatus::Ended),
        &[
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::Answered
        ]
    );
    assert!(CallStatus::allowed_sources(CallStatus::Initiated).is_empty());
    assert!(CallStatus::allowed_sources(CallStatus::Missed).is_empty());
}

#[test]
fn test_status_serializes_snake_case() {
    assert_eq!(serde_json::to_value(CallStatus::Initiated).unwrap(), json!("initiated"));
    assert_eq!(serde_json::to_value(CallStatus::Answered).unwrap(), json!("answered"));
    let parsed: CallStatus = serde_json::from_value(json!("rejected")).unwrap();
    assert_eq!(parsed, CallStatus::Rejected);
}

#[test]
fn test_call_record_row_deserializes() {
    let call_id = Uuid::new_v4();
    let caller_id = Uuid::new_v4();
    let callee_id = Uuid::new_v4();
    let row = MockSupabaseResponses::call_record_response(call_id, caller_id, callee_id, "initiated");

    let record: CallRecord = serde_json::from_value(row).expect("canned row should deserialize");
    assert_eq!(record.id, call_id);
    assert_eq!(record.caller_id, caller_id);
    assert_eq!(record.callee_id, callee_id);
    assert_eq!(record.status, CallStatus::Initiated);
    assert!(record.started_at.is_some());
    assert!(record.ended_at.is_none());
}

#[test]
fn test_call_initiate_frame_parses() {
    let callee = Uuid::new_v4();
    let frame = format!(r#"{{"type": "call_initiate", "callee_id": "{}"}}"#, callee);

    let event =
        wire::decode::<CallClientEvent>(&frame, CallClientEvent::KNOWN_TYPES).expect("valid frame");
    assert_matches!(event, CallClientEvent::CallInitiate { callee_id } => {
        assert_eq!(callee_id, callee.to_string());
    });
}

#[test]
fn test_lifecycle_frames_require_call_and_room() {
    let err = wire::decode::<CallClientEvent>(
        r#"{"type": "call_accept", "call_id": "abc"}"#,
        CallClientEvent::KNOWN_TYPES,
    )
    .expect_err("missing room_name must fail");

    assert_eq!(err, InboundError::MalformedPayload("call_accept".to_string()));
    assert_eq!(err.to_string(), "Invalid call_accept payload");
}

#[test]
fn test_negotiation_payload_defaults_to_null() {
    let event = wire::decode::<CallClientEvent>(r#"{"type": "offer"}"#, CallClientEvent::KNOWN_TYPES)
        .expect("bare offer is valid");

    assert_matches!(event, CallClientEvent::Offer { payload } => {
        assert!(payload.is_null());
    });
}

#[test]
fn test_negotiation_payload_survives_decode() {
    let frame = r#"{"type": "ice_candidate", "payload": {"candidate": "candidate:1 1 UDP 2122252543 10.0.0.2 49152 typ host"}}"#;

    let event = wire::decode::<CallClientEvent>(frame, CallClientEvent::KNOWN_TYPES)
        .expect("candidate frame is valid");
    assert_matches!(event, CallClientEvent::IceCandidate { payload } => {
        assert_eq!(
            payload["candidate"],
            json!("candidate:1 1 UDP 2122252543 10.0.0.2 49152 typ host")
        );
    });
}

#[test]
fn test_unknown_frame_type_is_named_in_error() {
    let err = wire::decode::<CallClientEvent>(
        r#"{"type": "ring"}"#,
        CallClientEvent::KNOWN_TYPES,
    )
    .expect_err("unlisted type must fail");

    assert_eq!(err.to_string(), "Unknown message type: ring");
}

#[test]
fn test_server_events_use_snake_case_types() {
    let accepted = serde_json::to_value(CallServerEvent::CallAccepted {
        call_id: "c1".to_string(),
        accepter_id: "u2".to_string(),
    })
    .unwrap();
    assert_eq!(accepted["type"], json!("call_accepted"));
    assert_eq!(accepted["accepter_id"], json!("u2"));

    let candidate = serde_json::to_value(CallServerEvent::IceCandidate {
        payload: json!({"candidate": "candidate:1"}),
        sender_id: "u1".to_string(),
    })
    .unwrap();
    assert_eq!(candidate["type"], json!("ice_candidate"));
    assert_eq!(candidate["payload"]["candidate"], json!("candidate:1"));

    let error: Value = serde_json::to_value(CallServerEvent::error("No active call")).unwrap();
    assert_eq!(error["type"], json!("error"));
    assert_eq!(error["message"], json!("No active call"));
}
