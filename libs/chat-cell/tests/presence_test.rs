use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chat_cell::error::ChatError;
use chat_cell::services::{ChatStore, PresenceBroadcaster};
use shared_database::SupabaseClient;
use shared_models::auth::Identity;
use shared_realtime::rooms;
use shared_realtime::{ConnectionHandle, SessionRegistry};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig, TestUser};

fn presence(mock_server: &MockServer, registry: &SessionRegistry) -> PresenceBroadcaster {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = mock_server.uri();
    let store = ChatStore::new(Arc::new(SupabaseClient::new(&config)), None);
    PresenceBroadcaster::new(store, registry.clone())
}

fn next_event(rx: &mut mpsc::Receiver<String>) -> Value {
    let frame = rx.try_recv().expect("a frame should be queued");
    serde_json::from_str(&frame).expect("frame should be JSON")
}

#[tokio::test]
async fn test_online_announcement_excludes_origin() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    let user = TestUser::patient("alice@example.com");
    let profile = user.to_profile();
    let room = "chat_test";

    let (origin, mut origin_rx) = ConnectionHandle::new(Identity::User(profile.clone()));
    let (peer, mut peer_rx) = ConnectionHandle::new(Identity::Anonymous);
    registry.join(room, &origin).await;
    registry.join(room, &peer).await;

    presence.announce_online(room, &profile, &origin).await;

    let event = next_event(&mut peer_rx);
    assert_eq!(event["type"], json!("user_status_changed"));
    assert_eq!(event["status"], json!("online"));
    assert_eq!(event["user_id"], json!(user.id.to_string()));
    assert_eq!(event["username"], json!("alice"));
    assert!(
        origin_rx.try_recv().is_err(),
        "the connecting user must not see their own online transition"
    );
}

#[tokio::test]
async fn test_typing_indicator_reaches_peers_only() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    let user = TestUser::doctor("bob@example.com");
    let profile = user.to_profile();
    let room = "chat_test";

    let (origin, mut origin_rx) = ConnectionHandle::new(Identity::User(profile.clone()));
    let (peer, mut peer_rx) = ConnectionHandle::new(Identity::Anonymous);
    registry.join(room, &origin).await;
    registry.join(room, &peer).await;

    presence.broadcast_typing(room, &profile, &origin, true).await;

    let event = next_event(&mut peer_rx);
    assert_eq!(event["type"], json!("typing_indicator"));
    assert_eq!(event["is_typing"], json!(true));
    assert_eq!(event["username"], json!("bob"));
    assert!(origin_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_flush_unread_sends_batch_with_total_count() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    let user = TestUser::patient("alice@example.com");
    let rows = vec![
        MockSupabaseResponses::notification_response(user.id, "new_message"),
        MockSupabaseResponses::notification_response(user.id, "incoming_call"),
    ];

    Mock::given(method("GET"))
        .and(path("/rest/v1/notifications"))
        .and(query_param("user_id", format!("eq.{}", user.id)))
        .and(query_param("is_read", "eq.false"))
        .and(query_param("limit", "20"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-range", "0-1/5")
                .set_body_json(rows),
        )
        .mount(&mock_server)
        .await;

    let profile = user.to_profile();
    let (conn, mut rx) = ConnectionHandle::new(Identity::User(profile.clone()));

    presence
        .flush_unread(&profile, &conn)
        .await
        .expect("flush should succeed");

    let event = next_event(&mut rx);
    assert_eq!(event["type"], json!("notifications_batch"));
    assert_eq!(event["unread_count"], json!(5));
    assert_eq!(event["notifications"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_flush_unread_sends_empty_batch() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    Mock::given(method("GET"))
        .and(path("/rest/v1/notifications"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-range", "*/0")
                .set_body_json(json!([])),
        )
        .mount(&mock_server)
        .await;

    let user = TestUser::patient("alice@example.com");
    let profile = user.to_profile();
    let (conn, mut rx) = ConnectionHandle::new(Identity::User(profile.clone()));

    presence
        .flush_unread(&profile, &conn)
        .await
        .expect("flush should succeed");

    let event = next_event(&mut rx);
    assert_eq!(event["type"], json!("notifications_batch"));
    assert_eq!(event["unread_count"], json!(0));
    assert_eq!(event["notifications"], json!([]));
}

#[tokio::test]
async fn test_flush_unread_propagates_store_failure() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    Mock::given(method("GET"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let user = TestUser::patient("alice@example.com");
    let profile = user.to_profile();
    let (conn, mut rx) = ConnectionHandle::new(Identity::User(profile.clone()));

    let result = presence.flush_unread(&profile, &conn).await;

    assert_matches!(result, Err(ChatError::Database { .. }));
    assert!(rx.try_recv().is_err(), "no partial batch may be sent");
}

#[tokio::test]
async fn test_push_notification_reaches_personal_room() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);
    let user = TestUser::doctor("bob@example.com");

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![
            MockSupabaseResponses::notification_response(user.id, "new_message"),
        ]))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/notifications"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-range", "0-0/7")
                .set_body_json(json!([])),
        )
        .mount(&mock_server)
        .await;

    let (listener, mut listener_rx) = ConnectionHandle::new(Identity::User(user.to_profile()));
    registry.join(&rooms::user_room(user.id), &listener).await;

    presence
        .push_notification(user.id, "new_message", json!({"message_id": "m1"}))
        .await;

    let event = next_event(&mut listener_rx);
    assert_eq!(event["type"], json!("notification"));
    assert_eq!(event["unread_count"], json!(7));
    assert_eq!(
        event["notification"]["notification_type"],
        json!("new_message")
    );
}

#[tokio::test]
async fn test_push_notification_swallows_store_failure() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);
    let user = TestUser::doctor("bob@example.com");

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let (listener, mut listener_rx) = ConnectionHandle::new(Identity::User(user.to_profile()));
    registry.join(&rooms::user_room(user.id), &listener).await;

    // Must not panic and must not deliver anything.
    presence
        .push_notification(user.id, "new_message", json!({}))
        .await;

    assert!(listener_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_mark_notification_read_replies_with_updated_count() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);
    let user = TestUser::patient("alice@example.com");
    let notification_id = Uuid::new_v4();

    let mut row = MockSupabaseResponses::notification_response(user.id, "new_message");
    row["id"] = json!(notification_id);
    row["is_read"] = json!(true);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/notifications"))
        .and(query_param("id", format!("eq.{}", notification_id)))
        .and(query_param("user_id", format!("eq.{}", user.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![row]))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/notifications"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-range", "0-0/4")
                .set_body_json(json!([])),
        )
        .mount(&mock_server)
        .await;

    let profile = user.to_profile();
    let reply = presence
        .mark_notification_read(&profile, &notification_id.to_string())
        .await
        .expect("mark read should succeed");

    let value = serde_json::to_value(&reply).expect("reply should serialize");
    assert_eq!(value["type"], json!("notification_read"));
    assert_eq!(value["notification_id"], json!(notification_id.to_string()));
    assert_eq!(value["unread_count"], json!(4));
}

#[tokio::test]
async fn test_mark_notification_read_rejects_foreign_row() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let user = TestUser::patient("alice@example.com");
    let profile = user.to_profile();

    let result = presence
        .mark_notification_read(&profile, &Uuid::new_v4().to_string())
        .await;

    assert_matches!(result, Err(ChatError::NotificationNotFound));
}

#[tokio::test]
async fn test_mark_notification_read_rejects_malformed_id() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    let user = TestUser::patient("alice@example.com");
    let profile = user.to_profile();

    let result = presence.mark_notification_read(&profile, "nope").await;

    assert_matches!(result, Err(ChatError::InvalidNotificationId));
}

#[tokio::test]
async fn test_disconnect_announces_offline_exactly_once() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    let user = TestUser::patient("alice@example.com");
    let profile = user.to_profile();
    let room = "chat_test";

    let (conn, _conn_rx) = ConnectionHandle::new(Identity::User(profile.clone()));
    let (peer, mut peer_rx) = ConnectionHandle::new(Identity::Anonymous);
    registry.join(room, &conn).await;
    registry.join(room, &peer).await;

    presence
        .handle_disconnect(&conn, Some((room, &profile)))
        .await;
    presence
        .handle_disconnect(&conn, Some((room, &profile)))
        .await;

    let event = next_event(&mut peer_rx);
    assert_eq!(event["type"], json!("user_status_changed"));
    assert_eq!(event["status"], json!("offline"));
    assert!(
        peer_rx.try_recv().is_err(),
        "a double disconnect must not produce a second offline broadcast"
    );
    assert!(!registry.is_member(room, conn.id()).await);
}

#[tokio::test]
async fn test_disconnect_without_announce_stays_silent() {
    let mock_server = MockServer::start().await;
    let registry = SessionRegistry::new();
    let presence = presence(&mock_server, &registry);

    let (conn, _conn_rx) = ConnectionHandle::new(Identity::Anonymous);
    let (peer, mut peer_rx) = ConnectionHandle::new(Identity::Anonymous);
    registry.join("chat_test", &conn).await;
    registry.join("chat_test", &peer).await;

    presence.handle_disconnect(&conn, None).await;

    assert!(peer_rx.try_recv().is_err());
    assert!(!registry.is_member("chat_test", conn.id()).await);
}
