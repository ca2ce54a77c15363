use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use axum::http::HeaderMap;
use futures::stream::SplitSink;
use futures::SinkExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_models::auth::Identity;
use shared_utils::jwt::validate_token;

// Close codes used before any room is joined.
pub const CLOSE_MALFORMED_SCOPE: u16 = 4000;
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;
pub const CLOSE_FORBIDDEN: u16 = 4003;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

const TOKEN_SUBPROTOCOL_PREFIX: &str = "access_token.";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("identity lookup failed: {0}")]
    Store(#[from] anyhow::Error),
}

/// Bearer credential pulled off the upgrade request.
#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub token: String,
    /// Subprotocol entry to echo back when the token rode in on one; browser
    /// clients drop the connection if the server selects none.
    pub echo_protocol: Option<String>,
}

/// Token sources in priority order: `?token=` query parameter, then an
/// `access_token.<token>` subprotocol entry, then an Authorization header.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<ResolvedToken> {
    if let Some(token) = query_token.filter(|token| !token.is_empty()) {
        return Some(ResolvedToken {
            token: token.to_string(),
            echo_protocol: None,
        });
    }

    for value in headers.get_all(SEC_WEBSOCKET_PROTOCOL) {
        let Ok(list) = value.to_str() else { continue };
        for entry in list.split(',').map(str::trim) {
            if let Some(token) = entry.strip_prefix(TOKEN_SUBPROTOCOL_PREFIX) {
                if !token.is_empty() {
                    return Some(ResolvedToken {
                        token: token.to_string(),
                        echo_protocol: Some(entry.to_string()),
                    });
                }
            }
        }
    }

    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())?;

    Some(ResolvedToken {
        token: header_token.to_string(),
        echo_protocol: None,
    })
}

/// Resolves the connection identity. Invalid or expired tokens and unknown
/// subjects degrade to anonymous; only a store failure is fatal to the
/// connect.
pub async fn resolve_identity(
    supabase: &SupabaseClient,
    jwt_secret: &str,
    token: Option<&ResolvedToken>,
) -> Result<Identity, GatewayError> {
    let Some(resolved) = token else {
        return Ok(Identity::Anonymous);
    };

    let claims = match validate_token(&resolved.token, jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            debug!("Token rejected: {}", e);
            return Ok(Identity::Anonymous);
        }
    };

    let subject = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => {
            debug!("Token subject is not a UUID: {}", claims.sub);
            return Ok(Identity::Anonymous);
        }
    };

    match supabase.get_profile(subject, Some(&resolved.token)).await? {
        Some(profile) => Ok(Identity::User(profile)),
        None => {
            debug!(user_id = %subject, "no profile row for token subject, treating as anonymous");
            Ok(Identity::Anonymous)
        }
    }
}

/// Spawns the task draining a connection's outbound queue into the socket's
/// sending half. The pump runs on its own task so a handler waiting for
/// queue capacity never blocks delivery; the socket task aborts the pump
/// after disconnect cleanup.
pub fn spawn_outbound_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    })
}

/// Closes the socket with a gateway code. Send errors are ignored; the peer
/// may already be gone.
pub async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!("close frame not delivered: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;
    use shared_config::AppConfig;
    use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn query_token_wins_over_headers() {
        let mut headers = bearer_headers("header-token");
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("access_token.proto-token"),
        );

        let resolved = extract_token(Some("query-token"), &headers).expect("token expected");
        assert_eq!(resolved.token, "query-token");
        assert!(resolved.echo_protocol.is_none());
    }

    #[test]
    fn subprotocol_token_wins_over_authorization_header() {
        let mut headers = bearer_headers("header-token");
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("chat-v1, access_token.proto-token"),
        );

        let resolved = extract_token(None, &headers).expect("token expected");
        assert_eq!(resolved.token, "proto-token");
        assert_eq!(
            resolved.echo_protocol.as_deref(),
            Some("access_token.proto-token"),
            "the matched subprotocol entry must be echoed back"
        );
    }

    #[test]
    fn authorization_header_is_the_fallback() {
        let headers = bearer_headers("header-token");

        let resolved = extract_token(None, &headers).expect("token expected");
        assert_eq!(resolved.token, "header-token");
        assert!(resolved.echo_protocol.is_none());
    }

    #[test]
    fn no_sources_means_no_token() {
        assert!(extract_token(None, &HeaderMap::new()).is_none());
        assert!(extract_token(Some(""), &HeaderMap::new()).is_none());
    }

    fn supabase_for(mock_server: &MockServer) -> SupabaseClient {
        let test_config = TestConfig::default();
        let config = AppConfig {
            supabase_url: mock_server.uri(),
            supabase_anon_key: test_config.supabase_anon_key.clone(),
            supabase_jwt_secret: test_config.jwt_secret.clone(),
        };
        SupabaseClient::new(&config)
    }

    #[tokio::test]
    async fn valid_token_resolves_to_user_identity() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::default();
        let user = TestUser::patient("alice@example.com");

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", format!("eq.{}", user.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::profile_response(&user)
            ])))
            .mount(&mock_server)
            .await;

        let supabase = supabase_for(&mock_server);
        let token = ResolvedToken {
            token: JwtTestUtils::create_test_token(&user, &config.jwt_secret, None),
            echo_protocol: None,
        };

        let identity = resolve_identity(&supabase, &config.jwt_secret, Some(&token))
            .await
            .expect("resolve should succeed");

        let profile = identity.user().expect("identity should be authenticated");
        assert_eq!(profile.id, user.id);
        assert_eq!(profile.username, user.username);
    }

    #[tokio::test]
    async fn invalid_token_degrades_to_anonymous() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::default();
        let supabase = supabase_for(&mock_server);

        let token = ResolvedToken {
            token: JwtTestUtils::create_malformed_token(),
            echo_protocol: None,
        };

        let identity = resolve_identity(&supabase, &config.jwt_secret, Some(&token))
            .await
            .expect("resolve should succeed");
        assert!(!identity.is_authenticated());
    }

    #[tokio::test]
    async fn missing_profile_degrades_to_anonymous() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::default();
        let user = TestUser::default();

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let supabase = supabase_for(&mock_server);
        let token = ResolvedToken {
            token: JwtTestUtils::create_test_token(&user, &config.jwt_secret, None),
            echo_protocol: None,
        };

        let identity = resolve_identity(&supabase, &config.jwt_secret, Some(&token))
            .await
            .expect("resolve should succeed");
        assert!(!identity.is_authenticated());
    }

    #[tokio::test]
    async fn store_failure_is_fatal() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::default();
        let user = TestUser::default();

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .mount(&mock_server)
            .await;

        let supabase = supabase_for(&mock_server);
        let token = ResolvedToken {
            token: JwtTestUtils::create_test_token(&user, &config.jwt_secret, None),
            echo_protocol: None,
        };

        let result = resolve_identity(&supabase, &config.jwt_secret, Some(&token)).await;
        assert!(result.is_err(), "store failures must not degrade to anonymous");
    }
}
