use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::UserProfile;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            username: "testuser".to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        let username = email.split('@').next().unwrap_or("testuser").to_string();
        Self {
            id: Uuid::new_v4(),
            username,
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            full_name: Some(format!("Test {}", self.username)),
            role: Some(self.role.clone()),
            avatar_url: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id.to_string(),
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows matching the store tables the realtime layer reads.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn profile_response(user: &TestUser) -> serde_json::Value {
        json!({
            "id": user.id,
            "username": user.username,
            "full_name": format!("Test {}", user.username),
            "role": user.role,
            "avatar_url": null,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn conversation_response(
        conversation_id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
    ) -> serde_json::Value {
        json!({
            "id": conversation_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn message_response(
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "conversation_id": conversation_id,
            "sender_id": sender_id,
            "receiver_id": receiver_id,
            "content": content,
            "status": "sent",
            "is_edited": false,
            "is_deleted": false,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn notification_response(user_id: Uuid, notification_type: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "user_id": user_id,
            "notification_type": notification_type,
            "payload": {},
            "is_read": false,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn call_record_response(
        call_id: Uuid,
        caller_id: Uuid,
        callee_id: Uuid,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": call_id,
            "caller_id": caller_id,
            "callee_id": callee_id,
            "status": status,
            "started_at": "2024-01-01T00:00:00Z",
            "ended_at": null,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "error": {
                "message": message,
                "code": code
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
    }

    #[test]
    fn test_user_profile_conversion() {
        let user = TestUser::doctor("doc@example.com");
        assert_eq!(user.username, "doc");
        assert_eq!(user.role, "doctor");

        let profile = user.to_profile();
        assert_eq!(profile.id, user.id);
        assert_eq!(profile.username, user.username);
        assert_eq!(profile.role, Some(user.role.clone()));
    }

    #[test]
    fn test_jwt_token_creation() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_test_token(&user, "test-secret", Some(1));

        assert!(token.contains('.'));
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn test_profile_response_matches_model() {
        let user = TestUser::default();
        let row = MockSupabaseResponses::profile_response(&user);

        let profile: UserProfile =
            serde_json::from_value(row).expect("canned row should deserialize");
        assert_eq!(profile.id, user.id);
    }
}
