use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by a Supabase-issued access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// A user row from the store's `profiles` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Name shown to other participants (falls back to the username).
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.username)
    }
}

/// The identity attached to a WebSocket connection after token resolution.
///
/// A connection is anonymous when no token was presented, the token failed
/// validation, or the subject has no profile row.
#[derive(Debug, Clone)]
pub enum Identity {
    User(UserProfile),
    Anonymous,
}

impl Identity {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Identity::User(profile) => Some(profile),
            Identity::Anonymous => None,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user().map(|profile| profile.id)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::User(_))
    }
}
