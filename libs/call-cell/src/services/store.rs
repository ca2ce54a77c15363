use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_models::UserProfile;

use crate::models::{CallRecord, CallStatus};

/// Store access for one call socket. Carries the connection's own bearer
/// token so row-level security applies to every call it makes.
#[derive(Clone)]
pub struct CallStore {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl CallStore {
    pub fn new(supabase: Arc<SupabaseClient>, auth_token: Option<String>) -> Self {
        Self {
            supabase,
            auth_token,
        }
    }

    fn token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub async fn lookup_callee(&self, callee_id: Uuid) -> Result<Option<UserProfile>> {
        self.supabase.get_profile(callee_id, self.token()).await
    }

    pub async fn create_call_record(
        &self,
        caller_id: Uuid,
        callee_id: Uuid,
    ) -> Result<Option<CallRecord>> {
        let body = json!({
            "caller_id": caller_id,
            "callee_id": callee_id,
            "status": CallStatus::Initiated.as_str(),
            "started_at": Utc::now(),
        });

        let rows: Vec<CallRecord> = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/call_records",
                self.token(),
                Some(body),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Guarded status transition. The filter lists the statuses the
    /// transition may start from, so a lost race (record already terminal,
    /// already answered) comes back as `None` instead of clobbering the row.
    /// The update is also pinned to the acting user being a participant of
    /// the record; a stranger's transition matches nothing even when no
    /// in-process binding is left to check against. Terminal transitions
    /// stamp `ended_at`.
    pub async fn update_call_status(
        &self,
        call_id: Uuid,
        actor_id: Uuid,
        to: CallStatus,
    ) -> Result<Option<CallRecord>> {
        let sources: Vec<&str> = CallStatus::allowed_sources(to)
            .iter()
            .map(CallStatus::as_str)
            .collect();
        let path = format!(
            "/rest/v1/call_records?id=eq.{}&or=(caller_id.eq.{},callee_id.eq.{})&status=in.({})",
            call_id,
            actor_id,
            actor_id,
            sources.join(",")
        );

        let mut body = json!({ "status": to.as_str() });
        if to.is_terminal() {
            body["ended_at"] = json!(Utc::now());
        }

        let rows: Vec<CallRecord> = self
            .supabase
            .request(Method::PATCH, &path, self.token(), Some(body))
            .await?;
        Ok(rows.into_iter().next())
    }
}
