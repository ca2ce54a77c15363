use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::UserProfile;

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key).unwrap());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
            );
        }

        headers
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let (data, _) = self
            .request_inner(method, path, auth_token, body, false)
            .await?;
        Ok(data)
    }

    /// Like [`request`], but asks PostgREST for an exact row count and returns
    /// the total alongside the (possibly limited) result set.
    pub async fn request_with_count<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(T, u64)>
    where
        T: DeserializeOwned,
    {
        let (data, count) = self
            .request_inner(method, path, auth_token, body, true)
            .await?;
        Ok((data, count.unwrap_or(0)))
    }

    async fn request_inner<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        exact_count: bool,
    ) -> Result<(T, Option<u64>)>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let headers = self.get_headers(auth_token);

        let mut req = self.client.request(method.clone(), &url).headers(headers);

        // Writes must hand back the affected rows; reads may ask for a total.
        if matches!(method, Method::POST | Method::PATCH) {
            req = req.header("Prefer", "return=representation");
        }
        if exact_count {
            req = req.header("Prefer", "count=exact");
        }

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let total = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range);

        let data = response.json::<T>().await?;
        Ok((data, total))
    }

    /// Looks up a user by id in the `profiles` table. A missing row is not an
    /// error; callers treat it as an anonymous connection.
    pub async fn get_profile(
        &self,
        user_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<UserProfile>> {
        let path = format!("/rest/v1/profiles?id=eq.{}&limit=1", user_id);

        let rows: Vec<UserProfile> = self.request(Method::GET, &path, auth_token, None).await?;
        Ok(rows.into_iter().next())
    }
}

/// Extracts the total from a PostgREST `content-range` header (`0-19/57`).
fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}
