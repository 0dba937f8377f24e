//! Crew scheduling API client.

use chrono::NaiveDate;
use firewatch_auth::TokenManager;
use firewatch_core::{ApiError, AuthError, ReqwestErrorExt, ScheduleConfig};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::error::ScheduleError;
use crate::types::{ScheduleResponse, User, WorkType};

/// Per-request knobs for [`ScheduleClient::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            query: Vec::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

/// Filters for `GET /v1/schedule`. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub user_id: Option<String>,
}

impl ScheduleQuery {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            user_id: None,
        }
    }

    fn into_options(self) -> RequestOptions {
        let mut options = RequestOptions::default();
        if let Some(start) = self.start {
            options = options.query("start", start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = self.end {
            options = options.query("end", end.format("%Y-%m-%d").to_string());
        }
        if let Some(user_id) = self.user_id {
            options = options.query("user_id", user_id);
        }
        options
    }
}

pub struct ScheduleClient {
    client: Client,
    base_url: String,
    tokens: TokenManager,
}

impl ScheduleClient {
    pub fn new(client: Client, base_url: &str, tokens: TokenManager) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn from_config(client: Client, config: &ScheduleConfig, tokens: TokenManager) -> Self {
        Self::new(client, &config.base_url, tokens)
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Authenticated request to `endpoint` (a path such as `/v1/users`).
    ///
    /// A 401 invalidates the token and the request is retried exactly once
    /// with a fresh one. Nothing else is retried.
    #[instrument(skip(self, options), fields(method = %options.method), level = "info")]
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, ScheduleError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut reauthenticated = false;

        loop {
            let token = self.tokens.get_valid_token().await?;

            let mut builder = self
                .client
                .request(options.method.clone(), &url)
                .bearer_auth(&token)
                .header("Content-Type", "application/json");
            if !options.query.is_empty() {
                builder = builder.query(&options.query);
            }
            if let Some(body) = &options.body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| ScheduleError::Network(e.into_network_error()))?;

            if response.status() == StatusCode::UNAUTHORIZED {
                if reauthenticated {
                    tracing::error!("still unauthorized after re-authenticating");
                    return Err(AuthError::Unauthorized.into());
                }
                tracing::info!("request unauthorized, refreshing token and retrying once");
                self.tokens.invalidate_if(&token);
                reauthenticated = true;
                continue;
            }

            return self.handle_response(response).await;
        }
    }

    /// Roster for the requested range, or everything the service returns.
    pub async fn get_schedule(&self, query: ScheduleQuery) -> Result<ScheduleResponse, ScheduleError> {
        self.request("/v1/schedule", query.into_options()).await
    }

    pub async fn get_users(&self) -> Result<Vec<User>, ScheduleError> {
        self.request("/v1/users", RequestOptions::default()).await
    }

    pub async fn get_work_types(&self) -> Result<Vec<WorkType>, ScheduleError> {
        self.request("/v1/work_types", RequestOptions::default()).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ScheduleError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScheduleError::Network(e.into_network_error()))?;

        if !status.is_success() {
            let message = error_message(&body);
            tracing::warn!(status = status.as_u16(), message = ?message, "scheduling API error");
            return Err(ApiError::new(status.as_u16(), message).into());
        }

        serde_json::from_str(&body).map_err(|e| ScheduleError::Parse(e.to_string()))
    }
}

/// `message`, else `error`, from a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"].iter().find_map(|field| match value.get(*field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Null => None,
        other if !other.is_string() => Some(other.to_string()),
        _ => None,
    })
}
