use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use firewatch_core::{AuthError, Clock, ReqwestErrorExt, ScheduleConfig, SingleFlight};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

/// Tokens are refreshed this long before they actually expire.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 300;

/// Longest lifetime accepted from the token endpoint.
const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// OAuth client credentials for the scheduling API.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

impl From<&ScheduleConfig> for ClientCredentials {
    fn from(config: &ScheduleConfig) -> Self {
        Self::new(config.client_id.clone(), config.client_secret.clone())
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

/// A bearer token with its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
}

impl AccessToken {
    /// `margin` before `expires_at` the token stops being handed out.
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>, margin: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at,
            refresh_at: expires_at - margin,
        }
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.refresh_at
    }

    /// Usable strictly before `expires_at - margin`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: i64,
}

struct TokenState {
    http: Client,
    token_url: String,
    credentials: ClientCredentials,
    clock: Arc<dyn Clock>,
    margin: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenState {
    fn usable(&self) -> Option<AccessToken> {
        let now = self.clock.now();
        self.cached
            .lock()
            .as_ref()
            .filter(|token| token.is_usable(now))
            .cloned()
    }

    #[instrument(skip(self), fields(client_id = %self.credentials.client_id), level = "info")]
    async fn exchange(&self) -> Result<AccessToken, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.into_network_error()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Network(e.into_network_error()))?;

        if !status.is_success() {
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body.trim().to_string()
            };
            tracing::error!(status = status.as_u16(), "token exchange failed");
            return Err(AuthError::ExchangeFailed {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if let Some(kind) = parsed.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                tracing::warn!(token_type = kind, "unexpected token type");
            }
        }

        let expires_in = parsed.expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS);
        if expires_in != parsed.expires_in {
            tracing::warn!(
                expires_in = parsed.expires_in,
                clamped = expires_in,
                "token lifetime out of range"
            );
        }
        let expires_at = self.clock.now() + Duration::seconds(expires_in);
        let token = AccessToken::new(parsed.access_token, expires_at, self.margin);
        if expires_in <= self.margin.num_seconds() {
            tracing::warn!(
                expires_in,
                "token lifetime is within the safety margin; it will not be reused"
            );
        }

        *self.cached.lock() = Some(token.clone());
        tracing::info!(expires_at = %token.expires_at, "obtained scheduling access token");
        Ok(token)
    }
}

/// Keeps one valid access token for the scheduling API.
///
/// Clones share the cached token and any in-flight exchange.
#[derive(Clone)]
pub struct TokenManager {
    state: Arc<TokenState>,
    refresh: Arc<SingleFlight<Result<AccessToken, AuthError>>>,
}

impl TokenManager {
    pub fn new(
        http: Client,
        base_url: &str,
        credentials: ClientCredentials,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        Self::with_safety_margin(
            http,
            base_url,
            credentials,
            clock,
            Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
        )
    }

    pub fn with_safety_margin(
        http: Client,
        base_url: &str,
        credentials: ClientCredentials,
        clock: Arc<dyn Clock>,
        margin: Duration,
    ) -> Result<Self, AuthError> {
        if !credentials.is_complete() {
            tracing::error!("scheduling client credentials are missing");
            return Err(AuthError::MissingCredentials);
        }

        Ok(Self {
            state: Arc::new(TokenState {
                http,
                token_url: format!("{}/oauth/access_token", base_url.trim_end_matches('/')),
                credentials,
                clock,
                margin,
                cached: Mutex::new(None),
            }),
            refresh: Arc::new(SingleFlight::new()),
        })
    }

    /// Build from the `[schedule]` config section.
    pub fn from_config(
        http: Client,
        config: &ScheduleConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        Self::with_safety_margin(
            http,
            &config.base_url,
            ClientCredentials::from(config),
            clock,
            config.safety_margin(),
        )
    }

    /// A token that is good for at least the safety margin, exchanging
    /// credentials first when needed.
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        if let Some(token) = self.state.usable() {
            tracing::debug!("reusing cached access token");
            return Ok(token.token);
        }

        let state = self.state.clone();
        let token = self
            .refresh
            .run(move || async move {
                // Someone else may have refreshed while we were deciding to
                if let Some(token) = state.usable() {
                    return Ok(token);
                }
                state.exchange().await
            })
            .await?;

        Ok(token.token)
    }

    /// Drop the cached token; the next call exchanges credentials again.
    pub fn invalidate(&self) {
        if self.state.cached.lock().take().is_some() {
            tracing::debug!("access token invalidated");
        }
    }

    /// Drop the cached token only if it is the one a server just rejected.
    ///
    /// A token another caller already refreshed is left alone.
    pub fn invalidate_if(&self, rejected: &str) -> bool {
        let mut cached = self.state.cached.lock();
        if cached.as_ref().is_some_and(|token| token.secret() == rejected) {
            *cached = None;
            tracing::debug!("rejected access token invalidated");
            true
        } else {
            false
        }
    }

    /// Seed the cache with a previously obtained token.
    pub fn prime(&self, token: AccessToken) {
        *self.state.cached.lock() = Some(token);
    }

    pub fn cached_token(&self) -> Option<AccessToken> {
        self.state.cached.lock().clone()
    }

    pub fn safety_margin(&self) -> Duration {
        self.state.margin
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.state.token_url)
            .field("credentials", &self.state.credentials)
            .field("cached", &self.state.cached.lock().is_some())
            .finish()
    }
}
