//! Centralized error types for Firewatch.
//!
//! Per-station weather failures stop at the provider and become
//! `StationReading::Unavailable`. Cache, auth and API failures bubble up to
//! the presentation boundary unchanged, where `user_message()` gives a
//! UI-appropriate string.
//!
//! Errors that can be shared by every waiter of a single-flight operation are
//! `Clone`, so they carry rendered strings rather than source errors.

use thiserror::Error;

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out. Please try again.",
            NetworkError::InvalidResponse(_) => {
                "Received an unexpected response. Please try again."
            }
        }
    }
}

/// Scheduling API credential errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Client credentials are not configured")]
    MissingCredentials,

    #[error("Credential exchange failed: {status} - {message}")]
    ExchangeFailed { status: u16, message: String },

    #[error("Credential exchange failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Request still unauthorized after re-authenticating")]
    Unauthorized,
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => {
                "Scheduling credentials are missing. Check your settings."
            }
            AuthError::ExchangeFailed { .. } | AuthError::InvalidResponse(_) => {
                "Could not sign in to the scheduling service."
            }
            AuthError::Network(e) => e.user_message(),
            AuthError::Unauthorized => "The scheduling service rejected our credentials.",
        }
    }
}

/// A non-2xx API response that was not resolved by re-authenticating.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "API request failed: {status}{}",
    .message.as_deref().map(|m| format!(" - {m}")).unwrap_or_default()
)]
pub struct ApiError {
    pub status: u16,
    pub message: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, message: Option<String>) -> Self {
        Self { status, message }
    }

    pub fn user_message(&self) -> &'static str {
        match self.status {
            403 => "You don't have permission to access this resource.",
            404 => "The requested data was not found.",
            429 => "Too many requests. Please wait and try again.",
            s if s >= 500 => "The service is experiencing issues. Please try again later.",
            _ => "The request failed. Please try again.",
        }
    }
}

/// A single station's weather fetch failed.
///
/// Never surfaces past the weather provider; it is logged and the station is
/// reported as unavailable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderFetchError {
    #[error("Weather API key is not configured")]
    MissingApiKey,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Weather API returned status {0}")]
    Status(u16),

    #[error("Malformed weather response: {0}")]
    Parse(String),

    #[error("Weather API returned no readings")]
    NoData,
}

/// Shared document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Document serialization error: {0}")]
    Serialization(String),

    #[error("Invalid document key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// The weather cache could not produce a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheReadError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheReadError {
    pub fn user_message(&self) -> &'static str {
        match self {
            CacheReadError::Store(_) => "Weather data is unavailable right now.",
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_decode() || self.is_body() {
            NetworkError::InvalidResponse(self.to_string())
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_converts_into_auth_error() {
        let err: AuthError = NetworkError::Timeout.into();
        assert_eq!(err, AuthError::Network(NetworkError::Timeout));
    }

    #[test]
    fn test_user_message_propagation() {
        let err = AuthError::Network(NetworkError::Timeout);
        assert_eq!(err.user_message(), "The request timed out. Please try again.");
    }

    #[test]
    fn test_api_error_display_with_and_without_message() {
        let err = ApiError::new(500, Some("database down".into()));
        assert_eq!(err.to_string(), "API request failed: 500 - database down");

        let err = ApiError::new(403, None);
        assert_eq!(err.to_string(), "API request failed: 403");
    }

    #[test]
    fn test_api_error_user_message_by_status() {
        assert!(ApiError::new(503, None).user_message().contains("issues"));
        assert!(ApiError::new(403, None).user_message().contains("permission"));
    }

    #[test]
    fn test_store_error_wraps_into_cache_error() {
        let err: CacheReadError = StoreError::Unavailable("offline".into()).into();
        assert!(matches!(err, CacheReadError::Store(StoreError::Unavailable(_))));
        assert_eq!(err.user_message(), "Weather data is unavailable right now.");
    }
}
