//! Scheduling client error types.

use firewatch_core::{ApiError, AuthError, NetworkError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Failed to parse schedule response: {0}")]
    Parse(String),
}

impl ScheduleError {
    /// User-friendly error message for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.user_message(),
            Self::Api(e) => e.user_message(),
            Self::Network(e) => e.user_message(),
            Self::Parse(_) => "The scheduling service sent data we could not read.",
        }
    }

    /// Whether re-authenticating could plausibly help.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
