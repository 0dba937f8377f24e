use std::time::Duration;

use reqwest::Client;

use crate::error::{NetworkError, ReqwestErrorExt};

/// Default budget for every outbound call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP client shared by the weather provider, the token manager
/// and the schedule client. Every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<Client, NetworkError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("firewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| e.into_network_error())
}
