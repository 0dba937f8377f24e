//! Client-credentials authentication for the crew scheduling API.

pub mod token;

pub use token::{AccessToken, ClientCredentials, TokenManager, DEFAULT_SAFETY_MARGIN_SECS};
