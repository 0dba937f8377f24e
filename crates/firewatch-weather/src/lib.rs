//! Weather freshness layer for Firewatch
//!
//! Fetches point readings for the configured stations, keeps one shared
//! snapshot behind a staleness window, and pushes snapshot changes to any
//! number of observers.

pub mod cache;
pub mod conditions;
pub mod feed;
pub mod hub;
pub mod provider;
pub mod store;
pub mod types;

pub use cache::{is_stale, CacheSettings, WeatherCache, CACHE_DOCUMENT_KEY};
pub use conditions::FireDanger;
pub use feed::{ChangeCallback, PollingFeed, Subscription};
pub use hub::SubscriptionHub;
pub use provider::{WeatherProvider, WeatherSource};
pub use store::{DocumentStore, FileStore, MemoryStore};
pub use types::*;
