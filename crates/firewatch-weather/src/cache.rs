//! Weather snapshot cache.
//!
//! One document in the shared store holds every station's latest reading and
//! a single `lastFetch` instant. Readers get that document as long as it is
//! no older than the TTL; otherwise the cache refills it from the provider
//! first. Concurrent readers of a stale or missing document share one refill.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use firewatch_core::{CacheReadError, Clock, SingleFlight, StoreError, WeatherConfig};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;

use crate::conditions;
use crate::feed::{ChangeCallback, Subscription};
use crate::provider::WeatherSource;
use crate::store::DocumentStore;
use crate::types::{CacheDocument, Station, StationReading};

/// Store key of the shared snapshot.
pub const CACHE_DOCUMENT_KEY: &str = "weather_data/all_locations";

/// A snapshot fetched at `last_fetch` is stale once strictly more than `ttl`
/// has elapsed.
pub fn is_stale(last_fetch: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - last_fetch > ttl
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub stations: Vec<Station>,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&WeatherConfig::default())
    }
}

impl From<&WeatherConfig> for CacheSettings {
    fn from(config: &WeatherConfig) -> Self {
        Self {
            stations: config.stations.iter().map(Station::from).collect(),
            ttl: config.cache_ttl(),
        }
    }
}

type RefillResult = Result<CacheDocument, CacheReadError>;

struct CacheCore {
    source: Arc<dyn WeatherSource>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    stations: Vec<Station>,
    ttl: Duration,
    /// `lastFetch` of this cache's most recent successful write.
    last_written: Mutex<Option<DateTime<Utc>>>,
}

impl CacheCore {
    async fn read_document(&self) -> Result<Option<CacheDocument>, StoreError> {
        let value = match self.store.read(CACHE_DOCUMENT_KEY).await {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(StoreError::Serialization(e)) => {
                tracing::warn!(error = %e, "stored weather snapshot is corrupt, treating as missing");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match serde_json::from_value::<CacheDocument>(value) {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                tracing::warn!(error = %e, "stored weather snapshot is unreadable, treating as missing");
                Ok(None)
            }
        }
    }

    async fn read_fresh(&self) -> Result<Option<CacheDocument>, StoreError> {
        let document = self.read_document().await?;
        let now = self.clock.now();
        Ok(document.filter(|doc| !is_stale(doc.last_fetch, now, self.ttl)))
    }

    async fn refill(&self) -> RefillResult {
        tracing::info!(stations = self.stations.len(), "refilling weather snapshot");

        let fetches = self.stations.iter().map(|station| async move {
            let reading = self.source.fetch_reading(station).await;
            (station.name.clone(), reading)
        });
        let readings = join_all(fetches).await;

        let fetched_at = {
            let now = self.clock.now();
            match *self.last_written.lock() {
                Some(previous) if previous > now => previous,
                _ => now,
            }
        };

        let document = CacheDocument::from_readings(readings, fetched_at);
        let value = serde_json::to_value(&document).map_err(StoreError::from)?;
        self.store.write(CACHE_DOCUMENT_KEY, value).await?;

        {
            let mut last_written = self.last_written.lock();
            if last_written.map_or(true, |previous| previous < fetched_at) {
                *last_written = Some(fetched_at);
            }
        }

        tracing::info!(
            available = document.available_count(),
            unavailable = document.unavailable_count(),
            last_fetch = %document.last_fetch,
            "weather snapshot written"
        );
        Ok(document)
    }
}

/// Cache-aside front for the shared weather snapshot.
///
/// Clones share the same in-flight refill.
#[derive(Clone)]
pub struct WeatherCache {
    core: Arc<CacheCore>,
    refill: Arc<SingleFlight<RefillResult>>,
    forced: Arc<SingleFlight<RefillResult>>,
}

impl WeatherCache {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            core: Arc::new(CacheCore {
                source,
                store,
                clock,
                stations: settings.stations,
                ttl: settings.ttl,
                last_written: Mutex::new(None),
            }),
            refill: Arc::new(SingleFlight::new()),
            forced: Arc::new(SingleFlight::new()),
        }
    }

    pub fn stations(&self) -> &[Station] {
        &self.core.stations
    }

    pub fn ttl(&self) -> Duration {
        self.core.ttl
    }

    /// The current snapshot, refilled first if it is missing or stale.
    pub async fn get(&self) -> RefillResult {
        if let Some(document) = self.core.read_fresh().await? {
            tracing::debug!(last_fetch = %document.last_fetch, "weather cache hit");
            return Ok(document);
        }

        let core = self.core.clone();
        let forced = self.forced.clone();
        self.refill
            .run(move || async move {
                if let Some(result) = forced.wait().await {
                    return result;
                }
                // A refill may have landed between our read and joining the flight
                if let Some(document) = core.read_fresh().await? {
                    return Ok(document);
                }
                core.refill().await
            })
            .await
    }

    /// Refetch every station now, regardless of freshness.
    ///
    /// Waits out a `get()` refill already running, then fetches. Concurrent
    /// forced refills share one fetch.
    pub async fn refill(&self) -> RefillResult {
        let _ = self.refill.wait().await;
        let core = self.core.clone();
        self.forced.run(move || async move { core.refill().await }).await
    }

    /// Deliver each snapshot written to the shared store, by any writer.
    pub fn subscribe_to_changes<F>(&self, callback: F) -> Result<Subscription, CacheReadError>
    where
        F: Fn(CacheDocument) + Send + Sync + 'static,
    {
        let decode: ChangeCallback = Arc::new(move |value: Value| {
            match serde_json::from_value::<CacheDocument>(value) {
                Ok(document) => callback(document),
                Err(e) => tracing::warn!(error = %e, "skipping undecodable weather snapshot"),
            }
        });

        Ok(self.core.store.subscribe(CACHE_DOCUMENT_KEY, decode)?)
    }

    /// When the stored snapshot was fetched, without triggering a refill.
    pub async fn last_update_time(&self) -> Result<Option<DateTime<Utc>>, CacheReadError> {
        Ok(self.core.read_document().await?.map(|doc| doc.last_fetch))
    }

    /// "Never", "Just now", "12 minutes ago", ...
    pub async fn formatted_last_update(&self) -> Result<String, CacheReadError> {
        let formatted = match self.last_update_time().await? {
            Some(last_fetch) => conditions::format_relative(self.core.clock.now() - last_fetch),
            None => "Never".to_string(),
        };
        Ok(formatted)
    }

    /// The snapshot's readings in configured station order. Stations missing
    /// from the document are reported as unavailable.
    pub fn station_readings(&self, document: &CacheDocument) -> Vec<(&Station, StationReading)> {
        self.core
            .stations
            .iter()
            .map(|station| {
                let reading = document.reading(&station.name).cloned().unwrap_or_default();
                (station, reading)
            })
            .collect()
    }
}

impl std::fmt::Debug for WeatherCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherCache")
            .field("stations", &self.core.stations.len())
            .field("ttl", &self.core.ttl)
            .field("refill", &self.refill)
            .field("forced", &self.forced)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use crate::types::WeatherReading;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use firewatch_core::ManualClock;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts fetches; stations named in `failing` come back unavailable.
    struct FakeSource {
        fetches: AtomicUsize,
        failing: HashSet<String>,
        delay: std::time::Duration,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                failing: HashSet::new(),
                delay: std::time::Duration::from_millis(0),
            }
        }

        fn failing(mut self, station: &str) -> Self {
            self.failing.insert(station.to_string());
            self
        }

        fn slow(mut self) -> Self {
            self.delay = std::time::Duration::from_millis(30);
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherSource for FakeSource {
        async fn fetch_reading(&self, station: &Station) -> StationReading {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.contains(&station.name) {
                return StationReading::Unavailable;
            }
            StationReading::Available(WeatherReading {
                location: station.name.clone(),
                air_temperature: 21.0,
                humidity: 45.0,
                wind_speed: 3.0,
                wind_direction: 180.0,
                visibility: 16.0,
                cloud_cover: 10.0,
                observed_at: Utc.with_ymd_and_hms(2025, 8, 1, 20, 0, 0).unwrap(),
            })
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn read(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }

        async fn write(&self, _key: &str, _document: Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("backend offline".into()))
        }

        fn subscribe(&self, _key: &str, _callback: ChangeCallback) -> Result<Subscription, StoreError> {
            Err(StoreError::Unavailable("backend offline".into()))
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 20, 5, 0).unwrap()
    }

    struct Harness {
        cache: WeatherCache,
        source: Arc<FakeSource>,
        store: MemoryStore,
        clock: Arc<ManualClock>,
    }

    fn harness(source: FakeSource) -> Harness {
        let source = Arc::new(source);
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let cache = WeatherCache::new(
            source.clone(),
            Arc::new(store.clone()),
            clock.clone(),
            CacheSettings::default(),
        );
        Harness {
            cache,
            source,
            store,
            clock,
        }
    }

    #[test]
    fn test_is_stale_is_strict() {
        let ttl = Duration::hours(1);
        let last = start();
        assert!(!is_stale(last, last, ttl));
        assert!(!is_stale(last, last + Duration::hours(1), ttl));
        assert!(is_stale(last, last + Duration::hours(1) + Duration::milliseconds(1), ttl));
    }

    #[test]
    fn test_default_settings() {
        let settings = CacheSettings::default();
        assert_eq!(settings.ttl, Duration::hours(1));
        let names: Vec<_> = settings.stations.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["San Rafael", "Novato", "Pt. Reyes", "Mt. Tam"]);
    }

    #[tokio::test]
    async fn test_cold_get_refills_and_writes_through() {
        let h = harness(FakeSource::new());

        let doc = h.cache.get().await.unwrap();

        assert_eq!(h.source.fetches(), 4);
        assert_eq!(doc.last_fetch, start());
        assert_eq!(doc.available_count(), 4);

        let stored = h.store.read(CACHE_DOCUMENT_KEY).await.unwrap().unwrap();
        let stored: CacheDocument = serde_json::from_value(stored).unwrap();
        assert_eq!(stored, doc);
    }

    #[tokio::test]
    async fn test_fresh_document_is_served_without_refill() {
        let h = harness(FakeSource::new());
        let first = h.cache.get().await.unwrap();

        h.clock.advance(Duration::minutes(59));
        let second = h.cache.get().await.unwrap();

        assert_eq!(h.source.fetches(), 4);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let h = harness(FakeSource::new());
        h.cache.get().await.unwrap();

        // Exactly one hour old is still fresh
        h.clock.advance(Duration::hours(1));
        let doc = h.cache.get().await.unwrap();
        assert_eq!(h.source.fetches(), 4);
        assert_eq!(doc.last_fetch, start());

        h.clock.advance(Duration::milliseconds(1));
        let doc = h.cache.get().await.unwrap();
        assert_eq!(h.source.fetches(), 8);
        assert_eq!(doc.last_fetch, start() + Duration::hours(1) + Duration::milliseconds(1));
    }

    #[tokio::test]
    async fn test_concurrent_cold_reads_share_one_refill() {
        let h = harness(FakeSource::new().slow());

        let reads = (0..20).map(|_| {
            let cache = h.cache.clone();
            async move { cache.get().await }
        });
        let results = join_all(reads).await;

        assert_eq!(h.source.fetches(), 4);
        let first = results[0].clone().unwrap();
        for result in results {
            assert_eq!(result.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_concurrent_reads_across_tasks_share_one_refill() {
        let h = harness(FakeSource::new().slow());

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let cache = h.cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        let mut last_fetches = HashSet::new();
        for handle in handles {
            last_fetches.insert(handle.await.unwrap().unwrap().last_fetch);
        }

        assert_eq!(h.source.fetches(), 4);
        assert_eq!(last_fetches.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_stations() {
        let h = harness(FakeSource::new().failing("Mt. Tam"));

        let doc = h.cache.get().await.unwrap();

        assert_eq!(doc.available_count(), 3);
        assert_eq!(doc.reading("Mt. Tam"), Some(&StationReading::Unavailable));
        assert!(doc.locations.values().all(|entry| entry.last_updated == doc.last_fetch));
    }

    #[tokio::test]
    async fn test_all_stations_failing_still_writes_document() {
        let source = FakeSource::new()
            .failing("San Rafael")
            .failing("Novato")
            .failing("Pt. Reyes")
            .failing("Mt. Tam");
        let h = harness(source);

        let doc = h.cache.get().await.unwrap();
        assert_eq!(doc.available_count(), 0);
        assert_eq!(doc.locations.len(), 4);
        assert!(h.store.read(CACHE_DOCUMENT_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_write_failure_is_cache_read_error() {
        let cache = WeatherCache::new(
            Arc::new(FakeSource::new()),
            Arc::new(BrokenStore),
            Arc::new(ManualClock::new(start())),
            CacheSettings::default(),
        );

        let result = cache.get().await;
        assert!(matches!(
            result,
            Err(CacheReadError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_last_fetch_never_moves_backwards() {
        let h = harness(FakeSource::new());
        let first = h.cache.refill().await.unwrap();

        h.clock.set(start() - Duration::minutes(10));
        let second = h.cache.refill().await.unwrap();

        assert_eq!(second.last_fetch, first.last_fetch);
    }

    #[tokio::test]
    async fn test_unreadable_document_is_refilled() {
        let h = harness(FakeSource::new());
        h.store
            .write(CACHE_DOCUMENT_KEY, serde_json::json!({ "unexpected": true }))
            .await
            .unwrap();

        let doc = h.cache.get().await.unwrap();
        assert_eq!(h.source.fetches(), 4);
        assert_eq!(doc.last_fetch, start());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_file_is_refilled_over() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("weather_data").join("all_locations.json");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, r#"{ "locations": {"#).unwrap();

        let source = Arc::new(FakeSource::new());
        let cache = WeatherCache::new(
            source.clone(),
            Arc::new(FileStore::new(dir.path())),
            Arc::new(ManualClock::new(start())),
            CacheSettings::default(),
        );

        let doc = cache.get().await.unwrap();
        assert_eq!(source.fetches(), 4);
        assert_eq!(doc.last_fetch, start());

        // The file was replaced, so the next read is a hit
        assert_eq!(cache.get().await.unwrap(), doc);
        assert_eq!(source.fetches(), 4);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_not_refilled_over() {
        struct UnreachableStore;

        #[async_trait]
        impl DocumentStore for UnreachableStore {
            async fn read(&self, _key: &str) -> Result<Option<Value>, StoreError> {
                Err(StoreError::Io("permission denied".into()))
            }

            async fn write(&self, _key: &str, _document: Value) -> Result<(), StoreError> {
                Ok(())
            }

            fn subscribe(&self, _key: &str, _callback: ChangeCallback) -> Result<Subscription, StoreError> {
                Err(StoreError::Unavailable("backend offline".into()))
            }
        }

        let source = Arc::new(FakeSource::new());
        let cache = WeatherCache::new(
            source.clone(),
            Arc::new(UnreachableStore),
            Arc::new(ManualClock::new(start())),
            CacheSettings::default(),
        );

        let result = cache.get().await;
        assert!(matches!(result, Err(CacheReadError::Store(StoreError::Io(_)))));
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn test_forced_refill_waits_out_running_get() {
        let h = harness(FakeSource::new().slow());

        let (got, forced) = tokio::join!(h.cache.get(), h.cache.refill());
        got.unwrap();
        forced.unwrap();

        assert_eq!(h.source.fetches(), 8);
    }

    #[tokio::test]
    async fn test_get_shares_running_forced_refill() {
        let h = harness(FakeSource::new().slow());

        let (forced, got) = tokio::join!(h.cache.refill(), h.cache.get());

        assert_eq!(h.source.fetches(), 4);
        assert_eq!(forced.unwrap(), got.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_forced_refills_share_one_fetch() {
        let h = harness(FakeSource::new().slow());

        let (a, b) = tokio::join!(h.cache.refill(), h.cache.refill());

        assert_eq!(h.source.fetches(), 4);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn test_formatted_last_update() {
        let h = harness(FakeSource::new());
        assert_eq!(h.cache.last_update_time().await.unwrap(), None);
        assert_eq!(h.cache.formatted_last_update().await.unwrap(), "Never");

        h.cache.get().await.unwrap();
        assert_eq!(h.cache.last_update_time().await.unwrap(), Some(start()));
        assert_eq!(h.cache.formatted_last_update().await.unwrap(), "Just now");

        h.clock.advance(Duration::minutes(12));
        assert_eq!(h.cache.formatted_last_update().await.unwrap(), "12 minutes ago");
    }

    #[tokio::test]
    async fn test_station_readings_follow_configured_order() {
        let h = harness(FakeSource::new().failing("Novato"));
        let doc = h.cache.get().await.unwrap();

        let rows = h.cache.station_readings(&doc);
        let names: Vec<_> = rows.iter().map(|(station, _)| station.name.as_str()).collect();
        assert_eq!(names, ["San Rafael", "Novato", "Pt. Reyes", "Mt. Tam"]);
        assert!(!rows[1].1.is_available());
    }

    #[tokio::test]
    async fn test_subscribe_to_changes_decodes_documents() {
        let h = harness(FakeSource::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = h
            .cache
            .subscribe_to_changes(move |doc: CacheDocument| {
                let _ = tx.send(doc);
            })
            .unwrap();

        // Undecodable writes are skipped
        h.store
            .write(CACHE_DOCUMENT_KEY, serde_json::json!("garbage"))
            .await
            .unwrap();
        let written = h.cache.refill().await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, written);
    }
}
