//! Fan-out of weather snapshots to many observers over one upstream feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use firewatch_core::CacheReadError;
use parking_lot::Mutex;

use crate::cache::WeatherCache;
use crate::feed::Subscription;
use crate::types::CacheDocument;

type DocumentCallback = Arc<dyn Fn(CacheDocument) + Send + Sync>;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: DocumentCallback,
    last_delivered: Mutex<Option<CacheDocument>>,
}

impl Subscriber {
    fn deliver(&self, document: &CacheDocument) {
        let mut last = self.last_delivered.lock();
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if let Some(previous) = last.as_ref() {
            if document.last_fetch < previous.last_fetch || document == previous {
                return;
            }
        }
        *last = Some(document.clone());
        (self.callback)(document.clone());
    }
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: Vec<Arc<Subscriber>>,
    latest: Option<CacheDocument>,
}

struct HubInner {
    cache: WeatherCache,
    // Lock order: state, then upstream.
    state: Mutex<HubState>,
    upstream: Mutex<Option<Subscription>>,
}

impl HubInner {
    fn fan_out(&self, document: CacheDocument) {
        let subscribers = {
            let mut state = self.state.lock();
            if let Some(latest) = state.latest.as_ref() {
                if document.last_fetch < latest.last_fetch {
                    tracing::debug!(
                        last_fetch = %document.last_fetch,
                        latest = %latest.last_fetch,
                        "dropping out-of-order weather snapshot"
                    );
                    return;
                }
                if *latest == document {
                    return;
                }
            }
            state.latest = Some(document.clone());
            state.subscribers.clone()
        };

        for subscriber in subscribers {
            subscriber.deliver(&document);
        }
    }

    fn remove(&self, id: u64) {
        let upstream = {
            let mut state = self.state.lock();
            state.subscribers.retain(|s| s.id != id);
            if state.subscribers.is_empty() {
                self.upstream.lock().take()
            } else {
                None
            }
        };

        if let Some(upstream) = upstream {
            tracing::debug!("last weather subscriber left, closing upstream feed");
            upstream.unsubscribe();
        }
    }
}

/// Shares one cache change feed among any number of observers.
///
/// The upstream subscription is opened with the first subscriber and closed
/// when the last one leaves. New subscribers are handed the most recent
/// snapshot straight away. No subscriber is ever handed a snapshot older than
/// one it has already seen.
#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

impl SubscriptionHub {
    pub fn new(cache: WeatherCache) -> Self {
        Self {
            inner: Arc::new(HubInner {
                cache,
                state: Mutex::new(HubState::default()),
                upstream: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Result<Subscription, CacheReadError>
    where
        F: Fn(CacheDocument) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));

        let (subscriber, latest) = {
            let mut state = self.inner.state.lock();
            let subscriber = Arc::new(Subscriber {
                id: state.next_id,
                active: active.clone(),
                callback: Arc::new(callback),
                last_delivered: Mutex::new(None),
            });
            state.next_id += 1;
            state.subscribers.push(subscriber.clone());
            (subscriber, state.latest.clone())
        };
        let id = subscriber.id;

        if let Err(e) = self.connect() {
            self.inner.remove(id);
            return Err(e);
        }

        if let Some(document) = latest {
            subscriber.deliver(&document);
        }

        let hub = Arc::downgrade(&self.inner);
        Ok(Subscription::new(active, move || {
            if let Some(hub) = hub.upgrade() {
                hub.remove(id);
            }
        }))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Whether the upstream feed is open.
    pub fn is_connected(&self) -> bool {
        self.inner.upstream.lock().is_some()
    }

    /// The most recent snapshot fanned out, if any.
    pub fn latest(&self) -> Option<CacheDocument> {
        self.inner.state.lock().latest.clone()
    }

    fn connect(&self) -> Result<(), CacheReadError> {
        let mut upstream = self.inner.upstream.lock();
        if upstream.is_some() {
            return Ok(());
        }

        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        let subscription = self.inner.cache.subscribe_to_changes(move |document| {
            if let Some(hub) = hub.upgrade() {
                hub.fan_out(document);
            }
        })?;

        tracing::debug!("opened upstream weather feed");
        *upstream = Some(subscription);
        Ok(())
    }
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("subscribers", &self.subscriber_count())
            .field("connected", &self.is_connected())
            .finish()
    }
}
