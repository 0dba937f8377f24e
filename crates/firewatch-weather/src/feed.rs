//! Change-feed plumbing: subscription handles and the polling adapter for
//! stores that cannot push.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use firewatch_core::StoreError;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

/// Receives the full document after each change.
pub type ChangeCallback = Arc<dyn Fn(Value) + Send + Sync>;

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle for a live registration.
///
/// `unsubscribe()` is idempotent. Once it returns, the callback is not
/// invoked again, even for a change that was already on its way. Dropping
/// the handle unsubscribes.
pub struct Subscription {
    active: Arc<AtomicBool>,
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    /// `active` must be checked by the delivering side before every callback.
    pub fn new(active: Arc<AtomicBool>, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            active,
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Spawns `task` on the current runtime and returns a subscription that
/// aborts it on teardown.
pub(crate) fn spawn_feed<F>(
    active: Arc<AtomicBool>,
    task: F,
) -> Result<Subscription, StoreError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::try_current()
        .map_err(|_| StoreError::Unavailable("change feed requires a tokio runtime".into()))?;
    let task = handle.spawn(task);
    Ok(Subscription::new(active, move || task.abort()))
}

/// Turns periodic point reads into a change feed.
///
/// The first successful read delivers the current document, then a callback
/// fires whenever a read returns something different from the last one seen.
/// Read errors are logged and retried on the next tick.
#[derive(Debug, Clone, Copy)]
pub struct PollingFeed {
    interval: Duration,
}

impl PollingFeed {
    const MIN_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Self::MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn watch<R, Fut>(&self, read: R, callback: ChangeCallback) -> Result<Subscription, StoreError>
    where
        R: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Value>, StoreError>> + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let interval = self.interval;

        spawn_feed(active, async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_seen: Option<Value> = None;

            loop {
                ticker.tick().await;
                if !flag.load(Ordering::Acquire) {
                    break;
                }

                match read().await {
                    Ok(Some(document)) if last_seen.as_ref() != Some(&document) => {
                        last_seen = Some(document.clone());
                        if flag.load(Ordering::Acquire) {
                            callback(document);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "polling change feed read failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let counter = torn_down.clone();
        let sub = Subscription::new(Arc::new(AtomicBool::new(true)), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        drop(sub);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_feed_outside_runtime_is_an_error() {
        let feed = PollingFeed::new(Duration::from_millis(50));
        let result = feed.watch(|| async { Ok(None) }, Arc::new(|_: Value| {}));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_polling_reports_only_changes() {
        let reads = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let counter = reads.clone();
        let feed = PollingFeed::new(Duration::from_millis(10));
        let sub = feed
            .watch(
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    // Same document for the first three reads, then a new one
                    let version = if n < 3 { 1 } else { 2 };
                    async move { Ok(Some(serde_json::json!({ "version": version }))) }
                },
                Arc::new(move |doc: Value| {
                    let _ = tx.send(doc);
                }),
            )
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first.unwrap()["version"], 1);
        assert_eq!(second.unwrap()["version"], 2);
        assert!(reads.load(Ordering::SeqCst) >= 4);

        sub.unsubscribe();
    }
}
