//! Single-flight execution.
//!
//! At most one execution of the guarded operation is in progress at a time.
//! Callers that arrive while it runs attach to the same shared future and
//! receive a clone of its output instead of starting their own.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

pub struct SingleFlight<T> {
    in_flight: Mutex<Option<Shared<BoxFuture<'static, T>>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(None),
        }
    }

    /// Run `start()`'s future, or join the one already running.
    ///
    /// `start` is only invoked when nothing is in flight. The future keeps
    /// running as long as any caller is still awaiting it.
    pub async fn run<F, Fut>(&self, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    tracing::debug!("joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let flight = start().boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let output = flight.clone().await;
        self.finish(&flight);
        output
    }

    /// Wait for the operation already in flight, if any, without starting one.
    pub async fn wait(&self) -> Option<T> {
        let flight = self.in_flight.lock().clone()?;
        let output = flight.clone().await;
        self.finish(&flight);
        Some(output)
    }

    fn finish(&self, flight: &Shared<BoxFuture<'static, T>>) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(flight)) {
            *slot = None;
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight.lock().is_some())
            .finish()
    }
}
