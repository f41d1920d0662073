//! Fetch deduplication registry.
//!
//! Maps an [`InFlightKey`] to the single shared future performing that
//! fetch. Every caller asking for the same key while it is pending awaits the
//! same execution and receives a clone of its result. The entry is released
//! as soon as the operation settles, success or failure, so nothing is cached
//! here: the next call after settlement starts a fresh fetch.
//!
//! Registered operations run on their own tokio task. A caller that stops
//! waiting, e.g. because a sibling fetch in a `try_join!` failed, does not stop
//! the operation from settling, writing its results or releasing its key.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use shared::AllotmentKind;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::errors::ConsoleError;

/// Logical identity of an in-flight fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InFlightKey {
    /// Division row plus its calendars
    Division(String),
    /// One allotment half of one calendar year
    Allotment {
        calendar_id: String,
        year: i32,
        kind: AllotmentKind,
    },
}

impl InFlightKey {
    pub fn division(name: &str) -> Self {
        InFlightKey::Division(name.to_string())
    }

    pub fn allotment(calendar_id: &str, year: i32, kind: AllotmentKind) -> Self {
        InFlightKey::Allotment {
            calendar_id: calendar_id.to_string(),
            year,
            kind,
        }
    }
}

impl fmt::Display for InFlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InFlightKey::Division(name) => write!(f, "division:{}", name),
            InFlightKey::Allotment { calendar_id, year, kind } => {
                write!(f, "allotment:{}:{}:{}", calendar_id, year, kind)
            }
        }
    }
}

/// A pending operation any number of callers can await
pub type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, ConsoleError>>>;

/// Releases a key when the task driving its operation finishes
struct ReleaseOnDrop<T>
where
    T: Clone + Send + Sync + 'static,
{
    registry: FetchRegistry<T>,
    key: InFlightKey,
}

impl<T> Drop for ReleaseOnDrop<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

/// Registry of pending operations producing values of type `T`
pub struct FetchRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    in_flight: Arc<Mutex<HashMap<InFlightKey, SharedFetch<T>>>>,
}

impl<T> Clone for FetchRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> Default for FetchRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FetchRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<InFlightKey, SharedFetch<T>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The pending operation for `key`, if one is in flight.
    /// `None` means the caller must register one.
    pub fn acquire(&self, key: &InFlightKey) -> Option<SharedFetch<T>> {
        self.entries().get(key).cloned()
    }

    /// Register `operation` under `key` and return the shared handle.
    ///
    /// The operation is spawned immediately and releases its own key when it
    /// settles, or if its task dies. If another operation is already pending
    /// for the key, that one is returned and `operation` is dropped unpolled.
    /// Must be called from within a tokio runtime.
    pub fn register<F>(&self, key: InFlightKey, operation: F) -> SharedFetch<T>
    where
        F: Future<Output = Result<T, ConsoleError>> + Send + 'static,
    {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(&key) {
            return existing.clone();
        }

        let release = ReleaseOnDrop {
            registry: self.clone(),
            key: key.clone(),
        };
        let task = tokio::spawn(async move {
            let _release = release;
            operation.await
        });

        let task_key = key.clone();
        let shared = async move {
            task.await.unwrap_or_else(|e| {
                Err(ConsoleError::RemoteFailure(format!(
                    "Fetch {} did not complete: {}",
                    task_key, e
                )))
            })
        }
        .boxed()
        .shared();

        debug!("Registered in-flight fetch {}", key);
        entries.insert(key, shared.clone());
        shared
    }

    /// Forget the pending operation for `key`
    pub fn release(&self, key: &InFlightKey) {
        if self.entries().remove(key).is_some() {
            debug!("Released in-flight fetch {}", key);
        }
    }

    /// Join the pending operation for `key`, or start one with `make_operation`
    pub async fn dedupe<F, Fut>(&self, key: InFlightKey, make_operation: F) -> Result<T, ConsoleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ConsoleError>> + Send + 'static,
    {
        let pending = match self.acquire(&key) {
            Some(existing) => {
                debug!("Joining in-flight fetch {}", key);
                existing
            }
            None => self.register(key, make_operation()),
        };
        pending.await
    }

    pub fn is_in_flight(&self, key: &InFlightKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let registry: FetchRegistry<u32> = FetchRegistry::new();
        let executions = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = release_rx.shared();

        let key = InFlightKey::division("North");
        let mut callers = Vec::new();
        for _ in 0..5 {
            let registry = registry.clone();
            let executions = Arc::clone(&executions);
            let release_rx = release_rx.clone();
            let key = key.clone();
            callers.push(tokio::spawn(async move {
                registry
                    .dedupe(key, move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        let _ = release_rx.await;
                        Ok(42)
                    })
                    .await
            }));
        }

        // Let every caller reach the pending fetch before it settles
        tokio::task::yield_now().await;
        while registry.acquire(&key).is_none() {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        release_tx.send(()).unwrap();

        for caller in callers {
            assert_eq!(caller.await.unwrap(), Ok(42));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(!registry.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_key_is_released_after_failure() {
        let registry: FetchRegistry<u32> = FetchRegistry::new();
        let key = InFlightKey::allotment("cal-1", 2025, AllotmentKind::PldSdv);

        let result = registry
            .dedupe(key.clone(), || async {
                Err(ConsoleError::RemoteFailure("store offline".to_string()))
            })
            .await;

        assert_eq!(result, Err(ConsoleError::RemoteFailure("store offline".to_string())));
        assert_eq!(registry.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_settled_key_starts_a_fresh_fetch() {
        let registry: FetchRegistry<usize> = FetchRegistry::new();
        let executions = Arc::new(AtomicUsize::new(0));
        let key = InFlightKey::allotment("cal-1", 2025, AllotmentKind::Vacation);

        for expected in 1..=2 {
            let executions = Arc::clone(&executions);
            let value = registry
                .dedupe(key.clone(), move || async move {
                    Ok(executions.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(value, Ok(expected));
        }
    }

    #[tokio::test]
    async fn test_register_returns_existing_pending_operation() {
        let registry: FetchRegistry<&'static str> = FetchRegistry::new();
        let key = InFlightKey::division("South");
        let (tx, rx) = oneshot::channel::<()>();

        let first = registry.register(key.clone(), async move {
            let _ = rx.await;
            Ok("first")
        });
        let second = registry.register(key.clone(), async { Ok("second") });
        assert_eq!(registry.in_flight_count(), 1);

        tx.send(()).unwrap();
        assert_eq!(first.await, Ok("first"));
        assert_eq!(second.await, Ok("first"));
        assert!(registry.acquire(&key).is_none());
    }

    #[tokio::test]
    async fn test_operation_settles_after_every_caller_gives_up() {
        let registry: FetchRegistry<u32> = FetchRegistry::new();
        let key = InFlightKey::allotment("cal-1", 2025, AllotmentKind::PldSdv);
        let finished = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();

        let pending = registry.register(key.clone(), {
            let finished = Arc::clone(&finished);
            async move {
                let _ = rx.await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }
        });
        drop(pending);
        assert!(registry.is_in_flight(&key));

        tx.send(()).unwrap();
        for _ in 0..50 {
            if !registry.is_in_flight(&key) {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(registry.in_flight_count(), 0);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(InFlightKey::division("North").to_string(), "division:North");
        assert_eq!(
            InFlightKey::allotment("cal-9", 2026, AllotmentKind::PldSdv).to_string(),
            "allotment:cal-9:2026:pld_sdv"
        );
    }
}
