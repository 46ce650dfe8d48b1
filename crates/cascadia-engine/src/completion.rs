//! Deferred completion handle returned by every session operation.
//!
//! A handle resolves exactly once, into either a value or an error. Observers
//! registered with [`Completion::on_success`] / [`Completion::on_error`] run
//! once each, immediately when the handle has already resolved. Awaiting the
//! handle (or calling [`Completion::wait`]) yields the same result to any
//! number of waiters.

use std::future::{Future, IntoFuture};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use cascadia_core::{Error, Result, StoreError};

type SuccessObserver<T> = Box<dyn FnOnce(&T) + Send>;
type ErrorObserver = Box<dyn FnOnce(&Error) + Send>;

/// Resolution state of a [`Completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Succeeded,
    Failed,
}

enum Slot<T> {
    Pending {
        on_success: Vec<SuccessObserver<T>>,
        on_error: Vec<ErrorObserver>,
    },
    Done(Result<T>),
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    resolved: watch::Sender<bool>,
}

impl<T> Shared<T> {
    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the eventual outcome of one operation.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.shared.slot() {
            Slot::Pending { .. } => CompletionState::Pending,
            Slot::Done(Ok(_)) => CompletionState::Succeeded,
            Slot::Done(Err(_)) => CompletionState::Failed,
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

impl<T> Completion<T>
where
    T: Clone + Send + 'static,
{
    fn pending() -> Self {
        let (resolved, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Pending {
                    on_success: Vec::new(),
                    on_error: Vec::new(),
                }),
                resolved,
            }),
        }
    }

    /// Handle that is already resolved.
    pub fn ready(result: Result<T>) -> Self {
        let completion = Self::pending();
        completion.resolve(result);
        completion
    }

    /// Run `operation` as a tokio task and resolve the handle with its
    /// outcome. Must be called from within a tokio runtime.
    pub fn spawn<F>(operation: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let completion = Self::pending();
        let resolver = completion.clone();
        tokio::spawn(async move {
            let result = match tokio::spawn(operation).await {
                Ok(result) => result,
                Err(err) => Err(Error::from(StoreError::internal(format!(
                    "operation task failed: {err}"
                )))),
            };
            resolver.resolve(result);
        });
        completion
    }

    fn resolve(&self, result: Result<T>) {
        let observers = {
            let mut slot = self.shared.slot();
            match mem::replace(&mut *slot, Slot::Done(result.clone())) {
                Slot::Pending {
                    on_success,
                    on_error,
                } => (on_success, on_error),
                done @ Slot::Done(_) => {
                    *slot = done;
                    return;
                }
            }
        };

        // Waiters are released before any observer runs.
        self.shared.resolved.send_replace(true);

        let (on_success, on_error) = observers;
        match &result {
            Ok(value) => on_success
                .into_iter()
                .for_each(|observer| run_observer(|| observer(value))),
            Err(err) => on_error
                .into_iter()
                .for_each(|observer| run_observer(|| observer(err))),
        }
    }

    /// Register an observer for a successful outcome.
    pub fn on_success<F>(&self, observer: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let value = {
            let mut slot = self.shared.slot();
            match &mut *slot {
                Slot::Pending { on_success, .. } => {
                    on_success.push(Box::new(observer));
                    return self;
                }
                Slot::Done(Ok(value)) => value.clone(),
                Slot::Done(Err(_)) => return self,
            }
        };
        observer(&value);
        self
    }

    /// Register an observer for a failed outcome.
    pub fn on_error<F>(&self, observer: F) -> &Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        let err = {
            let mut slot = self.shared.slot();
            match &mut *slot {
                Slot::Pending { on_error, .. } => {
                    on_error.push(Box::new(observer));
                    return self;
                }
                Slot::Done(Err(err)) => err.clone(),
                Slot::Done(Ok(_)) => return self,
            }
        };
        observer(&err);
        self
    }

    pub fn state(&self) -> CompletionState {
        match &*self.shared.slot() {
            Slot::Pending { .. } => CompletionState::Pending,
            Slot::Done(Ok(_)) => CompletionState::Succeeded,
            Slot::Done(Err(_)) => CompletionState::Failed,
        }
    }

    /// Wait for the outcome.
    pub async fn wait(&self) -> Result<T> {
        let mut resolved = self.shared.resolved.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = resolved.wait_for(|done| *done).await;
        match &*self.shared.slot() {
            Slot::Done(result) => result.clone(),
            Slot::Pending { .. } => Err(Error::from(StoreError::internal(
                "completion signalled before resolving",
            ))),
        }
    }
}

/// A panicking observer is logged and does not stop the ones after it.
fn run_observer(observer: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(observer)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        tracing::error!(event = "observer_panicked", message = %message);
    }
}

impl<T> IntoFuture for Completion<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use cascadia_core::StoreErrorKind;

    #[tokio::test]
    async fn observers_fire_once_after_resolution() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let completion = Completion::spawn(async move {
            let _ = rx.await;
            Ok(7_i64)
        });

        let hits = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            completion.on_success(move |value| {
                assert_eq!(*value, 7);
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        let error_hits = Arc::clone(&errors);
        completion.on_error(move |_| {
            error_hits.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(completion.state(), CompletionState::Pending);

        tx.send(()).unwrap();
        assert_eq!(completion.wait().await.unwrap(), 7);
        assert_eq!(completion.state(), CompletionState::Succeeded);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn late_observer_runs_immediately() {
        let completion: Completion<()> = Completion::ready(Err(Error::Validation("bad".into())));
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        completion
            .on_success(|_| panic!("success observer on failed completion"))
            .on_error(move |err| {
                assert!(err.is_validation());
                seen.fetch_add(1, Ordering::SeqCst);
            });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(completion.state(), CompletionState::Failed);
        assert!(completion.await.is_err());
    }

    #[tokio::test]
    async fn panicking_operation_resolves_as_error() {
        let completion: Completion<()> = Completion::spawn(async {
            let steps: Vec<()> = Vec::new();
            Ok(steps[0])
        });
        let err = completion.wait().await.unwrap_err();
        assert!(matches!(err, Error::Store(ref store) if store.kind == StoreErrorKind::Internal));
    }

    #[tokio::test]
    async fn panicking_observer_does_not_stall_waiters() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let completion = Completion::spawn(async move {
            let _ = rx.await;
            Ok(3_i64)
        });

        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<i64>();
        completion
            .on_success(|_| panic!("observer failure"))
            .on_success(move |value| {
                let _ = seen_tx.send(*value);
            });

        tx.send(()).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), completion.wait())
            .await
            .expect("waiter released");
        assert_eq!(outcome.unwrap(), 3);
        assert_eq!(completion.state(), CompletionState::Succeeded);
        let seen = tokio::time::timeout(Duration::from_secs(2), seen_rx)
            .await
            .expect("later observer ran");
        assert_eq!(seen.unwrap(), 3);
    }

    #[tokio::test]
    async fn resolves_only_once() {
        let completion = Completion::ready(Ok(1_u64));
        completion.resolve(Ok(2));
        assert_eq!(completion.clone().await.unwrap(), 1);
    }
}
