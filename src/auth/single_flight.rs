//! One in-flight attempt per operation, shared by every caller
//!
//! [`SingleFlight`] runs an attempt as a spawned task and hands every caller
//! that arrives while it is running a clone of the same
//! [`Shared`] future.  The attempt keeps running when all callers drop
//! their futures; the next caller after it finished starts a fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{AuthError, Result};

/// A joinable handle to one attempt.
pub(crate) type SharedAttempt<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Attempt<T: Clone> {
    future: SharedAttempt<T>,
    done: Arc<AtomicBool>,
}

pub(crate) struct SingleFlight<T: Clone> {
    slot: Mutex<Option<Attempt<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Joins the running attempt, or spawns `start()` as a new one.
    pub(crate) fn join_or_start<F>(&self, start: F) -> SharedAttempt<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let mut slot = self.slot.lock();
        match running(&slot) {
            Some(future) => future,
            None => spawn_into(&mut slot, start()),
        }
    }

    /// Joins the running attempt.  Otherwise spawns `start()` only if
    /// `needed()` holds, checked under the slot lock so a caller racing the
    /// end of an attempt sees that attempt's effects.
    pub(crate) fn join_or_start_if<C, F>(&self, needed: C, start: F) -> Option<SharedAttempt<T>>
    where
        C: FnOnce() -> bool,
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let mut slot = self.slot.lock();
        if let Some(future) = running(&slot) {
            return Some(future);
        }
        needed().then(|| spawn_into(&mut slot, start()))
    }

    /// The running attempt, if any.
    pub(crate) fn current(&self) -> Option<SharedAttempt<T>> {
        running(&self.slot.lock())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.current().is_some()
    }
}

fn running<T: Clone>(slot: &Option<Attempt<T>>) -> Option<SharedAttempt<T>> {
    slot.as_ref()
        .filter(|attempt| !attempt.done.load(Ordering::Acquire))
        .map(|attempt| attempt.future.clone())
}

fn spawn_into<T>(
    slot: &mut Option<Attempt<T>>,
    work: BoxFuture<'static, Result<T>>,
) -> SharedAttempt<T>
where
    T: Clone + Send + Sync + 'static,
{
    let done = Arc::new(AtomicBool::new(false));
    let finished = Arc::clone(&done);
    let handle = tokio::spawn(async move {
        let result = work.await;
        finished.store(true, Ordering::Release);
        result
    });
    let future = async move {
        handle
            .await
            .unwrap_or_else(|e| Err(AuthError::Internal(format!("background task failed: {e}"))))
    }
    .boxed()
    .shared();

    *slot = Some(Attempt {
        future: future.clone(),
        done,
    });
    future
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting(
        counter: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<usize>> {
        let counter = Arc::clone(counter);
        move || {
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(n)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let flight = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let a = flight.join_or_start(counting(&counter, Duration::from_millis(100)));
        let b = flight.join_or_start(counting(&counter, Duration::from_millis(100)));
        assert!(flight.is_running());

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), 1);
        assert_eq!(rb.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finished_attempt_is_not_rejoined() {
        let flight = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = flight
            .join_or_start(counting(&counter, Duration::ZERO))
            .await;
        let second = flight
            .join_or_start(counting(&counter, Duration::ZERO))
            .await;
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 2);
        assert!(!flight.is_running());
    }

    #[tokio::test]
    async fn test_attempt_survives_dropped_caller() {
        let flight = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));

        drop(flight.join_or_start(counting(&counter, Duration::from_millis(20))));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!flight.is_running());
    }

    #[tokio::test]
    async fn test_start_if_skips_when_not_needed() {
        let flight: SingleFlight<usize> = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(flight
            .join_or_start_if(|| false, counting(&counter, Duration::ZERO))
            .is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_if_joins_running_attempt_regardless_of_need() {
        let flight = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let running = flight.join_or_start(counting(&counter, Duration::from_millis(50)));
        let joined = flight
            .join_or_start_if(|| false, counting(&counter, Duration::ZERO))
            .expect("running attempt must be joined");
        assert_eq!(joined.await.unwrap(), 1);
        assert_eq!(running.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_delivered_to_every_caller() {
        let flight: SingleFlight<()> = SingleFlight::new();
        let start = || {
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<(), _>(AuthError::Transport("down".to_string()))
            }
            .boxed()
        };
        let a = flight.join_or_start(start);
        let b = flight.join_or_start(|| async { Ok::<(), AuthError>(()) }.boxed());
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap_err(), AuthError::Transport("down".to_string()));
        assert_eq!(rb.unwrap_err(), AuthError::Transport("down".to_string()));
    }
}
