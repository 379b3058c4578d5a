use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::HarnessError;

/// Create a single-use rendezvous for one asynchronous outcome.
///
/// The [`Resolver`] side lives on the dispatch task and fires exactly
/// once; the [`Waiter`] side blocks the test task, bounded by a timeout.
/// `what` names the awaited event and is carried into every failure for
/// diagnosability ("timed out ... while awaiting roster push for carol").
pub fn handoff<T>(what: impl Into<String>) -> (Resolver<T>, Waiter<T>) {
    let shared = Arc::new(Shared {
        what: what.into(),
        slot: Mutex::new(Slot::Empty),
        notify: Notify::new(),
    });
    (
        Resolver {
            shared: Arc::clone(&shared),
        },
        Waiter { shared },
    )
}

enum Slot<T> {
    Empty,
    Ready(Result<T, HarnessError>),
    Poisoned,
    Taken,
}

struct Shared<T> {
    what: String,
    slot: Mutex<Slot<T>>,
    notify: Notify,
}

impl<T> Shared<T> {
    fn lock_slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn double_resolution(&self) -> HarnessError {
        HarnessError::DoubleResolution {
            what: self.what.clone(),
        }
    }
}

/// The producing half of a handoff. Cloneable so the dispatch side can
/// hold several references, but the handoff still resolves at most once.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Resolver<T> {
    /// Deliver the awaited value. Fails with `DoubleResolution` if the
    /// handoff was already resolved; a still-pending waiter then observes
    /// the same error instead of a silently-kept first value, while a
    /// waiter that already returned keeps what it was given.
    pub fn resolve(&self, value: T) -> Result<(), HarnessError> {
        self.fill(Ok(value))
    }

    /// Deliver a failure for the waiter to re-raise.
    pub fn resolve_err(&self, error: HarnessError) -> Result<(), HarnessError> {
        self.fill(Err(error))
    }

    fn fill(&self, outcome: Result<T, HarnessError>) -> Result<(), HarnessError> {
        let mut slot = self.shared.lock_slot();
        match std::mem::replace(&mut *slot, Slot::Poisoned) {
            Slot::Empty => {
                *slot = Slot::Ready(outcome);
                drop(slot);
                debug!(what = %self.shared.what, "handoff resolved");
                self.shared.notify.notify_waiters();
                Ok(())
            }
            Slot::Ready(_) => {
                drop(slot);
                self.shared.notify.notify_waiters();
                Err(self.shared.double_resolution())
            }
            Slot::Poisoned => Err(self.shared.double_resolution()),
            Slot::Taken => {
                *slot = Slot::Taken;
                Err(self.shared.double_resolution())
            }
        }
    }
}

/// The consuming half of a handoff. `recv` takes `self`: a handoff is
/// consumed by exactly one waiter and discarded afterwards.
pub struct Waiter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Waiter<T> {
    /// Block until the handoff resolves or `timeout` elapses.
    pub async fn recv(self, timeout: Duration) -> Result<T, HarnessError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.try_take() {
                return outcome;
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return Err(HarnessError::Timeout {
                    what: self.shared.what.clone(),
                    after: timeout,
                });
            }
        }
    }

    fn try_take(&self) -> Option<Result<T, HarnessError>> {
        let mut slot = self.shared.lock_slot();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Empty => {
                *slot = Slot::Empty;
                None
            }
            Slot::Ready(outcome) => Some(outcome),
            Slot::Poisoned | Slot::Taken => Some(Err(self.shared.double_resolution())),
        }
    }
}
