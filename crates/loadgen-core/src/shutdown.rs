//! Cooperative cancellation shared by the engine, workers and subscribers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    DurationElapsed,
    Cancelled,
    AllWorkersFailed,
    NoClients,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::DurationElapsed => "duration_elapsed",
            StopReason::Cancelled => "cancelled",
            StopReason::AllWorkersFailed => "all_workers_failed",
            StopReason::NoClients => "no_clients",
        }
    }

    /// The run never produced useful load.
    pub fn is_failure(&self) -> bool {
        matches!(self, StopReason::AllWorkersFailed | StopReason::NoClients)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    cond: Condvar,
}

/// Clonable stop signal. Every blocking wait in the engine goes through
/// [`CancellationToken::wait_timeout`], so cancelling wakes all of them.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. The first reason wins; returns false if the token
    /// was already cancelled.
    pub fn cancel(&self, reason: StopReason) -> bool {
        let mut slot = self.inner.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.cond.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.inner.reason.lock()
    }

    /// Sleep for up to `timeout`, waking early on cancellation.
    /// Returns true if the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut slot = self.inner.reason.lock();
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while slot.is_none() {
                self.inner.cond.wait(&mut slot);
            }
            return true;
        };
        while slot.is_none() {
            if self.inner.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.is_some()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

/// Join a thread, giving up after `timeout`. On timeout the handle is
/// returned so the caller can decide to detach it.
pub fn join_with_timeout<T>(
    handle: JoinHandle<T>,
    timeout: Duration,
) -> Result<thread::Result<T>, JoinHandle<T>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        thread::sleep(JOIN_POLL);
    }
    Ok(handle.join())
}

const JOIN_POLL: Duration = Duration::from_millis(10);
