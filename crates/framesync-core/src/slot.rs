//! Single-assignment result slots.
//!
//! A slot is created with [`result_slot`], which hands back the writer half
//! ([`Completer`]) and the reader half ([`Awaitable`]).  The slot starts
//! pending and transitions exactly once to one of:
//!
//! ```text
//! Pending  -->  Completed(value)
//!          \->  Faulted(error)
//!          \->  Canceled
//! ```
//!
//! After the transition the slot is immutable.  Later resolution attempts are
//! ignored and reported as `false`.  Any number of [`SlotWatch`] observers may
//! read the final status; the value itself is handed to the single
//! [`Awaitable`], either by blocking ([`Awaitable::wait`]) or by `.await`.
//!
//! Blocking on the owner thread for a slot that is still pending can never
//! succeed (the owner thread is the one that would resolve it), so such waits
//! fail with [`SyncError::WouldDeadlock`] instead of hanging the frame loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::{Result, SyncError};
use crate::identity::OwnerThread;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Terminal outcome written into a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Value(T),
    Fault(SyncError),
    Canceled,
}

impl<T> Outcome<T> {
    fn status(&self) -> SlotStatus {
        match self {
            Self::Value(_) => SlotStatus::Completed,
            Self::Fault(_) => SlotStatus::Faulted,
            Self::Canceled => SlotStatus::Canceled,
        }
    }

    /// Collapse into the `Result` shape callers consume.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Fault(e) => Err(e),
            Self::Canceled => Err(SyncError::Canceled),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => Self::Value(v),
            Err(SyncError::Canceled) => Self::Canceled,
            Err(e) => Self::Fault(e),
        }
    }
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    Pending,
    Completed,
    Faulted,
    Canceled,
}

impl SlotStatus {
    /// Any state other than `Pending`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Create an empty slot.
///
/// `owner` enables the self-deadlock guard on blocking waits; pass `None` for
/// slots that are not tied to an owner thread.
pub fn result_slot<T>(owner: Option<OwnerThread>) -> (Completer<T>, Awaitable<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            status: SlotStatus::Pending,
            outcome: None,
            waker: None,
        }),
        ready: Condvar::new(),
        owner,
    });
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        Awaitable { shared },
    )
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    owner: Option<OwnerThread>,
}

struct State<T> {
    status: SlotStatus,
    /// Present between resolution and the moment the awaitable takes it.
    outcome: Option<Outcome<T>>,
    /// Task of the most recent poll of the single reader.
    waker: Option<Waker>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> SlotStatus {
        self.lock().status
    }

    fn resolve(&self, outcome: Outcome<T>) -> bool {
        let waker = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = outcome.status();
            state.outcome = Some(outcome);
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    fn would_deadlock(&self) -> bool {
        self.owner.is_some_and(|owner| owner.is_current())
    }

    /// Block until terminal or `deadline`.  Returns the guard in either case.
    fn block_until_terminal(&self, deadline: Option<Instant>) -> Result<MutexGuard<'_, State<T>>> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return Ok(state);
        }
        if self.would_deadlock() {
            return Err(SyncError::WouldDeadlock);
        }
        while !state.status.is_terminal() {
            match deadline {
                None => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SyncError::Timeout);
                    }
                    state = self
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Writer half
// ---------------------------------------------------------------------------

/// Writer half of a slot.
///
/// Dropping a completer that never resolved its slot faults the slot with
/// [`SyncError::Abandoned`], so awaiting code is released when the owner loop
/// discards a request without running it.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completer<T> {
    /// Resolve with a value.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(Outcome::Value(value))
    }

    /// Resolve with a fault.
    pub fn fail(&self, error: SyncError) -> bool {
        self.resolve(Outcome::from(Err(error)))
    }

    /// Resolve as canceled.
    pub fn cancel(&self) -> bool {
        self.resolve(Outcome::Canceled)
    }

    /// Resolve with an explicit outcome.  Returns `false` (and leaves the
    /// slot untouched) if it was already resolved.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        let resolved = self.shared.resolve(outcome);
        if !resolved {
            tracing::warn!(
                status = ?self.shared.status(),
                "result slot already resolved; ignoring second resolution"
            );
        }
        resolved
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.status().is_terminal()
    }

    /// A status observer for this slot.
    pub fn watch(&self) -> SlotWatch<T> {
        SlotWatch {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.shared.resolve(Outcome::Fault(SyncError::Abandoned)) {
            tracing::debug!("result slot abandoned before resolution");
        }
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("status", &self.shared.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Reader half
// ---------------------------------------------------------------------------

/// Reader half of a slot: a result that may not be available yet.
///
/// Resolve it by blocking with [`Awaitable::wait`] from a worker thread, or by
/// `.await`ing it from async code on any thread.
#[must_use = "an awaitable does nothing unless waited on or observed"]
pub struct Awaitable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Awaitable<T> {
    /// An already-resolved awaitable.
    pub fn resolved(outcome: Outcome<T>) -> Self {
        let (completer, awaitable) = result_slot(None);
        completer.shared.resolve(outcome);
        awaitable
    }

    pub fn status(&self) -> SlotStatus {
        self.shared.status()
    }

    /// `true` once the slot reached any terminal state.
    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    /// A status observer that outlives this awaitable.
    pub fn watch(&self) -> SlotWatch<T> {
        SlotWatch {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until resolved and return the outcome.
    ///
    /// Fails with [`SyncError::WouldDeadlock`] when called on the owner
    /// thread while the slot is still pending.
    pub fn wait(self) -> Result<T> {
        let mut state = self.shared.block_until_terminal(None)?;
        take_outcome(&mut state)
    }

    /// Like [`Awaitable::wait`], giving up with [`SyncError::Timeout`] after
    /// `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.block_until_terminal(Some(deadline))?;
        take_outcome(&mut state)
    }

    /// Take the outcome without blocking, if there is one.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        let mut state = self.shared.lock();
        if state.status.is_terminal() {
            Some(take_outcome(&mut state))
        } else {
            None
        }
    }
}

fn take_outcome<T>(state: &mut State<T>) -> Result<T> {
    // `None` only after the outcome was already handed out (polled after
    // completion).
    state
        .outcome
        .take()
        .map(Outcome::into_result)
        .unwrap_or(Err(SyncError::Abandoned))
}

impl<T> Future for Awaitable<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        if state.status.is_terminal() {
            return Poll::Ready(take_outcome(&mut state));
        }
        let waker = cx.waker();
        if !state.waker.as_ref().is_some_and(|w| w.will_wake(waker)) {
            state.waker = Some(waker.clone());
        }
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for Awaitable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awaitable")
            .field("status", &self.status())
            .finish()
    }
}

/// Status-only observer of a slot.  Cheap to clone; never sees the value.
pub struct SlotWatch<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SlotWatch<T> {
    pub fn status(&self) -> SlotStatus {
        self.shared.status()
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block until the slot is terminal and return its status.
    pub fn wait_done(&self) -> Result<SlotStatus> {
        self.shared.block_until_terminal(None).map(|s| s.status)
    }

    /// Block until terminal or `timeout`.
    pub fn wait_done_timeout(&self, timeout: Duration) -> Result<SlotStatus> {
        let deadline = Instant::now() + timeout;
        self.shared
            .block_until_terminal(Some(deadline))
            .map(|s| s.status)
    }
}

impl<T> Clone for SlotWatch<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for SlotWatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotWatch")
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
