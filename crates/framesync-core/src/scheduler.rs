//! Owner-affine task scheduler.
//!
//! [`OwnerScheduler`] is an executor whose every poll happens on the owner
//! thread.  Spawning a future from a worker thread posts its first poll
//! through the [`Dispatcher`]; whenever the future is woken (for example by
//! an [`Awaitable`] resolved on a worker thread) the next poll is posted
//! again.  Continuations chained through [`OwnerTaskFactory`] therefore
//! always observe `is_owner_thread() == true`.
//!
//! # Poll routing
//!
//! ```text
//! spawn  --run_on_owner_thread-->  poll (inline when already on owner)
//! wake   --post------------------>  poll (always queued, never re-entrant)
//! ```
//!
//! Wakes are coalesced: a task that is already queued is not posted twice.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::{ArcWake, waker_ref};

use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::slot::{Awaitable, Completer, result_slot};

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Scheduling policy that runs every continuation on the owner thread.
#[derive(Clone, Debug)]
pub struct OwnerScheduler {
    dispatcher: Dispatcher,
}

impl OwnerScheduler {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Execute one continuation body on the owner thread.
    pub fn execute<F>(&self, continuation: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatcher.run_on_owner_thread(continuation)
    }

    /// Drive `future` to completion on the owner thread.
    pub fn spawn<Fut>(&self, future: Fut) -> Awaitable<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let (completer, awaitable) = result_slot(Some(self.dispatcher.owner()));
        let task = Arc::new(OwnerTask {
            state: Mutex::new(Some(TaskState {
                future: Box::pin(future),
                completer,
            })),
            queued: AtomicBool::new(true),
            dispatcher: self.dispatcher.clone(),
        });

        let first = Arc::clone(&task);
        if let Err(err) = self.dispatcher.run_on_owner_thread(move || first.run()) {
            task.fail(err);
        }
        awaitable
    }

    /// A task factory bound to this scheduler.
    pub fn factory(&self) -> OwnerTaskFactory {
        OwnerTaskFactory {
            scheduler: self.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task factory
// ---------------------------------------------------------------------------

/// Creates tasks whose bodies and continuations run on the owner thread.
#[derive(Clone, Debug)]
pub struct OwnerTaskFactory {
    scheduler: OwnerScheduler,
}

impl OwnerTaskFactory {
    pub fn scheduler(&self) -> &OwnerScheduler {
        &self.scheduler
    }

    /// Run `func` as a task on the owner thread.
    pub fn start_new<T, F>(&self, func: F) -> Awaitable<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.scheduler.spawn(async move { func() })
    }

    /// Drive `future` on the owner thread.
    pub fn spawn<Fut>(&self, future: Fut) -> Awaitable<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.scheduler.spawn(future)
    }

    /// Run `continuation` on the owner thread once `antecedent` resolves,
    /// whichever thread resolves it.
    pub fn continue_with<T, U, F>(&self, antecedent: Awaitable<T>, continuation: F) -> Awaitable<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.scheduler
            .spawn(async move { continuation(antecedent.await) })
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

struct OwnerTask<T> {
    /// `None` once the future finished (or the task was failed).
    state: Mutex<Option<TaskState<T>>>,
    /// Set while a poll is queued on the owner thread.
    queued: AtomicBool,
    dispatcher: Dispatcher,
}

struct TaskState<T> {
    future: BoxFuture<'static, T>,
    completer: Completer<T>,
}

impl<T: Send + 'static> OwnerTask<T> {
    /// Poll once.  Runs on the owner thread.
    fn run(self: Arc<Self>) {
        self.queued.store(false, Ordering::Release);

        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = guard.as_mut() else {
            return;
        };

        let waker = waker_ref(&self);
        let mut cx = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| state.future.as_mut().poll(&mut cx)));

        let finished = match polled {
            Ok(Poll::Pending) => return,
            Ok(Poll::Ready(value)) => Ok(value),
            Err(payload) => Err(SyncError::from_panic(payload)),
        };
        let Some(state) = guard.take() else {
            return;
        };
        drop(guard);

        match finished {
            Ok(value) => {
                state.completer.complete(value);
            }
            Err(err) => {
                tracing::error!(error = %err, "owner task panicked");
                state.completer.fail(err);
            }
        }
    }

    /// Resolve the task's slot with `err` and drop its future.
    fn fail(&self, err: SyncError) {
        // `try_lock`: a wake may arrive from inside this task's own poll.
        let state = match self.state.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(state) = state {
            state.completer.fail(err);
        }
    }
}

impl<T: Send + 'static> ArcWake for OwnerTask<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = Arc::clone(arc_self);
        if let Err(err) = arc_self.dispatcher.post(move || task.run()) {
            arc_self.fail(err);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
