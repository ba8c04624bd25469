//! Cross-thread dispatcher.
//!
//! [`Dispatcher`] moves work onto the owner thread.  Every entry point checks
//! the calling thread first: on the owner thread the work runs synchronously,
//! which is what keeps an owner-thread caller from queueing work behind
//! itself and then waiting for it.  Everywhere else the work is wrapped and
//! handed to the [`PostingChannel`].
//!
//! | Entry point                          | Result                        |
//! |--------------------------------------|-------------------------------|
//! | [`Dispatcher::run_on_owner_thread`]  | none (fire-and-forget)        |
//! | [`Dispatcher::run_on_owner_thread_async`] | [`Awaitable<T>`]         |
//! | [`Dispatcher::try_run_on_owner_thread_async`] | [`Awaitable<T>`], `Err` becomes a fault |
//! | [`Dispatcher::post`]                 | none, always queued           |

use std::convert::Infallible;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::channel::PostingChannel;
use crate::error::{Result, SyncError};
use crate::identity::OwnerThread;
use crate::slot::{Awaitable, Completer, Outcome, result_slot};

/// Routes work onto the owner thread.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    owner: OwnerThread,
    channel: Arc<dyn PostingChannel>,
}

impl Dispatcher {
    pub fn new(owner: OwnerThread, channel: Arc<dyn PostingChannel>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner { owner, channel }),
        }
    }

    pub fn owner(&self) -> OwnerThread {
        self.inner.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        self.inner.owner.is_current()
    }

    /// Fire-and-forget.
    ///
    /// On the owner thread `action` runs before this returns; elsewhere it is
    /// queued and this returns immediately.  A panic inside `action` is
    /// logged on the owner thread and never reaches the caller.
    pub fn run_on_owner_thread<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_owner_thread() {
            run_guarded(action);
            return Ok(());
        }
        self.post(action)
    }

    /// Queue `action` for the owner thread even when already on it.
    pub fn post<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .channel
            .post(Box::new(move || run_guarded(action)))
            .inspect_err(|err| {
                tracing::warn!(error = %err, "failed to post action to owner thread");
            })
    }

    /// Run `func` on the owner thread and hand back its result.
    ///
    /// A panic inside `func` resolves the awaitable with
    /// [`SyncError::Panicked`].
    pub fn run_on_owner_thread_async<T, F>(&self, func: F) -> Awaitable<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.try_run_on_owner_thread_async(move || Ok::<T, Infallible>(func()))
    }

    /// Like [`Dispatcher::run_on_owner_thread_async`] for fallible work: an
    /// `Err` resolves the awaitable with [`SyncError::ExecutionFault`].
    pub fn try_run_on_owner_thread_async<T, E, F>(&self, func: F) -> Awaitable<T>
    where
        T: Send + 'static,
        E: Display,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        let (completer, awaitable) = result_slot(Some(self.inner.owner));
        let request = DispatchRequest { func, completer };

        if self.is_owner_thread() {
            request.execute();
            return awaitable;
        }

        match self.inner.channel.post(Box::new(move || request.execute())) {
            Ok(()) => {
                tracing::trace!("dispatch request posted to owner thread");
                awaitable
            }
            Err(err) => {
                // The rejected callback took the completer down with it.
                tracing::warn!(error = %err, "failed to post dispatch request");
                Awaitable::resolved(Outcome::Fault(err))
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("owner", &self.inner.owner)
            .finish_non_exhaustive()
    }
}

/// Work plus the slot its result goes to.
struct DispatchRequest<F, T> {
    func: F,
    completer: Completer<T>,
}

impl<F, T, E> DispatchRequest<F, T>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: Display,
{
    fn execute(self) {
        let Self { func, completer } = self;
        match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(Ok(value)) => {
                completer.complete(value);
            }
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "dispatched work returned an error");
                completer.fail(SyncError::ExecutionFault {
                    message: err.to_string(),
                });
            }
            Err(payload) => {
                let err = SyncError::from_panic(payload);
                tracing::error!(error = %err, "dispatched work panicked");
                completer.fail(err);
            }
        }
    }
}

/// Run `action`, logging instead of unwinding if it panics.
pub(crate) fn run_guarded<F: FnOnce()>(action: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
        let err = SyncError::from_panic(payload);
        tracing::error!(error = %err, "owner-thread action panicked");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::ManualChannel;
    use crate::slot::SlotStatus;
    use std::sync::Mutex;
    use std::thread;

    fn dispatcher() -> (Dispatcher, Arc<ManualChannel>) {
        let channel = ManualChannel::new();
        let dispatcher = Dispatcher::new(OwnerThread::current(), channel.clone());
        (dispatcher, channel)
    }

    #[test]
    fn owner_thread_runs_inline() {
        let (dispatcher, channel) = dispatcher();
        let ran = Arc::new(Mutex::new(false));
        let r = Arc::clone(&ran);

        dispatcher
            .run_on_owner_thread(move || *r.lock().unwrap() = true)
            .expect("run");

        assert!(*ran.lock().unwrap());
        assert_eq!(channel.len(), 0);
    }

    #[test]
    fn owner_thread_async_resolves_synchronously() {
        let (dispatcher, channel) = dispatcher();
        let d = dispatcher.clone();
        let awaitable = dispatcher.run_on_owner_thread_async(move || d.is_owner_thread());

        assert_eq!(awaitable.status(), SlotStatus::Completed);
        assert_eq!(channel.len(), 0);
        assert_eq!(awaitable.wait(), Ok(true));
    }

    #[test]
    fn worker_thread_posts_and_owner_resolves() {
        let (dispatcher, channel) = dispatcher();
        let d = dispatcher.clone();

        let awaitable = thread::spawn(move || {
            let inner = d.clone();
            d.run_on_owner_thread_async(move || inner.is_owner_thread())
        })
        .join()
        .expect("worker");

        assert!(!awaitable.is_completed());
        assert_eq!(channel.pump(), 1);
        assert_eq!(awaitable.wait(), Ok(true));
    }

    #[test]
    fn worker_actions_keep_posting_order() {
        let (dispatcher, channel) = dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let d = dispatcher.clone();
        let s = Arc::clone(&seen);
        thread::spawn(move || {
            for i in 0..3 {
                let s = Arc::clone(&s);
                d.run_on_owner_thread(move || s.lock().unwrap().push(i))
                    .expect("post");
            }
        })
        .join()
        .expect("worker");

        channel.pump();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn errors_and_panics_become_faults() {
        let (dispatcher, _channel) = dispatcher();

        let failed = dispatcher.try_run_on_owner_thread_async(|| Err::<u8, _>("nope"));
        assert_eq!(
            failed.wait(),
            Err(SyncError::ExecutionFault {
                message: "nope".into()
            })
        );

        let panicked = dispatcher.run_on_owner_thread_async(|| -> u8 { panic!("kaboom") });
        assert_eq!(
            panicked.wait(),
            Err(SyncError::Panicked {
                message: "kaboom".into()
            })
        );
    }

    #[test]
    fn fire_and_forget_panic_is_swallowed() {
        let (dispatcher, _channel) = dispatcher();
        assert!(dispatcher.run_on_owner_thread(|| panic!("ignored")).is_ok());
    }

    #[test]
    fn post_always_queues() {
        let (dispatcher, channel) = dispatcher();
        dispatcher.post(|| {}).expect("post");
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn closed_channel_reports_posting_failure() {
        let (dispatcher, channel) = dispatcher();
        channel.close();
        let d = dispatcher.clone();

        let (fire, awaitable) = thread::spawn(move || {
            let fire = d.run_on_owner_thread(|| {});
            (fire, d.run_on_owner_thread_async(|| 1))
        })
        .join()
        .expect("worker");

        assert!(matches!(fire, Err(SyncError::PostingFailed { .. })));
        assert!(matches!(awaitable.wait(), Err(SyncError::PostingFailed { .. })));
    }

    #[test]
    fn discarded_request_is_abandoned() {
        let (dispatcher, channel) = dispatcher();
        let d = dispatcher.clone();
        let awaitable = thread::spawn(move || d.run_on_owner_thread_async(|| 1))
            .join()
            .expect("worker");

        channel.close();
        assert_eq!(awaitable.wait(), Err(SyncError::Abandoned));
    }
}
