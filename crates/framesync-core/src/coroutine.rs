//! Cooperative-task adapter.
//!
//! A [`Coroutine`] is a step sequence that the frame loop resumes once per
//! frame.  The adapter wraps it in a state machine, hands it to a
//! [`CoroutineHost`] on the owner thread, and returns a [`CoroutineHandle`]
//! that any thread can block on or `.await`.
//!
//! # Lifecycle
//!
//! ```text
//! Created  -->  Running  -->  Completed
//!                        \->  Faulted    (step returned Err or panicked)
//!                        \->  Canceled   (token observed between steps)
//! ```
//!
//! Cancellation is cooperative: the token is checked at the start of every
//! frame's advance, never in the middle of a step.  Canceling after the
//! sequence completed has no effect.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::slot::{Awaitable, Completer, Outcome, SlotStatus, SlotWatch, result_slot};

// ---------------------------------------------------------------------------
// Step sequence
// ---------------------------------------------------------------------------

/// Unique, time-ordered coroutine identifier (UUID v7).
pub type CoroutineId = Uuid;

/// What a step asks of the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Suspend until the next frame.
    Yield,
    /// The sequence has no more steps.
    Done,
}

/// Error raised from inside a step.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Result of resuming a step.
pub type StepResult = std::result::Result<Step, StepError>;

/// A step sequence resumed once per frame.
pub trait Coroutine: Send + 'static {
    fn resume(&mut self) -> StepResult;
}

impl<F> Coroutine for F
where
    F: FnMut() -> StepResult + Send + 'static,
{
    fn resume(&mut self) -> StepResult {
        self()
    }
}

/// Adapt an iterator: every item is one step, exhaustion is the natural end.
pub fn from_iter<I>(iter: I) -> IterCoroutine<I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
{
    IterCoroutine {
        iter: iter.into_iter(),
    }
}

/// See [`from_iter`].
#[derive(Debug)]
pub struct IterCoroutine<I> {
    iter: I,
}

impl<I> Coroutine for IterCoroutine<I>
where
    I: Iterator + Send + 'static,
{
    fn resume(&mut self) -> StepResult {
        Ok(match self.iter.next() {
            Some(_) => Step::Yield,
            None => Step::Done,
        })
    }
}

// ---------------------------------------------------------------------------
// Host seam
// ---------------------------------------------------------------------------

/// The owner-side view of a started coroutine, advanced by the host.
pub trait FrameDriven: Send {
    fn id(&self) -> CoroutineId;

    /// Resume one step.  Called once per frame on the owner thread until it
    /// returns [`Step::Done`]; further calls keep returning `Done`.
    fn advance(&mut self) -> Step;
}

/// The frame loop's per-frame stepper.
pub trait CoroutineHost: Send + Sync {
    /// Adopt `routine` and advance it once per frame from now on.
    ///
    /// Always called on the owner thread.  A host that drops the routine
    /// instead of driving it resolves its handle with
    /// [`SyncError::Abandoned`].
    fn start(&self, routine: Box<dyn FrameDriven>);
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a managed coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoroutineState {
    Created,
    Running,
    Completed,
    Faulted,
    Canceled,
}

impl CoroutineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted | Self::Canceled)
    }
}

struct ManagedCoroutine<C> {
    id: CoroutineId,
    routine: C,
    token: Option<CancellationToken>,
    completer: Completer<()>,
    state: CoroutineState,
    steps: u64,
}

impl<C: Coroutine> ManagedCoroutine<C> {
    fn finish(&mut self, state: CoroutineState, outcome: Outcome<()>) -> Step {
        self.state = state;
        self.completer.resolve(outcome);
        tracing::debug!(
            coroutine_id = %self.id,
            steps = self.steps,
            ?state,
            "coroutine finished"
        );
        Step::Done
    }
}

impl<C: Coroutine> FrameDriven for ManagedCoroutine<C> {
    fn id(&self) -> CoroutineId {
        self.id
    }

    fn advance(&mut self) -> Step {
        if self.state.is_terminal() {
            return Step::Done;
        }
        self.state = CoroutineState::Running;

        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return self.finish(CoroutineState::Canceled, Outcome::Canceled);
        }

        let resumed = panic::catch_unwind(AssertUnwindSafe(|| self.routine.resume()));
        self.steps += 1;
        match resumed {
            Ok(Ok(Step::Yield)) => Step::Yield,
            Ok(Ok(Step::Done)) => self.finish(CoroutineState::Completed, Outcome::Value(())),
            Ok(Err(err)) => {
                tracing::warn!(coroutine_id = %self.id, error = %err, "coroutine step failed");
                let fault = SyncError::ExecutionFault {
                    message: err.to_string(),
                };
                self.finish(CoroutineState::Faulted, Outcome::Fault(fault))
            }
            Err(payload) => {
                let fault = SyncError::from_panic(payload);
                tracing::error!(coroutine_id = %self.id, error = %fault, "coroutine step panicked");
                self.finish(CoroutineState::Faulted, Outcome::Fault(fault))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Starts coroutines on the owner thread and bridges their completion.
#[derive(Clone, Debug)]
pub struct CoroutineAdapter {
    dispatcher: Dispatcher,
}

impl CoroutineAdapter {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Start `routine` under `host`.  The handle resolves when the sequence
    /// ends, or with a fault if a step fails.
    pub fn start_coroutine_async<C, H>(&self, routine: C, host: Arc<H>) -> CoroutineHandle
    where
        C: Coroutine,
        H: CoroutineHost + ?Sized + 'static,
    {
        self.start(routine, host, None)
    }

    /// Like [`CoroutineAdapter::start_coroutine_async`], additionally stopping
    /// the sequence at the first frame boundary after `token` is canceled.
    pub fn start_cancelable_coroutine_async<C, H>(
        &self,
        routine: C,
        host: Arc<H>,
        token: &CancellationToken,
    ) -> CoroutineHandle
    where
        C: Coroutine,
        H: CoroutineHost + ?Sized + 'static,
    {
        self.start(routine, host, Some(token.child_token()))
    }

    fn start<C, H>(
        &self,
        routine: C,
        host: Arc<H>,
        token: Option<CancellationToken>,
    ) -> CoroutineHandle
    where
        C: Coroutine,
        H: CoroutineHost + ?Sized + 'static,
    {
        let id = Uuid::now_v7();
        let (completer, completion) = result_slot(Some(self.dispatcher.owner()));
        let managed = ManagedCoroutine {
            id,
            routine,
            token: token.clone(),
            completer,
            state: CoroutineState::Created,
            steps: 0,
        };

        tracing::debug!(coroutine_id = %id, cancelable = token.is_some(), "starting coroutine");

        // On the owner thread this only registers the routine with the host;
        // stepping always happens on later frames.
        let started = self
            .dispatcher
            .run_on_owner_thread(move || host.start(Box::new(managed)));

        let completion = match started {
            Ok(()) => completion,
            Err(err) => Awaitable::resolved(Outcome::Fault(err)),
        };
        CoroutineHandle {
            id,
            completion,
            token,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller-side handle of a started coroutine.
///
/// Resolves to `Ok(())` on completion, [`SyncError::Canceled`] on
/// cancellation, or a fault.
#[must_use = "a coroutine handle does nothing unless waited on or observed"]
#[derive(Debug)]
pub struct CoroutineHandle {
    id: CoroutineId,
    completion: Awaitable<()>,
    token: Option<CancellationToken>,
}

impl CoroutineHandle {
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    /// Request cancellation.  Returns `false` for coroutines started without
    /// a cancellation token.
    pub fn cancel(&self) -> bool {
        match &self.token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelable(&self) -> bool {
        self.token.is_some()
    }

    pub fn status(&self) -> SlotStatus {
        self.completion.status()
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_completed()
    }

    pub fn watch(&self) -> SlotWatch<()> {
        self.completion.watch()
    }

    /// Block until the coroutine ends.  See [`Awaitable::wait`].
    pub fn wait(self) -> Result<()> {
        self.completion.wait()
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<()> {
        self.completion.wait_timeout(timeout)
    }

    pub fn into_awaitable(self) -> Awaitable<()> {
        self.completion
    }
}

impl Future for CoroutineHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::ManualChannel;
    use crate::identity::OwnerThread;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    /// Keeps adopted routines and advances them on demand.
    #[derive(Default)]
    struct StepHost {
        routines: Mutex<Vec<Box<dyn FrameDriven>>>,
    }

    impl StepHost {
        fn frame(&self) {
            self.routines
                .lock()
                .unwrap()
                .retain_mut(|r| r.advance() == Step::Yield);
        }

        fn active(&self) -> usize {
            self.routines.lock().unwrap().len()
        }
    }

    impl CoroutineHost for StepHost {
        fn start(&self, routine: Box<dyn FrameDriven>) {
            self.routines.lock().unwrap().push(routine);
        }
    }

    fn adapter() -> (CoroutineAdapter, Arc<ManualChannel>, Arc<StepHost>) {
        let channel = ManualChannel::new();
        let dispatcher = Dispatcher::new(OwnerThread::current(), channel.clone());
        (
            CoroutineAdapter::new(dispatcher),
            channel,
            Arc::new(StepHost::default()),
        )
    }

    fn counting(count: Arc<AtomicU32>, count_to: u32) -> impl Coroutine {
        move || -> StepResult {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n < count_to { Step::Yield } else { Step::Done })
        }
    }

    #[test]
    fn completes_after_required_frames() {
        let (adapter, _channel, host) = adapter();
        let count = Arc::new(AtomicU32::new(0));

        let handle = adapter.start_coroutine_async(counting(Arc::clone(&count), 3), host.clone());
        // Started from the owner thread: registered, but no step ran yet.
        assert_eq!(host.active(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        host.frame();
        host.frame();
        assert!(!handle.is_finished());

        host.frame();
        assert_eq!(handle.status(), SlotStatus::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(host.active(), 0);
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn worker_start_goes_through_channel() {
        let (adapter, channel, host) = adapter();
        let h = host.clone();
        let handle = thread::spawn(move || adapter.start_coroutine_async(from_iter(0..1), h))
            .join()
            .expect("worker");

        assert_eq!(host.active(), 0);
        channel.pump();
        assert_eq!(host.active(), 1);

        host.frame();
        host.frame();
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn cancellation_is_observed_between_steps() {
        let (adapter, _channel, host) = adapter();
        let token = CancellationToken::new();
        let forever = || -> StepResult { Ok(Step::Yield) };

        let handle = adapter.start_cancelable_coroutine_async(forever, host.clone(), &token);
        host.frame();
        host.frame();
        assert!(!handle.is_finished());

        token.cancel();
        assert!(!handle.is_finished());

        host.frame();
        assert_eq!(handle.status(), SlotStatus::Canceled);
        assert_eq!(host.active(), 0);
        assert!(handle.wait().unwrap_err().is_canceled());
    }

    #[test]
    fn cancel_after_completion_has_no_effect() {
        let (adapter, _channel, host) = adapter();
        let token = CancellationToken::new();

        let handle =
            adapter.start_cancelable_coroutine_async(from_iter(None::<()>), host.clone(), &token);
        host.frame();
        assert!(handle.cancel());
        assert_eq!(handle.status(), SlotStatus::Completed);
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn handle_cancel_does_not_cancel_callers_token() {
        let (adapter, _channel, host) = adapter();
        let token = CancellationToken::new();

        let forever = || -> StepResult { Ok(Step::Yield) };
        let handle = adapter.start_cancelable_coroutine_async(forever, host.clone(), &token);
        assert!(handle.cancel());
        assert!(!token.is_cancelled());

        host.frame();
        assert_eq!(handle.status(), SlotStatus::Canceled);
    }

    #[test]
    fn plain_coroutine_is_not_cancelable() {
        let (adapter, _channel, host) = adapter();
        let handle = adapter.start_coroutine_async(|| -> StepResult { Ok(Step::Yield) }, host);
        assert!(!handle.is_cancelable());
        assert!(!handle.cancel());
    }

    #[test]
    fn failing_step_faults_the_handle() {
        let (adapter, _channel, host) = adapter();
        let mut frames = 0;
        let routine = move || -> StepResult {
            frames += 1;
            if frames == 2 {
                return Err("step exploded".into());
            }
            Ok(Step::Yield)
        };

        let handle = adapter.start_coroutine_async(routine, host.clone());
        host.frame();
        host.frame();
        assert_eq!(
            handle.wait(),
            Err(SyncError::ExecutionFault {
                message: "step exploded".into()
            })
        );
    }

    #[test]
    fn panicking_step_faults_the_handle() {
        let (adapter, _channel, host) = adapter();
        let handle =
            adapter.start_coroutine_async(|| -> StepResult { panic!("bad step") }, host.clone());
        host.frame();
        assert!(matches!(handle.wait(), Err(SyncError::Panicked { .. })));
    }

    #[test]
    fn dropped_routine_is_abandoned() {
        struct DroppingHost;
        impl CoroutineHost for DroppingHost {
            fn start(&self, _routine: Box<dyn FrameDriven>) {}
        }

        let (adapter, _channel, _host) = adapter();
        let forever = || -> StepResult { Ok(Step::Yield) };
        let handle = adapter.start_coroutine_async(forever, Arc::new(DroppingHost));
        assert_eq!(handle.wait(), Err(SyncError::Abandoned));
    }

    #[test]
    fn advance_after_done_stays_done() {
        let (completer, _completion) = result_slot::<()>(None);
        let mut managed = ManagedCoroutine {
            id: Uuid::now_v7(),
            routine: from_iter(0..1),
            token: None,
            completer,
            state: CoroutineState::Created,
            steps: 0,
        };
        assert_eq!(managed.advance(), Step::Yield);
        assert_eq!(managed.advance(), Step::Done);
        assert_eq!(managed.advance(), Step::Done);
        assert_eq!(managed.steps, 2);
        assert_eq!(managed.state, CoroutineState::Completed);
    }
}
