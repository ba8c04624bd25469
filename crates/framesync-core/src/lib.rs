//! Owner-thread synchronization for frame-stepped loops.
//!
//! A game-style main loop owns one thread and advances its world once per
//! frame.  This crate lets any other thread reach that owner thread safely:
//!
//! - **[`identity`]** -- records the owner thread and answers "am I on it?".
//! - **[`slot`]** -- single-assignment result slots; every [`Awaitable`]
//!   resolves exactly once to a value, a fault, or cancellation.
//! - **[`dispatch`]** -- fire-and-forget and awaitable dispatch onto the
//!   owner thread, with a synchronous fast path when already there.
//! - **[`scheduler`]** -- an executor whose polls and continuations all run
//!   on the owner thread, plus a bound task factory.
//! - **[`coroutine`]** -- adapts step sequences driven one step per frame
//!   into awaitable, optionally cancelable handles.
//! - **[`construct`]** -- owner-thread-only object instantiation.
//! - **[`context`]** -- the explicitly built [`OwnerContext`] and its
//!   process-wide accessor.
//! - **[`error`]** -- [`SyncError`] via [`thiserror`].
//!
//! The crate starts no threads.  The frame loop itself is an external
//! collaborator reached through [`PostingChannel`] and [`CoroutineHost`].

pub mod channel;
pub mod construct;
pub mod context;
pub mod coroutine;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod scheduler;
pub mod slot;

pub use channel::{Callback, PostingChannel};
pub use construct::ObjectFactory;
pub use context::{
    OwnerContext, context, install, instantiate_async, is_owner_thread, owner_thread_id,
    run_on_owner_thread, run_on_owner_thread_async, start_cancelable_coroutine_async,
    start_coroutine_async, task_factory,
};
pub use coroutine::{
    Coroutine, CoroutineAdapter, CoroutineHandle, CoroutineHost, CoroutineId, CoroutineState,
    FrameDriven, Step, StepError, StepResult,
};
pub use dispatch::Dispatcher;
pub use error::{Result, SyncError};
pub use identity::OwnerThread;
pub use scheduler::{OwnerScheduler, OwnerTaskFactory};
pub use slot::{Awaitable, Completer, Outcome, SlotStatus, SlotWatch, result_slot};
pub use tokio_util::sync::CancellationToken;
