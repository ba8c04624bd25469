//! Owner context and the process-wide accessor.
//!
//! An [`OwnerContext`] is built once, on the owner thread, from the loop's
//! [`PostingChannel`].  It bundles the identity, dispatcher, scheduler and
//! coroutine adapter and can be passed around explicitly (tests build as
//! many as they like).  Code that prefers ambient access installs one
//! context with [`install`] and reaches it through [`context`] or the free
//! functions re-exported at the crate root.

use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

use tokio_util::sync::CancellationToken;

use crate::channel::PostingChannel;
use crate::construct::{self, ObjectFactory};
use crate::coroutine::{Coroutine, CoroutineAdapter, CoroutineHandle, CoroutineHost};
use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::identity::OwnerThread;
use crate::scheduler::{OwnerScheduler, OwnerTaskFactory};
use crate::slot::Awaitable;

/// Everything needed to reach the owner thread.
///
/// Cheaply cloneable; all clones share the same dispatcher.
#[derive(Clone, Debug)]
pub struct OwnerContext {
    owner: OwnerThread,
    dispatcher: Dispatcher,
    scheduler: OwnerScheduler,
    coroutines: CoroutineAdapter,
}

impl OwnerContext {
    /// Capture the calling thread as owner and bind it to `channel`.
    ///
    /// Must be called on the thread that runs the frame loop.
    pub fn initialize(channel: Arc<dyn PostingChannel>) -> Self {
        let owner = OwnerThread::current();
        let dispatcher = Dispatcher::new(owner, channel);
        tracing::info!(owner_thread = ?owner.id(), "owner context initialized");
        Self {
            owner,
            scheduler: OwnerScheduler::new(dispatcher.clone()),
            coroutines: CoroutineAdapter::new(dispatcher.clone()),
            dispatcher,
        }
    }

    pub fn owner(&self) -> OwnerThread {
        self.owner
    }

    pub fn owner_thread_id(&self) -> ThreadId {
        self.owner.id()
    }

    pub fn is_owner_thread(&self) -> bool {
        self.owner.is_current()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &OwnerScheduler {
        &self.scheduler
    }

    pub fn task_factory(&self) -> OwnerTaskFactory {
        self.scheduler.factory()
    }

    pub fn coroutines(&self) -> &CoroutineAdapter {
        &self.coroutines
    }

    // -- Forwarders ---------------------------------------------------------

    pub fn run_on_owner_thread<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatcher.run_on_owner_thread(action)
    }

    pub fn run_on_owner_thread_async<T, F>(&self, func: F) -> Awaitable<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.dispatcher.run_on_owner_thread_async(func)
    }

    pub fn instantiate_async<F: ObjectFactory>(
        &self,
        factory: Arc<F>,
        descriptor: F::Descriptor,
        parent: Option<F::Parent>,
    ) -> Awaitable<F::Object> {
        construct::instantiate_async(&self.dispatcher, factory, descriptor, parent)
    }

    pub fn start_coroutine_async<C, H>(&self, routine: C, host: Arc<H>) -> CoroutineHandle
    where
        C: Coroutine,
        H: CoroutineHost + ?Sized + 'static,
    {
        self.coroutines.start_coroutine_async(routine, host)
    }

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
        self.coroutines
            .start_cancelable_coroutine_async(routine, host, token)
    }
}

// ---------------------------------------------------------------------------
// Process-wide context
// ---------------------------------------------------------------------------

static GLOBAL: OnceLock<OwnerContext> = OnceLock::new();

/// Install `ctx` as the process-wide owner context.  Only the first install
/// succeeds.
pub fn install(ctx: OwnerContext) -> Result<&'static OwnerContext> {
    let mut installed = false;
    let stored = GLOBAL.get_or_init(|| {
        installed = true;
        ctx
    });
    if installed {
        Ok(stored)
    } else {
        Err(SyncError::AlreadyInitialized)
    }
}

/// The installed context, or [`SyncError::NotInitialized`].
pub fn context() -> Result<&'static OwnerContext> {
    GLOBAL.get().ok_or(SyncError::NotInitialized)
}

/// [`OwnerContext::is_owner_thread`] on the installed context.
pub fn is_owner_thread() -> Result<bool> {
    context().map(OwnerContext::is_owner_thread)
}

/// [`OwnerContext::owner_thread_id`] on the installed context.
pub fn owner_thread_id() -> Result<ThreadId> {
    context().map(OwnerContext::owner_thread_id)
}

/// [`Dispatcher::run_on_owner_thread`] on the installed context.
pub fn run_on_owner_thread<F>(action: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    context()?.run_on_owner_thread(action)
}

/// [`Dispatcher::run_on_owner_thread_async`] on the installed context.
pub fn run_on_owner_thread_async<T, F>(func: F) -> Result<Awaitable<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Ok(context()?.run_on_owner_thread_async(func))
}

/// [`construct::instantiate_async`] on the installed context.
pub fn instantiate_async<F: ObjectFactory>(
    factory: Arc<F>,
    descriptor: F::Descriptor,
    parent: Option<F::Parent>,
) -> Result<Awaitable<F::Object>> {
    Ok(context()?.instantiate_async(factory, descriptor, parent))
}

/// [`CoroutineAdapter::start_coroutine_async`] on the installed context.
pub fn start_coroutine_async<C, H>(routine: C, host: Arc<H>) -> Result<CoroutineHandle>
where
    C: Coroutine,
    H: CoroutineHost + ?Sized + 'static,
{
    Ok(context()?.start_coroutine_async(routine, host))
}

/// [`CoroutineAdapter::start_cancelable_coroutine_async`] on the installed
/// context.
pub fn start_cancelable_coroutine_async<C, H>(
    routine: C,
    host: Arc<H>,
    token: &CancellationToken,
) -> Result<CoroutineHandle>
where
    C: Coroutine,
    H: CoroutineHost + ?Sized + 'static,
{
    Ok(context()?.start_cancelable_coroutine_async(routine, host, token))
}

/// The installed context's task factory.
pub fn task_factory() -> Result<OwnerTaskFactory> {
    context().map(OwnerContext::task_factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::ManualChannel;
    use std::thread;

    #[test]
    fn context_reports_owner_identity() {
        let ctx = OwnerContext::initialize(ManualChannel::new());
        assert!(ctx.is_owner_thread());
        assert_eq!(ctx.owner_thread_id(), thread::current().id());

        let worker = ctx.clone();
        assert!(!thread::spawn(move || worker.is_owner_thread())
            .join()
            .expect("worker"));
    }

    #[test]
    fn clones_share_one_dispatcher() {
        let channel = ManualChannel::new();
        let ctx = OwnerContext::initialize(channel.clone());
        let other = ctx.clone();

        let awaitable = thread::spawn(move || other.run_on_owner_thread_async(|| 11))
            .join()
            .expect("worker");
        assert_eq!(channel.pump(), 1);
        assert_eq!(awaitable.wait(), Ok(11));
    }
}
