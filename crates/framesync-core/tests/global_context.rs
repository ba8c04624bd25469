//! Process-wide context tests.
//!
//! The global context can only be installed once per process, so the whole
//! lifecycle is exercised from a single test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use framesync_core::{
    Callback, OwnerContext, PostingChannel, Step, StepResult, SyncError, context, install,
    is_owner_thread, owner_thread_id, run_on_owner_thread, run_on_owner_thread_async,
    start_coroutine_async, task_factory,
};

#[derive(Default)]
struct QueueChannel {
    queue: Mutex<VecDeque<Callback>>,
}

impl QueueChannel {
    fn pump(&self) {
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

impl PostingChannel for QueueChannel {
    fn post(&self, callback: Callback) -> framesync_core::Result<()> {
        self.queue.lock().unwrap().push_back(callback);
        Ok(())
    }
}

struct NoopHost;

impl framesync_core::CoroutineHost for NoopHost {
    fn start(&self, _routine: Box<dyn framesync_core::FrameDriven>) {}
}

#[test]
fn global_context_lifecycle() {
    // Before install every accessor reports the missing context.
    assert_eq!(context().err(), Some(SyncError::NotInitialized));
    assert_eq!(is_owner_thread(), Err(SyncError::NotInitialized));
    assert_eq!(owner_thread_id().err(), Some(SyncError::NotInitialized));
    assert_eq!(run_on_owner_thread(|| {}), Err(SyncError::NotInitialized));
    assert!(matches!(
        run_on_owner_thread_async(|| 1),
        Err(SyncError::NotInitialized)
    ));
    assert!(matches!(
        start_coroutine_async(|| -> StepResult { Ok(Step::Done) }, Arc::new(NoopHost)),
        Err(SyncError::NotInitialized)
    ));
    assert!(task_factory().is_err());

    let channel = Arc::new(QueueChannel::default());
    let installed = install(OwnerContext::initialize(channel.clone())).expect("first install");
    assert!(installed.is_owner_thread());

    // A second install is rejected and the first context stays in place.
    let again = install(OwnerContext::initialize(channel.clone()));
    assert_eq!(again.err(), Some(SyncError::AlreadyInitialized));

    assert_eq!(is_owner_thread(), Ok(true));
    assert_eq!(owner_thread_id(), Ok(thread::current().id()));

    let from_worker = thread::spawn(|| {
        let on_owner = is_owner_thread().expect("installed");
        let awaitable =
            run_on_owner_thread_async(|| is_owner_thread().expect("installed")).expect("dispatch");
        (on_owner, awaitable)
    })
    .join()
    .expect("worker");

    assert!(!from_worker.0);
    channel.pump();
    assert_eq!(from_worker.1.wait(), Ok(true));

    let factory_result = task_factory()
        .expect("factory")
        .start_new(|| is_owner_thread().expect("installed"));
    assert_eq!(factory_result.wait(), Ok(true));
}
