//! Object-construction bridge.
//!
//! Host object models usually forbid construction off the owner thread.
//! [`instantiate_async`] routes an [`ObjectFactory::construct`] call through
//! the dispatcher so the factory only ever runs on the owner thread, and
//! attaches the object to its parent within that same call.

use std::fmt::Display;
use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::slot::Awaitable;

/// The host's object-construction primitive.
pub trait ObjectFactory: Send + Sync + 'static {
    /// Template the object is built from (a prefab or similar).
    type Descriptor: Send + 'static;
    /// Placement target for the new object.
    type Parent: Send + 'static;
    /// Reference to the constructed object.
    type Object: Send + 'static;
    type Error: Display;

    /// Build an object from `descriptor`, attached under `parent` when given.
    ///
    /// Only ever invoked on the owner thread by this crate.
    fn construct(
        &self,
        descriptor: &Self::Descriptor,
        parent: Option<&Self::Parent>,
    ) -> Result<Self::Object, Self::Error>;
}

/// Construct an object on the owner thread from any thread.
///
/// A construction error resolves the awaitable with
/// [`SyncError::ExecutionFault`](crate::SyncError::ExecutionFault).
pub fn instantiate_async<F>(
    dispatcher: &Dispatcher,
    factory: Arc<F>,
    descriptor: F::Descriptor,
    parent: Option<F::Parent>,
) -> Awaitable<F::Object>
where
    F: ObjectFactory,
{
    tracing::trace!(with_parent = parent.is_some(), "instantiate requested");
    dispatcher
        .try_run_on_owner_thread_async(move || factory.construct(&descriptor, parent.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncError;
    use crate::channel::testing::ManualChannel;
    use crate::identity::OwnerThread;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    /// Records which thread built each object.
    #[derive(Default)]
    struct Recorder {
        built: Mutex<Vec<(String, Option<u32>, ThreadId)>>,
    }

    impl ObjectFactory for Recorder {
        type Descriptor = String;
        type Parent = u32;
        type Object = usize;
        type Error = &'static str;

        fn construct(
            &self,
            descriptor: &String,
            parent: Option<&u32>,
        ) -> Result<usize, &'static str> {
            if descriptor.is_empty() {
                return Err("empty descriptor");
            }
            let mut built = self.built.lock().unwrap();
            built.push((descriptor.clone(), parent.copied(), thread::current().id()));
            Ok(built.len() - 1)
        }
    }

    #[test]
    fn worker_instantiation_runs_on_owner() {
        let channel = ManualChannel::new();
        let owner = OwnerThread::current();
        let dispatcher = Dispatcher::new(owner, channel.clone());
        let factory = Arc::new(Recorder::default());

        let (d, f) = (dispatcher.clone(), Arc::clone(&factory));
        let awaitable =
            thread::spawn(move || instantiate_async(&d, f, "crate".to_string(), Some(4)))
                .join()
                .expect("worker");

        channel.pump();
        assert_eq!(awaitable.wait(), Ok(0));

        let built = factory.built.lock().unwrap();
        assert_eq!(built[0], ("crate".to_string(), Some(4), owner.id()));
    }

    #[test]
    fn construction_error_is_a_fault() {
        let dispatcher = Dispatcher::new(OwnerThread::current(), ManualChannel::new());
        let factory = Arc::new(Recorder::default());
        let awaitable = instantiate_async(&dispatcher, factory, String::new(), None);
        assert_eq!(
            awaitable.wait(),
            Err(SyncError::ExecutionFault {
                message: "empty descriptor".into()
            })
        );
    }
}
