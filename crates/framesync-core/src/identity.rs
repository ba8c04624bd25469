//! Owner thread identity.
//!
//! [`OwnerThread`] is captured once, on the thread that runs the frame loop,
//! and afterwards only compared against.  It is `Copy` and safe to read from
//! any thread.

use std::thread::{self, ThreadId};

/// Identity of the thread designated as owner of the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerThread {
    id: ThreadId,
}

impl OwnerThread {
    /// Capture the calling thread as the owner thread.
    #[must_use]
    pub fn current() -> Self {
        let current = thread::current();
        tracing::debug!(
            thread_id = ?current.id(),
            thread_name = current.name().unwrap_or("<unnamed>"),
            "owner thread captured"
        );
        Self { id: current.id() }
    }

    /// The stored identity.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Whether the calling thread is the owner thread.
    #[inline]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_thread_is_owner() {
        let owner = OwnerThread::current();
        assert!(owner.is_current());
        assert_eq!(owner.id(), thread::current().id());
    }

    #[test]
    fn other_threads_are_not_owner() {
        let owner = OwnerThread::current();
        let seen = thread::spawn(move || owner.is_current())
            .join()
            .expect("worker thread");
        assert!(!seen);
    }
}
