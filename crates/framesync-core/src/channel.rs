//! The posting channel seam.
//!
//! The owner thread's runtime supplies a [`PostingChannel`]: something that
//! accepts a zero-argument callback and runs it on the owner thread "soon",
//! typically at the start of the next frame.  Implementations must preserve
//! FIFO order per posting thread and run callbacks one at a time.

use std::fmt;

use crate::error::Result;

/// A unit of work bound for the owner thread.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Delivers callbacks to the owner thread.
pub trait PostingChannel: Send + Sync {
    /// Enqueue `callback` for execution on the owner thread.
    ///
    /// Must not block and must not run the callback inline.  Returns
    /// [`SyncError::PostingFailed`](crate::SyncError::PostingFailed) when the
    /// owner loop can no longer accept work; the callback is dropped.
    fn post(&self, callback: Callback) -> Result<()>;
}

impl fmt::Debug for dyn PostingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PostingChannel")
    }
}
