//! Posting queue backed by an unbounded [`crossbeam::channel`].
//!
//! Any thread may post; only the frame loop receives.  The channel is FIFO,
//! which gives per-poster ordering for free.  Once the loop drops its
//! receiver every further post fails with
//! [`SyncError::PostingFailed`].

use crossbeam::channel::{self, Receiver, Sender};
use framesync_core::{Callback, PostingChannel, SyncError};

/// Sending side, handed to the core as its [`PostingChannel`].
#[derive(Debug, Clone)]
pub struct LoopChannel {
    sender: Sender<Callback>,
}

/// Create a connected sender/receiver pair.
pub fn loop_channel() -> (LoopChannel, Receiver<Callback>) {
    let (sender, receiver) = channel::unbounded();
    (LoopChannel { sender }, receiver)
}

impl LoopChannel {
    /// Callbacks waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}

impl PostingChannel for LoopChannel {
    fn post(&self, callback: Callback) -> framesync_core::Result<()> {
        self.sender
            .send(callback)
            .map_err(|_| SyncError::PostingFailed {
                reason: "frame loop has shut down".to_string(),
            })
    }
}
