//! Core error types.
//!
//! Every fallible operation in this crate surfaces [`SyncError`].  Awaitables
//! resolve to `Result<T, SyncError>`; cancellation is reported through the
//! dedicated [`SyncError::Canceled`] variant so callers can tell it apart
//! from a fault with [`SyncError::is_canceled`].

/// Unified error type for owner-thread dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    // -- Initialization -----------------------------------------------------
    /// A dependent operation ran before the owner context was installed.
    #[error("owner thread context is not initialized")]
    NotInitialized,

    /// The process-wide owner context was installed twice.
    #[error("owner thread context is already initialized")]
    AlreadyInitialized,

    // -- Delivery -----------------------------------------------------------
    /// The posting channel refused the callback (e.g. the loop shut down).
    #[error("posting to owner thread failed: {reason}")]
    PostingFailed { reason: String },

    /// The owner loop dropped the request without ever running it.
    #[error("request was abandoned before it completed on the owner thread")]
    Abandoned,

    // -- Execution ----------------------------------------------------------
    /// The work returned an error while running on the owner thread.
    #[error("execution fault on owner thread: {message}")]
    ExecutionFault { message: String },

    /// The work panicked while running on the owner thread.
    #[error("panicked on owner thread: {message}")]
    Panicked { message: String },

    // -- Waiting ------------------------------------------------------------
    /// The operation was canceled.  Not a fault.
    #[error("operation was canceled")]
    Canceled,

    /// A blocking wait on the owner thread would never be satisfied.
    #[error("blocking wait on the owner thread for an unresolved result would deadlock")]
    WouldDeadlock,

    /// A bounded wait elapsed before the result was available.
    #[error("timed out waiting for result")]
    Timeout,
}

impl SyncError {
    /// `true` for the cancellation outcome.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// `true` for the outcomes that represent a failed execution.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFault { .. } | Self::Panicked { .. } | Self::Abandoned
        )
    }

    /// Build a [`SyncError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked {
            message: panic_message(payload.as_ref()),
        }
    }
}

/// Extract the message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
