//! Frame loop error types.

use std::path::PathBuf;

use framesync_core::SyncError;

/// Unified error type for the reference frame loop.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    // -- Configuration ------------------------------------------------------
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`LoopConfig`](crate::LoopConfig).
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The config could not be rendered as TOML.
    #[error("failed to render config: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // -- Scene --------------------------------------------------------------
    /// A scene mutation was attempted off the owner thread.
    #[error("scene objects can only be constructed on the owner thread")]
    OffOwnerThread,

    /// The requested parent does not exist in the scene.
    #[error("unknown parent object: {parent}")]
    UnknownParent { parent: crate::ObjectId },

    // -- Core ---------------------------------------------------------------
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LoopError>;
