//! Reference frame-stepped loop for `framesync`.
//!
//! `framesync-core` only rides on a frame loop; this crate provides one that
//! implements every collaborator seam the core expects:
//!
//! - **[`queue`]** -- [`LoopChannel`], the posting channel, on top of an
//!   unbounded [`crossbeam::channel`].
//! - **[`host`]** -- [`LoopHost`], the per-frame coroutine stepper, with a
//!   [`dashmap::DashMap`] registry observable from any thread.
//! - **[`scene`]** -- [`Scene`], a small owner-thread-only object hierarchy
//!   implementing [`framesync_core::ObjectFactory`].
//! - **[`frame_loop`]** -- [`FrameLoop`], which ties them together and runs
//!   one frame per [`FrameLoop::tick`].
//! - **[`config`]** -- [`LoopConfig`], loaded from TOML.
//! - **[`error`]** -- [`LoopError`] via [`thiserror`].

pub mod config;
pub mod error;
pub mod frame_loop;
pub mod host;
pub mod queue;
pub mod scene;

pub use config::LoopConfig;
pub use error::{LoopError, Result};
pub use frame_loop::{FrameClock, FrameLoop, FrameStats, ShutdownStats};
pub use host::{CoroutineInfo, LoopHost};
pub use queue::{LoopChannel, loop_channel};
pub use scene::{ObjectId, Prefab, Scene, SceneObject};
