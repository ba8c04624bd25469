//! The reference frame loop.
//!
//! [`FrameLoop`] is created on, and pinned to, the owner thread.  Each
//! [`FrameLoop::tick`] runs one frame:
//!
//! ```text
//! 1. callbacks    drain what was queued when the frame began
//!                 (bounded by max_callbacks_per_frame)
//! 2. coroutines   adopt newly started routines, advance each one step
//! 3. clock        publish the frame number
//! ```
//!
//! Callbacks posted while a frame runs wait for the next frame, which keeps a
//! callback that re-posts itself from starving the coroutine phase.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::Receiver;
use framesync_core::{Callback, OwnerContext, error::panic_message};

use crate::config::LoopConfig;
use crate::host::LoopHost;
use crate::queue::{LoopChannel, loop_channel};
use crate::scene::Scene;

/// What one frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub frame: u64,
    pub callbacks: usize,
    pub coroutines: usize,
}

/// What was discarded when the loop shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownStats {
    pub frames: u64,
    pub dropped_callbacks: usize,
    pub dropped_coroutines: usize,
}

/// Frame counter readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    frame: Arc<AtomicU64>,
}

impl FrameClock {
    /// Number of frames completed so far.
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }
}

/// A frame-stepped loop bound to the thread that created it.
pub struct FrameLoop {
    config: LoopConfig,
    channel: LoopChannel,
    receiver: Option<Receiver<Callback>>,
    context: OwnerContext,
    hosts: Vec<Arc<LoopHost>>,
    scene: Arc<Scene>,
    clock: FrameClock,
    /// Pins the loop to its owner thread.
    _owner: PhantomData<Rc<()>>,
}

impl FrameLoop {
    /// Create a loop owned by the calling thread.
    pub fn new(config: LoopConfig) -> Self {
        let (channel, receiver) = loop_channel();
        let context = OwnerContext::initialize(Arc::new(channel.clone()));
        let scene = Arc::new(Scene::new(context.owner()));
        tracing::info!(
            name = %config.name,
            frame_interval_ms = config.frame_interval_ms,
            max_callbacks_per_frame = config.max_callbacks_per_frame,
            "frame loop created"
        );
        Self {
            hosts: vec![Arc::new(LoopHost::new(format!("{}/default", config.name)))],
            config,
            channel,
            receiver: Some(receiver),
            context,
            scene,
            clock: FrameClock::default(),
            _owner: PhantomData,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// The owner context bound to this loop.
    pub fn context(&self) -> &OwnerContext {
        &self.context
    }

    /// Install this loop's context as the process-wide one.
    pub fn install_global(&self) -> framesync_core::Result<&'static OwnerContext> {
        framesync_core::install(self.context.clone())
    }

    /// The default coroutine host.
    pub fn host(&self) -> Arc<LoopHost> {
        Arc::clone(&self.hosts[0])
    }

    /// Create an additional coroutine host, stepped after existing ones.
    pub fn create_host(&mut self, name: impl Into<String>) -> Arc<LoopHost> {
        let host = Arc::new(LoopHost::new(name));
        self.hosts.push(Arc::clone(&host));
        host
    }

    pub fn scene(&self) -> Arc<Scene> {
        Arc::clone(&self.scene)
    }

    pub fn clock(&self) -> FrameClock {
        self.clock.clone()
    }

    /// Frames completed so far.
    pub fn frame(&self) -> u64 {
        self.clock.frame()
    }

    /// Callbacks waiting for the next frame.
    pub fn pending_callbacks(&self) -> usize {
        self.channel.pending()
    }

    /// Run one frame.
    pub fn tick(&mut self) -> FrameStats {
        let frame = self.clock.frame() + 1;
        let callbacks = self.run_callbacks();

        // The default host lives as long as the loop; it drops its own
        // routines in `step_frame`.
        let mut index = 0;
        self.hosts.retain(|host| {
            index += 1;
            if index == 1 || !host.is_destroyed() {
                return true;
            }
            host.drop_all();
            false
        });
        let coroutines = self.hosts.iter().map(|h| h.step_frame(frame)).sum();

        self.clock.frame.store(frame, Ordering::Release);
        tracing::trace!(frame, callbacks, coroutines, "frame complete");
        FrameStats {
            frame,
            callbacks,
            coroutines,
        }
    }

    /// Run `frames` frames, sleeping the configured interval between them.
    pub fn run_frames(&mut self, frames: u64) {
        for i in 0..frames {
            if i > 0 {
                self.pace();
            }
            self.tick();
        }
    }

    /// Run frames until `done` returns `true` (checked before every frame)
    /// or `max_frames` frames have run.  Returns whether `done` was reached.
    pub fn run_until(&mut self, mut done: impl FnMut() -> bool, max_frames: u64) -> bool {
        for i in 0..max_frames {
            if done() {
                return true;
            }
            if i > 0 {
                self.pace();
            }
            self.tick();
        }
        done()
    }

    /// Stop accepting work and discard what is still queued.
    ///
    /// Queued fire-and-forget actions are dropped without running; queued
    /// awaitable requests and running coroutines resolve with
    /// [`SyncError::Abandoned`](framesync_core::SyncError::Abandoned).
    pub fn shutdown(mut self) -> ShutdownStats {
        self.close()
    }

    fn close(&mut self) -> ShutdownStats {
        let Some(receiver) = self.receiver.take() else {
            return ShutdownStats::default();
        };
        let queued: Vec<Callback> = receiver.try_iter().collect();
        drop(receiver);

        let stats = ShutdownStats {
            frames: self.clock.frame(),
            dropped_callbacks: queued.len(),
            dropped_coroutines: self.hosts.iter().map(|h| h.drop_all()).sum(),
        };
        drop(queued);

        if stats.dropped_callbacks > 0 {
            tracing::debug!(
                dropped = stats.dropped_callbacks,
                "queued callbacks dropped at shutdown"
            );
        }
        tracing::info!(
            name = %self.config.name,
            frames = stats.frames,
            dropped_callbacks = stats.dropped_callbacks,
            dropped_coroutines = stats.dropped_coroutines,
            "frame loop shut down"
        );
        stats
    }

    fn run_callbacks(&mut self) -> usize {
        let Some(receiver) = &self.receiver else {
            return 0;
        };
        let queued = receiver.len();
        let budget = match self.config.max_callbacks_per_frame {
            0 => queued,
            max => queued.min(max),
        };

        let mut ran = 0;
        while ran < budget {
            let Ok(callback) = receiver.try_recv() else {
                break;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                tracing::error!(
                    panic = %panic_message(payload.as_ref()),
                    "posted callback panicked"
                );
            }
            ran += 1;
        }
        ran
    }

    fn pace(&self) {
        let interval = self.config.frame_interval();
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("name", &self.config.name)
            .field("frame", &self.frame())
            .field("hosts", &self.hosts.len())
            .finish_non_exhaustive()
    }
}
