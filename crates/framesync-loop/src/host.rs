//! Per-frame coroutine stepper.
//!
//! A [`LoopHost`] owns the coroutines started on it and advances each one
//! exactly once per frame.  Hosts are created by the
//! [`FrameLoop`](crate::FrameLoop), which calls [`LoopHost::step_frame`]
//! during the coroutine phase of every tick.
//!
//! Routines started during a frame (including from inside another routine's
//! step) are parked in `incoming` and adopted at the start of the next
//! coroutine phase, so a freshly started routine never steps in the frame it
//! was registered in.
//!
//! The [`DashMap`] registry mirrors the active set for observers on any
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use framesync_core::{CoroutineHost, CoroutineId, FrameDriven, Step};

/// Snapshot of one running coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoroutineInfo {
    pub id: CoroutineId,
    /// Frame in which the coroutine was adopted (first stepped).
    pub adopted_frame: u64,
    /// Number of times it has been advanced.
    pub steps: u64,
}

/// Drives coroutines one step per frame.
pub struct LoopHost {
    name: String,
    incoming: Mutex<Vec<Box<dyn FrameDriven>>>,
    active: Mutex<Vec<Box<dyn FrameDriven>>>,
    registry: DashMap<CoroutineId, CoroutineInfo>,
    stop_requested: AtomicBool,
    destroyed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopHost {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            incoming: Mutex::new(Vec::new()),
            active: Mutex::new(Vec::new()),
            registry: DashMap::new(),
            stop_requested: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Coroutines currently running or waiting to be adopted.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    pub fn coroutines(&self) -> Vec<CoroutineInfo> {
        self.registry.iter().map(|entry| *entry.value()).collect()
    }

    pub fn coroutine(&self, id: CoroutineId) -> Option<CoroutineInfo> {
        self.registry.get(&id).map(|entry| *entry.value())
    }

    /// Stop every coroutine on this host at the next frame.  Their handles
    /// resolve with [`SyncError::Abandoned`](framesync_core::SyncError::Abandoned).
    pub fn stop_all(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Stop everything and refuse future starts.
    pub fn destroy(&self) {
        tracing::debug!(host = %self.name, "host destroyed");
        self.destroyed.store(true, Ordering::Release);
        self.stop_all();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Run this host's coroutine phase for `frame`.  Returns how many
    /// coroutines were advanced.  Owner thread only.
    pub(crate) fn step_frame(&self, frame: u64) -> usize {
        if self.stop_requested.swap(false, Ordering::AcqRel) {
            self.drop_all();
        }

        let adopted = std::mem::take(&mut *lock(&self.incoming));
        for routine in &adopted {
            self.registry.insert(
                routine.id(),
                CoroutineInfo {
                    id: routine.id(),
                    adopted_frame: frame,
                    steps: 0,
                },
            );
        }

        let mut active = lock(&self.active);
        active.extend(adopted);

        let advanced = active.len();
        active.retain_mut(|routine| {
            let id = routine.id();
            let step = routine.advance();
            if let Some(mut info) = self.registry.get_mut(&id) {
                info.steps += 1;
            }
            match step {
                Step::Yield => true,
                Step::Done => {
                    self.registry.remove(&id);
                    false
                }
            }
        });
        advanced
    }

    /// Drop every routine, resolving their handles as abandoned.
    pub(crate) fn drop_all(&self) -> usize {
        let incoming = std::mem::take(&mut *lock(&self.incoming));
        let active = std::mem::take(&mut *lock(&self.active));
        let dropped = incoming.len() + active.len();
        self.registry.clear();
        if dropped > 0 {
            tracing::debug!(host = %self.name, dropped, "coroutines stopped");
        }
        // Dropped outside the locks: completers wake awaiting code.
        drop(incoming);
        drop(active);
        dropped
    }
}

impl CoroutineHost for LoopHost {
    fn start(&self, routine: Box<dyn FrameDriven>) {
        if self.is_destroyed() {
            tracing::warn!(
                host = %self.name,
                coroutine_id = %routine.id(),
                "coroutine started on a destroyed host; dropping it"
            );
            return;
        }
        tracing::trace!(host = %self.name, coroutine_id = %routine.id(), "coroutine registered");
        self.registry.insert(
            routine.id(),
            CoroutineInfo {
                id: routine.id(),
                adopted_frame: 0,
                steps: 0,
            },
        );
        lock(&self.incoming).push(routine);
    }
}

impl std::fmt::Debug for LoopHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHost")
            .field("name", &self.name)
            .field("active", &self.active_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
