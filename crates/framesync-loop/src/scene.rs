//! Minimal scene object model.
//!
//! [`Scene`] stands in for a host engine's object hierarchy: objects are
//! built from [`Prefab`]s, optionally under a parent, and mutation is only
//! allowed on the owner thread.  It implements [`ObjectFactory`] so
//! [`instantiate_async`](framesync_core::OwnerContext::instantiate_async) can
//! drive it from any thread.
//!
//! The object and its parent link are inserted under one write lock, so no
//! reader ever sees the new object detached from its parent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

use framesync_core::{ObjectFactory, OwnerThread};

use crate::error::{LoopError, Result};

/// Handle to an object in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Template an object is instantiated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefab {
    pub name: String,
    pub tags: Vec<String>,
}

impl Prefab {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// An instantiated object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneObject {
    pub id: ObjectId,
    /// Prefab name with a `(Clone)` suffix, like engine-made copies.
    pub name: String,
    pub tags: Vec<String>,
    pub parent: Option<ObjectId>,
    pub children: Vec<ObjectId>,
    /// Thread the object was constructed on.
    pub built_on: ThreadId,
}

#[derive(Default)]
struct SceneGraph {
    objects: HashMap<ObjectId, SceneObject>,
}

/// Owner-thread-only object hierarchy.
pub struct Scene {
    owner: OwnerThread,
    graph: RwLock<SceneGraph>,
    next_id: AtomicU64,
}

impl Scene {
    pub fn new(owner: OwnerThread) -> Self {
        Self {
            owner,
            graph: RwLock::new(SceneGraph::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SceneGraph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SceneGraph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build an object from `prefab`.  Owner thread only.
    pub fn spawn(&self, prefab: &Prefab, parent: Option<ObjectId>) -> Result<ObjectId> {
        if !self.owner.is_current() {
            return Err(LoopError::OffOwnerThread);
        }

        let mut graph = self.write();
        if let Some(parent) = parent {
            if !graph.objects.contains_key(&parent) {
                return Err(LoopError::UnknownParent { parent });
            }
        }

        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        graph.objects.insert(
            id,
            SceneObject {
                id,
                name: format!("{}(Clone)", prefab.name),
                tags: prefab.tags.clone(),
                parent,
                children: Vec::new(),
                built_on: thread::current().id(),
            },
        );
        if let Some(parent) = parent.and_then(|p| graph.objects.get_mut(&p)) {
            parent.children.push(id);
        }

        tracing::trace!(object = %id, prefab = %prefab.name, ?parent, "scene object spawned");
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> Option<SceneObject> {
        self.read().objects.get(&id).cloned()
    }

    pub fn parent_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.read().objects.get(&id).and_then(|o| o.parent)
    }

    pub fn children_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.read()
            .objects
            .get(&id)
            .map(|o| o.children.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.read().objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectFactory for Scene {
    type Descriptor = Prefab;
    type Parent = ObjectId;
    type Object = ObjectId;
    type Error = LoopError;

    fn construct(&self, descriptor: &Prefab, parent: Option<&ObjectId>) -> Result<ObjectId> {
        self.spawn(descriptor, parent.copied())
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("owner", &self.owner)
            .field("objects", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_with_parent_links_both_ways() {
        let scene = Scene::new(OwnerThread::current());
        let root = scene.spawn(&Prefab::new("root"), None).unwrap();
        let child = scene.spawn(&Prefab::new("crate").with_tag("loot"), Some(root)).unwrap();

        assert_eq!(scene.parent_of(child), Some(root));
        assert_eq!(scene.children_of(root), vec![child]);

        let obj = scene.get(child).unwrap();
        assert_eq!(obj.name, "crate(Clone)");
        assert_eq!(obj.tags, vec!["loot".to_string()]);
        assert_eq!(obj.built_on, thread::current().id());
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let scene = Scene::new(OwnerThread::current());
        let err = scene.spawn(&Prefab::new("orphan"), Some(ObjectId(99))).unwrap_err();
        assert!(matches!(err, LoopError::UnknownParent { parent } if parent == ObjectId(99)));
        assert!(scene.is_empty());
    }

    #[test]
    fn off_owner_construction_is_rejected() {
        let scene = std::sync::Arc::new(Scene::new(OwnerThread::current()));
        let s = std::sync::Arc::clone(&scene);
        let result = thread::spawn(move || s.construct(&Prefab::new("x"), None))
            .join()
            .unwrap();
        assert!(matches!(result, Err(LoopError::OffOwnerThread)));
        assert_eq!(scene.len(), 0);
    }
}
