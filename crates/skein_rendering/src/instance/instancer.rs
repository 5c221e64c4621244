//! # Instancer
//!
//! Collects the instances of one type drawn with one model in one stage.
//!
//! ```text
//! create ─► changed ─┐
//! set    ─► changed ─┼─► update(): compact deleted, serialize changed ─► staging bytes
//! delete ─► deleted ─┘                                                   └─ dirty range
//! ```
//!
//! Handles hold a shared index cell. Compaction rewrites the cells of moved
//! instances, so a handle keeps addressing its instance across updates.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{InstanceType, InstanceTypeId};
use crate::draw::{Environment, RenderStage};
use crate::mesh::ModelId;

const DELETED: usize = usize::MAX;

static NEXT_INSTANCER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an instancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstancerId(u64);

impl InstancerId {
    fn next() -> Self {
        Self(NEXT_INSTANCER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What an instancer is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstancerKey {
    /// Instance type.
    pub instance_type: InstanceTypeId,
    /// Model drawn for every instance.
    pub model: ModelId,
    /// Stage the draws belong to.
    pub stage: RenderStage,
    /// Shader environment.
    pub environment: Environment,
}

#[derive(Debug)]
struct HandleSlot {
    index: AtomicUsize,
}

impl HandleSlot {
    fn new(index: usize) -> Arc<Self> {
        Arc::new(Self {
            index: AtomicUsize::new(index),
        })
    }

    fn get(&self) -> Option<usize> {
        match self.index.load(Ordering::Acquire) {
            DELETED => None,
            index => Some(index),
        }
    }

    fn set(&self, index: usize) {
        self.index.store(index, Ordering::Release);
    }
}

struct State<T: InstanceType> {
    instances: Vec<T::Instance>,
    handles: Vec<Arc<HandleSlot>>,
    changed: Vec<bool>,
    deleted: Vec<bool>,
    deleted_count: usize,
    staging: Vec<u8>,
    dirty: Option<Range<usize>>,
}

impl<T: InstanceType> State<T> {
    fn new() -> Self {
        Self {
            instances: Vec::new(),
            handles: Vec::new(),
            changed: Vec::new(),
            deleted: Vec::new(),
            deleted_count: 0,
            staging: Vec::new(),
            dirty: None,
        }
    }

    fn add(&mut self, instance: T::Instance) -> Arc<HandleSlot> {
        let slot = HandleSlot::new(self.instances.len());
        self.instances.push(instance);
        self.handles.push(Arc::clone(&slot));
        self.changed.push(true);
        self.deleted.push(false);
        slot
    }

    /// Resolves a handle to a live, not yet deleted index.
    fn live_index(&self, slot: &HandleSlot) -> Option<usize> {
        slot.get().filter(|&index| !self.deleted[index])
    }

    fn live_count(&self) -> usize {
        self.instances.len() - self.deleted_count
    }

    /// Stable compaction: survivors keep their relative order.
    fn remove_deleted(&mut self) {
        if self.deleted_count == 0 {
            return;
        }

        let mut write = 0;
        for read in 0..self.instances.len() {
            if self.deleted[read] {
                self.handles[read].set(DELETED);
                continue;
            }
            if write != read {
                self.instances.swap(write, read);
                self.handles.swap(write, read);
                self.handles[write].set(write);
                self.changed[write] = true;
            }
            write += 1;
        }

        self.instances.truncate(write);
        self.handles.truncate(write);
        self.changed.truncate(write);
        self.deleted.clear();
        self.deleted.resize(write, false);
        self.deleted_count = 0;
    }

    fn write_changed(&mut self) {
        let stride = T::stride();
        self.staging.resize(self.instances.len() * stride, 0);

        for (index, changed) in self.changed.iter_mut().enumerate() {
            if !*changed {
                continue;
            }
            *changed = false;

            let start = index * stride;
            let end = start + stride;
            T::write(&self.instances[index], &mut self.staging[start..end]);
            self.dirty = Some(match self.dirty.take() {
                Some(range) => range.start.min(start)..range.end.max(end),
                None => start..end,
            });
        }
    }

    fn clear(&mut self) {
        for handle in &self.handles {
            handle.set(DELETED);
        }
        self.instances.clear();
        self.handles.clear();
        self.changed.clear();
        self.deleted.clear();
        self.deleted_count = 0;
        self.staging.clear();
        self.dirty = None;
    }
}

/// Shared state behind [`Instancer`] and its handles.
pub(crate) struct InstancerInner<T: InstanceType> {
    id: InstancerId,
    key: InstancerKey,
    state: Mutex<State<T>>,
}

impl<T: InstanceType> InstancerInner<T> {
    pub(crate) fn new(key: InstancerKey) -> Self {
        Self {
            id: InstancerId::next(),
            key,
            state: Mutex::new(State::new()),
        }
    }
}

impl<T: InstanceType> fmt::Debug for InstancerInner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instancer")
            .field("id", &self.id)
            .field("type", &T::NAME)
            .field("instances", &self.state.lock().instances.len())
            .finish()
    }
}

/// Type-erased view of an instancer, used by the draw side.
pub trait ErasedInstancer: Send + Sync + fmt::Debug {
    /// Returns the instancer's identity.
    fn id(&self) -> InstancerId;

    /// Returns the key the instancer was created for.
    fn key(&self) -> &InstancerKey;

    /// Compacts deleted instances and serializes changed ones.
    fn update(&self);

    /// Returns the number of live instances.
    fn instance_count(&self) -> usize;

    /// Returns the serialized size of one instance.
    fn stride(&self) -> usize;

    /// Takes the staging bytes changed since the last call.
    ///
    /// # Returns
    ///
    /// The byte offset and contents of the dirty range, or None if nothing
    /// changed.
    fn take_dirty(&self) -> Option<(usize, Vec<u8>)>;

    /// Deletes every instance. Outstanding handles become dead.
    fn clear(&self);
}

impl<T: InstanceType> ErasedInstancer for InstancerInner<T> {
    fn id(&self) -> InstancerId {
        self.id
    }

    fn key(&self) -> &InstancerKey {
        &self.key
    }

    fn update(&self) {
        let mut state = self.state.lock();
        state.remove_deleted();
        state.write_changed();
    }

    fn instance_count(&self) -> usize {
        self.state.lock().live_count()
    }

    fn stride(&self) -> usize {
        T::stride()
    }

    fn take_dirty(&self) -> Option<(usize, Vec<u8>)> {
        let mut state = self.state.lock();
        let range = state.dirty.take()?;
        let end = range.end.min(state.staging.len());
        if range.start >= end {
            return None;
        }
        Some((range.start, state.staging[range.start..end].to_vec()))
    }

    fn clear(&self) {
        self.state.lock().clear();
    }
}

/// Batched instances of type `T` for one model.
pub struct Instancer<T: InstanceType> {
    inner: Arc<InstancerInner<T>>,
}

impl<T: InstanceType> Clone for Instancer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: InstanceType> fmt::Debug for Instancer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl<T: InstanceType> Instancer<T> {
    pub(crate) fn from_inner(inner: Arc<InstancerInner<T>>) -> Self {
        Self { inner }
    }

    /// Returns the instancer's identity.
    #[must_use]
    pub fn id(&self) -> InstancerId {
        self.inner.id
    }

    /// Returns the key the instancer was created for.
    #[must_use]
    pub fn key(&self) -> &InstancerKey {
        &self.inner.key
    }

    /// Creates an instance with default fields.
    #[must_use]
    pub fn create_instance(&self) -> InstanceHandle<T> {
        self.create_instance_with(T::Instance::default())
    }

    /// Creates an instance with the given fields.
    #[must_use]
    pub fn create_instance_with(&self, instance: T::Instance) -> InstanceHandle<T> {
        let slot = self.inner.state.lock().add(instance);
        InstanceHandle {
            inner: Arc::clone(&self.inner),
            slot,
        }
    }

    /// Returns the number of live instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.inner.instance_count()
    }

    /// Compacts deleted instances and serializes changed ones.
    pub fn update(&self) {
        self.inner.update();
    }

    /// Returns the serialized instance buffer contents.
    #[must_use]
    pub fn staged_bytes(&self) -> Vec<u8> {
        self.inner.state.lock().staging.clone()
    }

    /// Returns the type-erased view.
    #[must_use]
    pub fn erased(&self) -> Arc<dyn ErasedInstancer> {
        Arc::clone(&self.inner) as Arc<dyn ErasedInstancer>
    }
}

/// Handle to one instance.
///
/// Dropping a handle does not delete the instance; call
/// [`InstanceHandle::delete`].
pub struct InstanceHandle<T: InstanceType> {
    inner: Arc<InstancerInner<T>>,
    slot: Arc<HandleSlot>,
}

impl<T: InstanceType> fmt::Debug for InstanceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("instancer", &self.inner.id)
            .field("index", &self.slot.get())
            .finish()
    }
}

impl<T: InstanceType> InstanceHandle<T> {
    /// Returns the instance's current buffer index.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.inner.state.lock().live_index(&self.slot)
    }

    /// Returns true once the instance is deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.index().is_none()
    }

    /// Returns a copy of the instance.
    #[must_use]
    pub fn get(&self) -> Option<T::Instance> {
        let state = self.inner.state.lock();
        let index = state.live_index(&self.slot)?;
        Some(state.instances[index].clone())
    }

    /// Replaces the instance. Ignored once deleted.
    pub fn set(&self, instance: T::Instance) {
        self.update(|current| *current = instance);
    }

    /// Mutates the instance in place and marks it changed.
    ///
    /// # Returns
    ///
    /// False if the instance was deleted.
    pub fn update(&self, mutate: impl FnOnce(&mut T::Instance)) -> bool {
        let mut state = self.inner.state.lock();
        let Some(index) = state.live_index(&self.slot) else {
            return false;
        };
        mutate(&mut state.instances[index]);
        state.changed[index] = true;
        true
    }

    /// Deletes the instance. It leaves the buffer at the next update.
    pub fn delete(&self) {
        let mut state = self.inner.state.lock();
        if let Some(index) = state.live_index(&self.slot) {
            state.deleted[index] = true;
            state.deleted_count += 1;
        }
    }

    /// Returns a type-erased reference for the crumbling draw path.
    #[must_use]
    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef {
            instancer: self.inner.id,
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Type-erased reference to one instance.
#[derive(Debug, Clone)]
pub struct InstanceRef {
    instancer: InstancerId,
    slot: Arc<HandleSlot>,
}

impl InstanceRef {
    /// Returns the owning instancer.
    #[must_use]
    pub const fn instancer(&self) -> InstancerId {
        self.instancer
    }

    /// Returns the instance's buffer index as of the last update.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.slot.get()
    }
}
