//! # Mesh Pool
//!
//! All meshes live back to back in one shared vertex buffer.
//!
//! ```text
//! alloc(A) alloc(B) alloc(C)      release(A), flush
//! [AAAA|BB|CCC]            ──►    [BB|CCC]      B and C re-uploaded at new offsets
//! ```
//!
//! Allocation and release are CPU bookkeeping only. [`MeshPool::flush`] runs
//! on the GPU thread: it compacts deleted entries out of the ordering, grows
//! the buffer if needed, and uploads every entry whose offset is new.

use std::collections::HashMap;
use std::sync::Arc;

use skein_core::{PoolHandle, SlotPool};

use crate::error::{GpuError, GpuResult};
use crate::gpu::{BufferId, BufferUsage, GpuContext, GrowableBuffer};

use super::{IndexBufferCache, Mesh, VertexLayout};

/// Handle to a pooled mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(PoolHandle);

/// A mesh resident in the pool.
#[derive(Debug)]
pub struct PooledMesh {
    mesh: Arc<Mesh>,
    byte_index: u64,
    byte_size: u64,
    ref_count: u32,
    deleted: bool,
}

impl PooledMesh {
    /// Returns the mesh.
    #[must_use]
    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    /// Returns the byte offset of the mesh inside the vertex buffer.
    #[must_use]
    pub const fn byte_index(&self) -> u64 {
        self.byte_index
    }

    /// Returns the byte length of the mesh's vertices.
    #[must_use]
    pub const fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Returns how many draw calls hold this entry.
    #[must_use]
    pub const fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Returns true once the last holder released the entry.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Shared vertex-buffer arena with content deduplication.
#[derive(Debug)]
pub struct MeshPool {
    layout: VertexLayout,
    entries: SlotPool<PooledMesh>,
    /// Live entries in allocation order; byte indices follow this order.
    order: Vec<MeshHandle>,
    by_content: HashMap<Arc<Mesh>, MeshHandle>,
    pending_upload: Vec<MeshHandle>,
    byte_size: u64,
    dirty: bool,
    any_to_remove: bool,
    vertex_buffer: GrowableBuffer,
    index_buffers: IndexBufferCache,
}

impl MeshPool {
    /// Creates an empty pool for vertices of `layout`.
    #[must_use]
    pub fn new(layout: VertexLayout, growth_factor: f64) -> Self {
        Self {
            layout,
            entries: SlotPool::new(),
            order: Vec::new(),
            by_content: HashMap::new(),
            pending_upload: Vec::new(),
            byte_size: 0,
            dirty: false,
            any_to_remove: false,
            vertex_buffer: GrowableBuffer::new(BufferUsage::Vertex, growth_factor),
            index_buffers: IndexBufferCache::new(),
        }
    }

    /// Returns a handle to a pooled copy of `mesh`.
    ///
    /// A mesh equal in content to a live entry shares that entry and bumps its
    /// reference count.
    pub fn alloc(&mut self, mesh: &Arc<Mesh>) -> MeshHandle {
        if let Some(&handle) = self.by_content.get(mesh) {
            if let Some(entry) = self.entries.get_mut(handle.0) {
                entry.ref_count += 1;
                entry.deleted = false;
                return handle;
            }
        }

        let byte_size = u64::from(mesh.vertex_count()) * self.layout.stride;
        let handle = MeshHandle(self.entries.insert(PooledMesh {
            mesh: Arc::clone(mesh),
            byte_index: self.byte_size,
            byte_size,
            ref_count: 1,
            deleted: false,
        }));
        self.byte_size += byte_size;
        self.order.push(handle);
        self.by_content.insert(Arc::clone(mesh), handle);
        self.pending_upload.push(handle);
        self.dirty = true;
        handle
    }

    /// Drops one reference. The entry is deleted when the last one goes.
    ///
    /// # Returns
    ///
    /// True if this call deleted the entry.
    pub fn release(&mut self, handle: MeshHandle) -> bool {
        let Some(entry) = self.entries.get_mut(handle.0) else {
            return false;
        };
        if entry.deleted {
            return false;
        }
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return false;
        }
        entry.deleted = true;
        self.dirty = true;
        self.any_to_remove = true;
        true
    }

    /// Returns an entry.
    #[must_use]
    pub fn get(&self, handle: MeshHandle) -> Option<&PooledMesh> {
        self.entries.get(handle.0)
    }

    /// Returns the element buffer for an entry, once flushed.
    #[must_use]
    pub fn index_buffer(&self, handle: MeshHandle) -> Option<BufferId> {
        let mesh = &self.get(handle)?.mesh;
        self.index_buffers.get(mesh.index_sequence(), mesh.index_count())
    }

    /// Returns the shared vertex buffer, once allocated.
    #[must_use]
    pub const fn vertex_buffer(&self) -> Option<BufferId> {
        self.vertex_buffer.id()
    }

    /// Returns the vertex layout.
    #[must_use]
    pub const fn layout(&self) -> VertexLayout {
        self.layout
    }

    /// Returns the bytes used by entries in the ordering.
    #[must_use]
    pub const fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Returns the number of entries, including deleted ones awaiting flush.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the pool holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the GPU copy is out of date.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Iterates entries in buffer order.
    pub fn iter(&self) -> impl Iterator<Item = (MeshHandle, &PooledMesh)> {
        self.order
            .iter()
            .filter_map(|handle| self.entries.get(handle.0).map(|entry| (*handle, entry)))
    }

    /// Brings the GPU buffer up to date.
    ///
    /// # Errors
    ///
    /// Propagates allocation and mapping failures; the pool stays dirty and
    /// the next flush retries.
    pub fn flush(&mut self, gpu: &mut dyn GpuContext) -> GpuResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if self.any_to_remove {
            self.process_deletions();
        }

        if self.byte_size > 0 || self.vertex_buffer.id().is_some() {
            self.vertex_buffer.ensure_capacity(gpu, self.byte_size)?;
        }
        self.upload_pending(gpu)?;

        self.pending_upload.clear();
        self.dirty = false;
        Ok(())
    }

    fn process_deletions(&mut self) {
        let mut removed = Vec::new();
        let entries = &self.entries;
        self.order.retain(|handle| match entries.get(handle.0) {
            Some(entry) if entry.deleted => {
                removed.push(*handle);
                false
            }
            Some(_) => true,
            None => false,
        });
        for handle in removed {
            if let Some(entry) = self.entries.remove(handle.0) {
                self.by_content.remove(&entry.mesh);
            }
        }

        let mut byte_index = 0;
        for handle in &self.order {
            let Some(entry) = self.entries.get_mut(handle.0) else {
                continue;
            };
            if entry.byte_index != byte_index {
                entry.byte_index = byte_index;
                self.pending_upload.push(*handle);
            }
            byte_index += entry.byte_size;
        }
        self.byte_size = byte_index;
        self.any_to_remove = false;
    }

    fn upload_pending(&mut self, gpu: &mut dyn GpuContext) -> GpuResult<()> {
        if self.pending_upload.is_empty() {
            return Ok(());
        }
        let Some(buffer) = self.vertex_buffer.id() else {
            return Ok(());
        };

        let entries = &self.entries;
        let pending = &self.pending_upload;
        let mut overflow = None;
        gpu.map_buffer(buffer, &mut |mapped: &mut [u8]| {
            for handle in pending {
                let Some(entry) = entries.get(handle.0) else {
                    continue;
                };
                let start = usize::try_from(entry.byte_index).unwrap_or(usize::MAX);
                let len = usize::try_from(entry.byte_size)
                    .unwrap_or(0)
                    .min(entry.mesh.vertex_data().len());
                match mapped.get_mut(start..start.saturating_add(len)) {
                    Some(target) => target.copy_from_slice(&entry.mesh.vertex_data()[..len]),
                    None => overflow = Some(entry.byte_index + entry.byte_size),
                }
            }
        })?;
        if let Some(end) = overflow {
            return Err(GpuError::MapFailed {
                buffer: buffer.0,
                reason: format!("mesh bytes up to {end} exceed the vertex buffer"),
            });
        }

        for handle in &self.pending_upload {
            if let Some(entry) = self.entries.get(handle.0) {
                let mesh = &entry.mesh;
                self.index_buffers
                    .get_or_create(gpu, mesh.index_sequence(), mesh.index_count())?;
            }
        }

        tracing::trace!(uploaded = self.pending_upload.len(), bytes = self.byte_size, "mesh pool upload");
        Ok(())
    }

    /// Releases every GPU resource and forgets all entries.
    pub fn delete(&mut self, gpu: &mut dyn GpuContext) {
        self.vertex_buffer.delete(gpu);
        self.index_buffers.delete(gpu);
        self.entries.clear();
        self.order.clear();
        self.by_content.clear();
        self.pending_upload.clear();
        self.byte_size = 0;
        self.dirty = false;
        self.any_to_remove = false;
    }
}
