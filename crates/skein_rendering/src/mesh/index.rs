//! Shared element buffers.
//!
//! Index data depends only on the sequence kind and the index count, so one
//! element buffer serves every mesh with the same pair.

use std::collections::HashMap;

use crate::error::GpuResult;
use crate::gpu::{BufferId, BufferUsage, GpuContext};

/// How a mesh's indices are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexSequence {
    /// Four vertices per quad, two triangles each: 0 1 2, 2 3 0.
    Quads,
    /// One polygon as a fan around vertex 0.
    TriangleFan,
    /// Indices equal vertex numbers.
    Triangles,
}

impl IndexSequence {
    /// Generates `count` indices.
    #[must_use]
    pub fn generate(self, count: u32) -> Vec<u32> {
        match self {
            Self::Quads => (0..count)
                .map(|i| {
                    let quad = i / 6;
                    let corner = [0, 1, 2, 2, 3, 0][(i % 6) as usize];
                    quad * 4 + corner
                })
                .collect(),
            Self::TriangleFan => (0..count)
                .map(|i| {
                    let triangle = i / 3;
                    match i % 3 {
                        0 => 0,
                        1 => triangle + 1,
                        _ => triangle + 2,
                    }
                })
                .collect(),
            Self::Triangles => (0..count).collect(),
        }
    }
}

/// Cache of element buffers keyed by (sequence, count).
#[derive(Debug, Default)]
pub struct IndexBufferCache {
    buffers: HashMap<(IndexSequence, u32), BufferId>,
}

impl IndexBufferCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffer for a key if it exists.
    #[must_use]
    pub fn get(&self, sequence: IndexSequence, count: u32) -> Option<BufferId> {
        self.buffers.get(&(sequence, count)).copied()
    }

    /// Returns the buffer for a key, creating and filling it on first use.
    ///
    /// # Errors
    ///
    /// Propagates allocation and mapping failures.
    pub fn get_or_create(
        &mut self,
        gpu: &mut dyn GpuContext,
        sequence: IndexSequence,
        count: u32,
    ) -> GpuResult<BufferId> {
        if let Some(buffer) = self.get(sequence, count) {
            return Ok(buffer);
        }

        let indices = sequence.generate(count);
        let bytes: &[u8] = bytemuck::cast_slice(&indices);
        let buffer = gpu.create_buffer(BufferUsage::Index, bytes.len() as u64)?;
        gpu.map_buffer(buffer, &mut |mapped: &mut [u8]| {
            mapped[..bytes.len()].copy_from_slice(bytes);
        })?;
        self.buffers.insert((sequence, count), buffer);
        Ok(buffer)
    }

    /// Returns the number of cached buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Releases every cached buffer.
    pub fn delete(&mut self, gpu: &mut dyn GpuContext) {
        for (_, buffer) in self.buffers.drain() {
            gpu.delete_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    #[test]
    fn test_quad_sequence() {
        assert_eq!(
            IndexSequence::Quads.generate(12),
            vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]
        );
    }

    #[test]
    fn test_fan_sequence() {
        assert_eq!(IndexSequence::TriangleFan.generate(6), vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_cache_shares_buffers() {
        let mut gpu = HeadlessGpu::new();
        let mut cache = IndexBufferCache::new();

        let a = cache.get_or_create(&mut gpu, IndexSequence::Quads, 6).unwrap();
        let b = cache.get_or_create(&mut gpu, IndexSequence::Quads, 6).unwrap();
        let c = cache.get_or_create(&mut gpu, IndexSequence::Quads, 12).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);

        let bytes = gpu.buffer_contents(a).unwrap();
        let indices: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
        assert_eq!(indices, vec![0, 1, 2, 2, 3, 0]);

        cache.delete(&mut gpu);
        assert_eq!(gpu.live_buffers(), 0);
    }
}
