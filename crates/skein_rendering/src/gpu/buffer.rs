//! GPU buffer management with geometric growth.
//!
//! Buffers are created lazily and grown by a configured factor so that a
//! steadily growing pool reallocates a logarithmic number of times.

use crate::error::{GpuError, GpuResult};

use super::{BufferId, BufferUsage, GpuContext};

/// Smallest allocation made for a new buffer.
pub const MIN_BUFFER_SIZE: u64 = 1024;

/// A GPU buffer that grows on demand, preserving its contents.
#[derive(Debug)]
pub struct GrowableBuffer {
    /// What the buffer is bound as.
    usage: BufferUsage,
    /// Backing buffer, once allocated.
    buffer: Option<BufferId>,
    /// Allocated size in bytes.
    capacity: u64,
    /// Growth factor applied to the current capacity.
    growth_factor: f64,
}

impl GrowableBuffer {
    /// Creates an unallocated buffer.
    #[must_use]
    pub const fn new(usage: BufferUsage, growth_factor: f64) -> Self {
        Self {
            usage,
            buffer: None,
            capacity: 0,
            growth_factor,
        }
    }

    /// Returns the backing buffer, if allocated.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Returns the allocated size in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the capacity a buffer of `current` bytes grows to when it must
    /// hold `needed` bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn grown_capacity(&self, current: u64, needed: u64) -> u64 {
        let scaled = (current as f64 * self.growth_factor).ceil() as u64;
        needed.max(scaled).max(MIN_BUFFER_SIZE)
    }

    /// Makes sure the buffer holds at least `needed` bytes.
    ///
    /// # Returns
    ///
    /// True if the buffer was allocated or resized.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from the context.
    pub fn ensure_capacity(&mut self, gpu: &mut dyn GpuContext, needed: u64) -> GpuResult<bool> {
        if self.buffer.is_some() && needed <= self.capacity {
            return Ok(false);
        }

        let capacity = self.grown_capacity(self.capacity, needed);
        match self.buffer {
            Some(buffer) => gpu.resize_buffer(buffer, capacity)?,
            None => self.buffer = Some(gpu.create_buffer(self.usage, capacity)?),
        }
        tracing::debug!(
            usage = ?self.usage,
            from = self.capacity,
            to = capacity,
            "grew gpu buffer"
        );
        self.capacity = capacity;
        Ok(true)
    }

    /// Writes `bytes` at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is unallocated, the mapping fails, or the write
    /// does not fit in the buffer. Nothing is written in the last case.
    pub fn write(&self, gpu: &mut dyn GpuContext, offset: usize, bytes: &[u8]) -> GpuResult<()> {
        let Some(buffer) = self.buffer else {
            return Err(GpuError::InvalidHandle {
                kind: "buffer",
                id: 0,
            });
        };
        let end = offset.checked_add(bytes.len());
        let fits = end
            .and_then(|end| u64::try_from(end).ok())
            .is_some_and(|end| end <= self.capacity);
        if !fits {
            return Err(out_of_bounds(buffer, offset, bytes.len(), self.capacity));
        }

        let mut written = false;
        gpu.map_buffer(buffer, &mut |mapped: &mut [u8]| {
            if let Some(target) = end.and_then(|end| mapped.get_mut(offset..end)) {
                target.copy_from_slice(bytes);
                written = true;
            }
        })?;
        if written {
            Ok(())
        } else {
            Err(out_of_bounds(buffer, offset, bytes.len(), self.capacity))
        }
    }

    /// Releases the backing buffer.
    pub fn delete(&mut self, gpu: &mut dyn GpuContext) {
        if let Some(buffer) = self.buffer.take() {
            gpu.delete_buffer(buffer);
        }
        self.capacity = 0;
    }
}

fn out_of_bounds(buffer: BufferId, offset: usize, len: usize, capacity: u64) -> GpuError {
    GpuError::MapFailed {
        buffer: buffer.0,
        reason: format!("write of {len} bytes at {offset} exceeds capacity {capacity}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    #[test]
    fn test_lazy_allocation() {
        let mut gpu = HeadlessGpu::new();
        let mut buffer = GrowableBuffer::new(BufferUsage::Vertex, 1.6);
        assert!(buffer.id().is_none());

        assert!(buffer.ensure_capacity(&mut gpu, 10).unwrap());
        assert_eq!(buffer.capacity(), MIN_BUFFER_SIZE);
        assert!(!buffer.ensure_capacity(&mut gpu, MIN_BUFFER_SIZE).unwrap());
    }

    #[test]
    fn test_geometric_growth_preserves_contents() {
        let mut gpu = HeadlessGpu::new();
        let mut buffer = GrowableBuffer::new(BufferUsage::Instance, 2.0);
        buffer.ensure_capacity(&mut gpu, 4).unwrap();
        buffer.write(&mut gpu, 0, &[1, 2, 3, 4]).unwrap();

        assert!(buffer.ensure_capacity(&mut gpu, MIN_BUFFER_SIZE + 1).unwrap());
        assert_eq!(buffer.capacity(), MIN_BUFFER_SIZE * 2);

        let id = buffer.id().unwrap();
        assert_eq!(&gpu.buffer_contents(id).unwrap()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_growth_takes_needed_when_larger() {
        let buffer = GrowableBuffer::new(BufferUsage::Vertex, 2.0);
        assert_eq!(buffer.grown_capacity(2000, 10_000), 10_000);
        assert_eq!(buffer.grown_capacity(10_000, 10_001), 20_000);
        assert_eq!(buffer.grown_capacity(0, 1), MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_write_past_capacity_fails_untouched() {
        let mut gpu = HeadlessGpu::new();
        let mut buffer = GrowableBuffer::new(BufferUsage::Instance, 1.6);
        buffer.ensure_capacity(&mut gpu, 8).unwrap();
        let id = buffer.id().unwrap();

        let tail = usize::try_from(MIN_BUFFER_SIZE).unwrap() - 2;
        let err = buffer.write(&mut gpu, tail, &[9, 9, 9, 9]).unwrap_err();
        assert!(matches!(err, GpuError::MapFailed { buffer, .. } if buffer == id.0));
        assert!(gpu.buffer_contents(id).unwrap().iter().all(|&b| b == 0));

        buffer.write(&mut gpu, tail, &[7, 7]).unwrap();
        assert_eq!(&gpu.buffer_contents(id).unwrap()[tail..], &[7, 7]);
    }

    #[test]
    fn test_write_to_unallocated_buffer_fails() {
        let mut gpu = HeadlessGpu::new();
        let buffer = GrowableBuffer::new(BufferUsage::Instance, 1.6);
        assert!(matches!(
            buffer.write(&mut gpu, 0, &[1]),
            Err(GpuError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_delete_releases() {
        let mut gpu = HeadlessGpu::new();
        let mut buffer = GrowableBuffer::new(BufferUsage::Index, 1.6);
        buffer.ensure_capacity(&mut gpu, 8).unwrap();
        buffer.delete(&mut gpu);
        assert!(buffer.id().is_none());
        assert_eq!(gpu.live_buffers(), 0);
    }
}
