//! # GPU Context
//!
//! The renderer talks to the graphics API through [`GpuContext`], a small
//! object-safe trait over GL-style handles. A context is owned by exactly one
//! thread; `&mut dyn GpuContext` is never `Send`, so worker plans cannot
//! capture it.
//!
//! ```text
//! Engine::flush ────────► create / resize / map / delete buffers
//! ProgramCache::reload ─► compile / link / delete programs
//! DrawManager::render ──► capture state, bind, uniforms, draw, restore state
//! ```

mod buffer;
mod headless;

use std::fmt;
use std::ops::{Deref, DerefMut};

pub use buffer::GrowableBuffer;
pub use headless::{GpuCommand, HeadlessGpu, UniformValue};

use crate::error::GpuResult;
use crate::material::Material;

/// Handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Handle to a compiled shader object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Handle to a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Mesh vertex data.
    Vertex,
    /// Element indices.
    Index,
    /// Per-instance attributes.
    Instance,
}

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Frame-global uniform values bound once per render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    /// View-projection matrix, translated so the render origin is at zero.
    pub view_projection: [[f32; 4]; 4],
    /// Camera position relative to the render origin.
    pub camera_position: [f32; 3],
    /// Integer render origin in world space.
    pub origin: [i32; 3],
}

/// One instanced indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawElements {
    /// Shared vertex buffer of the mesh pool.
    pub vertex_buffer: BufferId,
    /// First vertex of the mesh inside the vertex buffer.
    pub base_vertex: u32,
    /// Element buffer for the mesh's index sequence.
    pub index_buffer: BufferId,
    /// Number of indices to draw.
    pub index_count: u32,
    /// Per-instance attribute buffer.
    pub instance_buffer: BufferId,
    /// First instance to draw.
    pub base_instance: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
}

/// Snapshot of the pipeline state the renderer touches.
///
/// Captured before a pass and restored after it so the host's own rendering
/// sees the state it left behind.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpuState {
    /// Bound program.
    pub program: Option<ProgramId>,
    /// Bound vertex buffer.
    pub vertex_buffer: Option<BufferId>,
    /// Applied material render state.
    pub material: Option<Material>,
    /// Bound crumbling texture stage.
    pub crumbling_stage: Option<u8>,
}

/// Graphics API seam.
///
/// Every method must be called on the thread that owns the context.
pub trait GpuContext {
    /// Returns true if instanced arrays are available.
    fn supports_instancing(&self) -> bool;

    /// Allocates a zero-filled buffer.
    ///
    /// # Errors
    ///
    /// Fails when the device cannot provide `size` bytes.
    fn create_buffer(&mut self, usage: BufferUsage, size: u64) -> GpuResult<BufferId>;

    /// Changes a buffer's size, preserving the overlapping prefix.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle or when the device cannot provide `size` bytes.
    fn resize_buffer(&mut self, buffer: BufferId, size: u64) -> GpuResult<()>;

    /// Maps a buffer for writing and hands the mapped bytes to `writer`.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle or if the mapping is refused.
    fn map_buffer(&mut self, buffer: BufferId, writer: &mut dyn FnMut(&mut [u8])) -> GpuResult<()>;

    /// Releases a buffer.
    fn delete_buffer(&mut self, buffer: BufferId);

    /// Compiles one shader stage.
    ///
    /// # Errors
    ///
    /// Returns the driver's info log on failure.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String>;

    /// Releases a shader object.
    fn delete_shader(&mut self, shader: ShaderId);

    /// Links shader objects into a program.
    ///
    /// # Errors
    ///
    /// Returns the driver's link log on failure.
    fn link_program(&mut self, shaders: &[ShaderId]) -> Result<ProgramId, String>;

    /// Releases a program.
    fn delete_program(&mut self, program: ProgramId);

    /// Captures the state a render pass is about to change.
    fn capture_state(&mut self) -> GpuState;

    /// Restores a captured state.
    fn restore_state(&mut self, state: GpuState);

    /// Binds the frame-global uniforms.
    fn bind_frame_uniforms(&mut self, uniforms: &FrameUniforms);

    /// Binds the shared mesh vertex buffer.
    fn bind_vertex_buffer(&mut self, buffer: BufferId);

    /// Binds a program for subsequent draws.
    fn bind_program(&mut self, program: ProgramId);

    /// Sets an `int` uniform on a program.
    fn set_uniform_i32(&mut self, program: ProgramId, name: &str, value: i32);

    /// Sets a `uvec4` uniform on a program.
    fn set_uniform_uvec4(&mut self, program: ProgramId, name: &str, value: [u32; 4]);

    /// Binds the crumbling overlay texture for a damage stage.
    fn bind_crumbling_texture(&mut self, stage: u8);

    /// Applies a material's fixed-function render state.
    fn apply_material(&mut self, material: &Material);

    /// Resets the fixed-function state to defaults.
    fn reset_material(&mut self);

    /// Issues an instanced indexed draw.
    fn draw_elements(&mut self, draw: &DrawElements);
}

/// Restores the captured pipeline state when dropped.
///
/// Derefs to the wrapped context, so a render pass issues its calls through
/// the guard and cannot forget the restore on an early return.
pub struct StateGuard<'a> {
    gpu: &'a mut dyn GpuContext,
    saved: GpuState,
}

impl<'a> StateGuard<'a> {
    /// Captures the current state of `gpu`.
    #[must_use]
    pub fn new(gpu: &'a mut dyn GpuContext) -> Self {
        let saved = gpu.capture_state();
        Self { gpu, saved }
    }
}

impl<'a> Deref for StateGuard<'a> {
    type Target = dyn GpuContext + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.gpu
    }
}

impl<'a> DerefMut for StateGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.gpu
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.gpu.restore_state(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_guard_restores_on_drop() {
        let mut gpu = HeadlessGpu::new();
        gpu.bind_program(ProgramId(3));

        {
            let mut guard = StateGuard::new(&mut gpu);
            guard.bind_program(ProgramId(9));
            guard.bind_crumbling_texture(4);
        }

        let state = gpu.capture_state();
        assert_eq!(state.program, Some(ProgramId(3)));
        assert_eq!(state.crumbling_stage, None);
    }
}
