//! Headless recording GPU context.
//!
//! Keeps buffers in memory, records every bind, uniform and draw, and emulates
//! just enough driver behavior for compile and link failures to be tested:
//! a shader containing an `#error` directive fails with a GL-style log naming
//! the line, and a program links only with both stages present.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use crate::error::{GpuError, GpuResult};
use crate::material::Material;

use super::{
    BufferId, BufferUsage, DrawElements, FrameUniforms, GpuContext, GpuState, ProgramId, ShaderId,
    ShaderStage,
};

/// A uniform value as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformValue {
    /// `int` uniform.
    Int(i32),
    /// `uvec4` uniform.
    UVec4([u32; 4]),
}

/// A recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Frame uniforms were bound.
    BindFrameUniforms(FrameUniforms),
    /// The mesh vertex buffer was bound.
    BindVertexBuffer(BufferId),
    /// A program was bound.
    BindProgram(ProgramId),
    /// A uniform was set.
    SetUniform {
        /// Program the uniform belongs to.
        program: ProgramId,
        /// Uniform name.
        name: String,
        /// Value set.
        value: UniformValue,
    },
    /// A crumbling texture stage was bound.
    BindCrumblingTexture(u8),
    /// Material render state was applied.
    ApplyMaterial(Material),
    /// Material render state was reset.
    ResetMaterial,
    /// An instanced draw was issued.
    Draw(DrawElements),
    /// A captured state was restored.
    RestoreState(GpuState),
}

/// In-memory [`GpuContext`] for tests and headless runs.
pub struct HeadlessGpu {
    next_id: u32,
    buffers: HashMap<BufferId, Vec<u8>>,
    shaders: HashMap<ShaderId, ShaderStage>,
    programs: HashSet<ProgramId>,
    commands: Vec<GpuCommand>,
    state: GpuState,
    instancing: bool,
    memory_limit: Option<u64>,
    map_count: usize,
    /// GPU contexts stay on their owning thread.
    _not_send: PhantomData<*const ()>,
}

impl HeadlessGpu {
    /// Creates a context with instancing support and no memory limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashSet::new(),
            commands: Vec::new(),
            state: GpuState::default(),
            instancing: true,
            memory_limit: None,
            map_count: 0,
            _not_send: PhantomData,
        }
    }

    /// Reports instancing as unsupported.
    #[must_use]
    pub fn without_instancing(mut self) -> Self {
        self.instancing = false;
        self
    }

    /// Caps the total bytes of all live buffers.
    #[must_use]
    pub fn with_memory_limit(mut self, limit: u64) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    /// Returns a buffer's bytes.
    #[must_use]
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Returns the number of live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Returns the number of live programs.
    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Returns the number of live shader objects.
    #[must_use]
    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    /// Returns true if `program` is live.
    #[must_use]
    pub fn is_program_live(&self, program: ProgramId) -> bool {
        self.programs.contains(&program)
    }

    /// Returns how many times a buffer was mapped.
    #[must_use]
    pub fn map_count(&self) -> usize {
        self.map_count
    }

    /// Returns the recorded commands.
    #[must_use]
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Drains the recorded commands.
    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Returns every recorded draw, in order.
    #[must_use]
    pub fn draws(&self) -> Vec<DrawElements> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                GpuCommand::Draw(draw) => Some(*draw),
                _ => None,
            })
            .collect()
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_memory(&self, replacing: u64, size: u64) -> GpuResult<()> {
        let Some(limit) = self.memory_limit else {
            return Ok(());
        };
        let live: u64 = self.buffers.values().map(|b| b.len() as u64).sum();
        if live - replacing + size > limit {
            return Err(GpuError::OutOfMemory {
                requested: size,
                limit,
            });
        }
        Ok(())
    }
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

fn to_len(size: u64) -> GpuResult<usize> {
    usize::try_from(size).map_err(|_| GpuError::OutOfMemory {
        requested: size,
        limit: usize::MAX as u64,
    })
}

impl GpuContext for HeadlessGpu {
    fn supports_instancing(&self) -> bool {
        self.instancing
    }

    fn create_buffer(&mut self, _usage: BufferUsage, size: u64) -> GpuResult<BufferId> {
        self.check_memory(0, size)?;
        let bytes = vec![0; to_len(size)?];
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id, bytes);
        Ok(id)
    }

    fn resize_buffer(&mut self, buffer: BufferId, size: u64) -> GpuResult<()> {
        let current = self
            .buffers
            .get(&buffer)
            .map(|b| b.len() as u64)
            .ok_or(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        self.check_memory(current, size)?;
        let len = to_len(size)?;
        if let Some(bytes) = self.buffers.get_mut(&buffer) {
            bytes.resize(len, 0);
        }
        Ok(())
    }

    fn map_buffer(&mut self, buffer: BufferId, writer: &mut dyn FnMut(&mut [u8])) -> GpuResult<()> {
        let bytes = self.buffers.get_mut(&buffer).ok_or(GpuError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        writer(bytes);
        self.map_count += 1;
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String> {
        if source.trim().is_empty() {
            return Err("0:0(0): error: empty shader source".to_owned());
        }
        for (index, line) in source.lines().enumerate() {
            if let Some(message) = line.trim_start().strip_prefix("#error") {
                return Err(format!("0:{}(1): error: {}", index + 1, message.trim()));
            }
        }
        let id = ShaderId(self.allocate_id());
        self.shaders.insert(id, stage);
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn link_program(&mut self, shaders: &[ShaderId]) -> Result<ProgramId, String> {
        let mut stages = Vec::with_capacity(shaders.len());
        for shader in shaders {
            match self.shaders.get(shader) {
                Some(stage) => stages.push(*stage),
                None => return Err(format!("error: shader object {} does not exist", shader.0)),
            }
        }
        for required in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if !stages.contains(&required) {
                return Err(format!("error: program has no {required} shader attached"));
            }
        }
        let id = ProgramId(self.allocate_id());
        self.programs.insert(id);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn capture_state(&mut self) -> GpuState {
        self.state
    }

    fn restore_state(&mut self, state: GpuState) {
        self.state = state;
        self.commands.push(GpuCommand::RestoreState(state));
    }

    fn bind_frame_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.commands.push(GpuCommand::BindFrameUniforms(*uniforms));
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) {
        self.state.vertex_buffer = Some(buffer);
        self.commands.push(GpuCommand::BindVertexBuffer(buffer));
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.state.program = Some(program);
        self.commands.push(GpuCommand::BindProgram(program));
    }

    fn set_uniform_i32(&mut self, program: ProgramId, name: &str, value: i32) {
        self.commands.push(GpuCommand::SetUniform {
            program,
            name: name.to_owned(),
            value: UniformValue::Int(value),
        });
    }

    fn set_uniform_uvec4(&mut self, program: ProgramId, name: &str, value: [u32; 4]) {
        self.commands.push(GpuCommand::SetUniform {
            program,
            name: name.to_owned(),
            value: UniformValue::UVec4(value),
        });
    }

    fn bind_crumbling_texture(&mut self, stage: u8) {
        self.state.crumbling_stage = Some(stage);
        self.commands.push(GpuCommand::BindCrumblingTexture(stage));
    }

    fn apply_material(&mut self, material: &Material) {
        self.state.material = Some(*material);
        self.commands.push(GpuCommand::ApplyMaterial(*material));
    }

    fn reset_material(&mut self) {
        self.state.material = None;
        self.commands.push(GpuCommand::ResetMaterial);
    }

    fn draw_elements(&mut self, draw: &DrawElements) {
        self.commands.push(GpuCommand::Draw(*draw));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_directive_fails_with_line() {
        let mut gpu = HeadlessGpu::new();
        let log = gpu
            .compile_shader(ShaderStage::Vertex, "#version 150\nvoid main() {}\n#error broken here\n")
            .unwrap_err();
        assert_eq!(log, "0:3(1): error: broken here");
        assert_eq!(gpu.live_shaders(), 0);
    }

    #[test]
    fn test_link_requires_both_stages() {
        let mut gpu = HeadlessGpu::new();
        let vert = gpu.compile_shader(ShaderStage::Vertex, "void main() {}").unwrap();
        assert!(gpu.link_program(&[vert]).is_err());

        let frag = gpu.compile_shader(ShaderStage::Fragment, "void main() {}").unwrap();
        let program = gpu.link_program(&[vert, frag]).unwrap();
        assert!(gpu.is_program_live(program));
    }

    #[test]
    fn test_memory_limit() {
        let mut gpu = HeadlessGpu::new().with_memory_limit(100);
        let buffer = gpu.create_buffer(BufferUsage::Vertex, 60).unwrap();
        assert!(matches!(
            gpu.create_buffer(BufferUsage::Vertex, 60),
            Err(GpuError::OutOfMemory { requested: 60, limit: 100 })
        ));
        gpu.resize_buffer(buffer, 100).unwrap();
        assert!(gpu.resize_buffer(buffer, 101).is_err());
    }

    #[test]
    fn test_map_writes_through() {
        let mut gpu = HeadlessGpu::new();
        let buffer = gpu.create_buffer(BufferUsage::Instance, 4).unwrap();
        gpu.map_buffer(buffer, &mut |bytes: &mut [u8]| bytes.copy_from_slice(&[9, 8, 7, 6]))
            .unwrap();
        assert_eq!(gpu.buffer_contents(buffer), Some(&[9, 8, 7, 6][..]));
        assert_eq!(gpu.map_count(), 1);
    }
}
