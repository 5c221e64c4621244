//! The instanced draw manager.
//!
//! Owned by the GPU thread. [`DrawManager::flush`] brings every buffer up to
//! date once per frame; the render methods only bind and draw.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::compile::{
    ContextShader, ProgramCache, ProgramKey, BASE_INSTANCE_UNIFORM,
    PACKED_MATERIAL_UNIFORM,
};
use crate::error::GpuResult;
use crate::gpu::{
    BufferId, BufferUsage, DrawElements, FrameUniforms, GpuContext, GrowableBuffer, StateGuard,
};
use crate::instance::{ErasedInstancer, InstancerId, InstancerRegistry, PendingInstancer};
use crate::mesh::{BlockVertex, MeshPool, VertexLayout};

use super::{
    CrumblingBlock, DrawCall, DrawCalls, DrawHandle, FrameStats, GroupKey, RenderStage,
    StageDraws,
};

/// GPU-side state of one instancer.
#[derive(Debug)]
struct InstancerGpu {
    instancer: Arc<dyn ErasedInstancer>,
    buffer: GrowableBuffer,
    draws: Vec<DrawHandle>,
    /// Instances in the buffer as of the last flush.
    instance_count: u32,
}

/// Turns instancers into draws.
#[derive(Debug)]
pub struct DrawManager {
    registry: Arc<InstancerRegistry>,
    programs: Arc<ProgramCache>,
    instancers: HashMap<InstancerId, InstancerGpu>,
    draws: DrawCalls,
    stages: BTreeMap<RenderStage, StageDraws>,
    mesh_pool: MeshPool,
    growth_factor: f64,
    stats: FrameStats,
}

impl DrawManager {
    /// Creates a draw manager for block-vertex meshes.
    #[must_use]
    pub fn new(
        registry: Arc<InstancerRegistry>,
        programs: Arc<ProgramCache>,
        growth_factor: f64,
    ) -> Self {
        Self::with_layout(registry, programs, BlockVertex::LAYOUT, growth_factor)
    }

    /// Creates a draw manager for meshes in `layout`.
    #[must_use]
    pub fn with_layout(
        registry: Arc<InstancerRegistry>,
        programs: Arc<ProgramCache>,
        layout: VertexLayout,
        growth_factor: f64,
    ) -> Self {
        Self {
            registry,
            programs,
            instancers: HashMap::new(),
            draws: DrawCalls::default(),
            stages: BTreeMap::new(),
            mesh_pool: MeshPool::new(layout, growth_factor),
            growth_factor,
            stats: FrameStats::default(),
        }
    }

    /// Brings draws and buffers up to date with the instancers.
    ///
    /// New instancers get their draw calls and pooled meshes, every
    /// instancer is updated, empty ones are torn down, dirty instance bytes
    /// are uploaded and the mesh pool is flushed.
    ///
    /// # Errors
    ///
    /// Buffer allocation or mapping failures. The frame must not be drawn.
    pub fn flush(&mut self, gpu: &mut dyn GpuContext) -> GpuResult<()> {
        for pending in self.registry.take_pending() {
            self.initialize(pending);
        }

        for id in self.registry.update_and_remove_empty() {
            self.teardown(gpu, id);
        }

        for entry in self.instancers.values_mut() {
            upload_instances(gpu, entry)?;
        }

        for stage in self.stages.values_mut() {
            stage.retain_live(&self.draws);
        }
        self.stages.retain(|_, stage| !stage.is_empty());

        self.mesh_pool.flush(gpu)?;
        self.programs.collect_garbage(gpu);

        self.stats.live_instancers = u32::try_from(self.instancers.len()).unwrap_or(u32::MAX);
        self.stats.mesh_pool_bytes = self.mesh_pool.byte_size();
        tracing::trace!(
            instancers = self.instancers.len(),
            draws = self.draws.len(),
            mesh_bytes = self.mesh_pool.byte_size(),
            "draw manager flushed"
        );
        Ok(())
    }

    fn initialize(&mut self, pending: PendingInstancer) {
        let PendingInstancer { instancer, model } = pending;
        let key = *instancer.key();
        let group = GroupKey {
            instance_type: key.instance_type,
            environment: key.environment,
        };

        let mut draws = Vec::with_capacity(model.meshes().len());
        for model_mesh in model.meshes() {
            if model_mesh.mesh.is_empty() {
                continue;
            }
            let mesh = self.mesh_pool.alloc(&model_mesh.mesh);
            let draw = self.draws.insert(DrawCall {
                instancer: instancer.id(),
                mesh,
                material: model_mesh.material,
                group,
                stage: key.stage,
            });
            self.stages.entry(key.stage).or_default().insert(group, draw);
            draws.push(draw);
        }

        self.instancers.insert(
            instancer.id(),
            InstancerGpu {
                instancer,
                buffer: GrowableBuffer::new(BufferUsage::Instance, self.growth_factor),
                draws,
                instance_count: 0,
            },
        );
    }

    fn teardown(&mut self, gpu: &mut dyn GpuContext, id: InstancerId) {
        let Some(mut entry) = self.instancers.remove(&id) else {
            return;
        };
        for draw in entry.draws.drain(..) {
            if let Some(call) = self.draws.remove(draw) {
                self.mesh_pool.release(call.mesh);
            }
        }
        entry.buffer.delete(gpu);
        tracing::trace!(instancer = ?id, "empty instancer removed");
    }

    /// Draws every draw call of `stage`.
    ///
    /// Groups without a program in the current set are skipped. The GPU
    /// state is restored on return.
    pub fn render_stage(
        &mut self,
        gpu: &mut dyn GpuContext,
        stage: RenderStage,
        uniforms: &FrameUniforms,
    ) {
        let Some(stage_draws) = self.stages.get(&stage) else {
            return;
        };
        let (Some(programs), Some(vertex_buffer)) = (self.programs.get(), self.mesh_pool.vertex_buffer())
        else {
            return;
        };

        let mut gpu = StateGuard::new(gpu);
        gpu.bind_frame_uniforms(uniforms);
        gpu.bind_vertex_buffer(vertex_buffer);

        let mut counts = DrawCounts::default();
        for (group, handles) in stage_draws.groups() {
            let key = ProgramKey::new(group.instance_type, ContextShader::Default);
            let Some(program) = programs.get(key) else {
                counts.skipped += handles.len();
                continue;
            };
            gpu.bind_program(program);
            gpu.set_uniform_i32(program, BASE_INSTANCE_UNIFORM, 0);

            for handle in handles {
                let Some(call) = self.draws.get(*handle) else {
                    continue;
                };
                let Some(draw) = self.draw_elements(call, vertex_buffer, None) else {
                    continue;
                };
                gpu.set_uniform_uvec4(program, PACKED_MATERIAL_UNIFORM, call.material.packed());
                gpu.apply_material(&call.material);
                gpu.draw_elements(&draw);
                counts.record(&draw);

                #[cfg(feature = "draw_trace")]
                tracing::trace!(%stage, instancer = ?call.instancer, instances = draw.instance_count, "draw");
            }
        }
        gpu.reset_material();
        drop(gpu);

        counts.apply(&mut self.stats);
    }

    /// Draws the block-breaking overlay over the given instances.
    ///
    /// Draws are bucketed by program group, then by damage stage, and each
    /// instance is drawn on its own with the crumbling variant of its mesh's
    /// material.
    pub fn render_crumbling(
        &mut self,
        gpu: &mut dyn GpuContext,
        blocks: &[CrumblingBlock],
        uniforms: &FrameUniforms,
    ) {
        if blocks.is_empty() {
            return;
        }
        let (Some(programs), Some(vertex_buffer)) = (self.programs.get(), self.mesh_pool.vertex_buffer())
        else {
            return;
        };

        let mut buckets: BTreeMap<GroupKey, BTreeMap<u8, Vec<(DrawHandle, u32)>>> = BTreeMap::new();
        for block in blocks {
            for instance in &block.instances {
                let Some(index) = instance.index().and_then(|index| u32::try_from(index).ok())
                else {
                    continue;
                };
                let Some(entry) = self.instancers.get(&instance.instancer()) else {
                    continue;
                };
                if index >= entry.instance_count {
                    continue;
                }
                for draw in &entry.draws {
                    let Some(call) = self.draws.get(*draw) else {
                        continue;
                    };
                    buckets
                        .entry(call.group)
                        .or_default()
                        .entry(block.progress)
                        .or_default()
                        .push((*draw, index));
                }
            }
        }
        if buckets.is_empty() {
            return;
        }

        let mut gpu = StateGuard::new(gpu);
        gpu.bind_frame_uniforms(uniforms);
        gpu.bind_vertex_buffer(vertex_buffer);

        let mut counts = DrawCounts::default();
        for (group, by_progress) in &buckets {
            let key = ProgramKey::new(group.instance_type, ContextShader::Crumbling);
            let Some(program) = programs.get(key) else {
                counts.skipped += by_progress.values().map(Vec::len).sum::<usize>();
                continue;
            };
            gpu.bind_program(program);

            for (progress, draws) in by_progress {
                gpu.bind_crumbling_texture(*progress);
                for (handle, index) in draws {
                    let Some(call) = self.draws.get(*handle) else {
                        continue;
                    };
                    let Some(draw) = self.draw_elements(call, vertex_buffer, Some(*index)) else {
                        continue;
                    };
                    let material = call.material.crumbling();
                    gpu.set_uniform_uvec4(program, PACKED_MATERIAL_UNIFORM, material.packed());
                    gpu.set_uniform_i32(
                        program,
                        BASE_INSTANCE_UNIFORM,
                        i32::try_from(*index).unwrap_or(i32::MAX),
                    );
                    gpu.apply_material(&material);
                    gpu.draw_elements(&draw);
                    counts.record(&draw);
                }
            }
        }
        gpu.reset_material();
        drop(gpu);

        counts.apply(&mut self.stats);
    }

    /// Builds the draw for a call. `single` draws one instance at that index
    /// instead of all of them.
    fn draw_elements(
        &self,
        call: &DrawCall,
        vertex_buffer: BufferId,
        single: Option<u32>,
    ) -> Option<DrawElements> {
        let entry = self.instancers.get(&call.instancer)?;
        if entry.instance_count == 0 {
            return None;
        }
        let pooled = self.mesh_pool.get(call.mesh)?;
        let stride = self.mesh_pool.layout().stride.max(1);

        let (base_instance, instance_count) = match single {
            Some(index) => (index, 1),
            None => (0, entry.instance_count),
        };
        Some(DrawElements {
            vertex_buffer,
            base_vertex: u32::try_from(pooled.byte_index() / stride).ok()?,
            index_buffer: self.mesh_pool.index_buffer(call.mesh)?,
            index_count: pooled.mesh().index_count(),
            instance_buffer: entry.buffer.id()?,
            base_instance,
            instance_count,
        })
    }

    /// Returns the draws of a stage.
    #[must_use]
    pub fn stage(&self, stage: RenderStage) -> Option<&StageDraws> {
        self.stages.get(&stage)
    }

    /// Returns the number of tracked instancers.
    #[must_use]
    pub fn instancer_count(&self) -> usize {
        self.instancers.len()
    }

    /// Returns true if an instancer is tracked.
    #[must_use]
    pub fn tracks(&self, id: InstancerId) -> bool {
        self.instancers.contains_key(&id)
    }

    /// Returns the mesh pool.
    #[must_use]
    pub fn mesh_pool(&self) -> &MeshPool {
        &self.mesh_pool
    }

    /// Returns the counters accumulated since the last
    /// [`DrawManager::take_stats`].
    #[must_use]
    pub const fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Returns the counters and clears the per-draw ones.
    pub fn take_stats(&mut self) -> FrameStats {
        let stats = self.stats;
        self.stats.reset_draws();
        stats
    }

    /// Releases every GPU resource and forgets every draw.
    pub fn delete(&mut self, gpu: &mut dyn GpuContext) {
        for (_, mut entry) in self.instancers.drain() {
            entry.buffer.delete(gpu);
        }
        self.draws.clear();
        self.stages.clear();
        self.mesh_pool.delete(gpu);
        self.stats = FrameStats::default();
    }
}

/// Uploads the bytes an instancer changed since the last flush.
fn upload_instances(gpu: &mut dyn GpuContext, entry: &mut InstancerGpu) -> GpuResult<()> {
    let count = entry.instancer.instance_count();
    let needed = u64::try_from(count * entry.instancer.stride()).unwrap_or(u64::MAX);
    if needed > 0 {
        entry.buffer.ensure_capacity(gpu, needed)?;
    }
    if let Some((offset, bytes)) = entry.instancer.take_dirty() {
        entry.buffer.write(gpu, offset, &bytes)?;
    }
    entry.instance_count = u32::try_from(count).unwrap_or(u32::MAX);
    Ok(())
}

#[derive(Default)]
struct DrawCounts {
    draws: u32,
    instances: u32,
    skipped: usize,
}

impl DrawCounts {
    fn record(&mut self, draw: &DrawElements) {
        self.draws += 1;
        self.instances += draw.instance_count;
    }

    fn apply(&self, stats: &mut FrameStats) {
        stats.draw_calls += self.draws;
        stats.instances += self.instances;
        stats.skipped_draws += u32::try_from(self.skipped).unwrap_or(u32::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompileRequest, ShaderSources};
    use crate::gpu::{GpuCommand, HeadlessGpu, UniformValue};
    use crate::instance::{InstanceType, InstancerProvider, Oriented, Shadow, Transformed};
    use crate::material::{Material, Transparency};
    use crate::mesh::{Mesh, Model, ModelMesh};

    fn uniforms() -> FrameUniforms {
        FrameUniforms {
            view_projection: [[0.0; 4]; 4],
            camera_position: [0.0; 3],
            origin: [0; 3],
        }
    }

    fn quad(x: f32) -> Arc<Mesh> {
        let mut vertices = [BlockVertex::default(); 4];
        vertices[0].position = [x, 0.0, 0.0];
        Arc::new(Mesh::quads(&vertices))
    }

    struct Fixture {
        gpu: HeadlessGpu,
        registry: Arc<InstancerRegistry>,
        manager: DrawManager,
    }

    fn fixture() -> Fixture {
        let mut gpu = HeadlessGpu::new();
        let programs = Arc::new(ProgramCache::new());
        programs
            .reload(
                &mut gpu,
                &CompileRequest::new(
                    ShaderSources::builtin(),
                    vec![Transformed::info(), Oriented::info(), Shadow::info()],
                    BlockVertex::LAYOUT.attribute_count(),
                ),
            )
            .unwrap();
        let registry = Arc::new(InstancerRegistry::new());
        let manager = DrawManager::new(Arc::clone(&registry), programs, 2.0);
        Fixture {
            gpu,
            registry,
            manager,
        }
    }

    #[test]
    fn test_one_draw_per_mesh_with_all_instances() {
        let mut f = fixture();
        let model = Model::new(vec![
            ModelMesh {
                mesh: quad(0.0),
                material: Material::default(),
            },
            ModelMesh {
                mesh: quad(1.0),
                material: Material {
                    transparency: Transparency::Translucent,
                    ..Material::default()
                },
            },
        ]);
        let provider = InstancerProvider::new(Arc::clone(&f.registry), RenderStage::AfterEntities);
        let instancer = provider.instancer::<Transformed>(&model);
        let _handles: Vec<_> = (0..3).map(|_| instancer.create_instance()).collect();

        f.manager.flush(&mut f.gpu).unwrap();
        f.gpu.take_commands();
        f.manager.render_stage(&mut f.gpu, RenderStage::AfterEntities, &uniforms());

        let draws = f.gpu.draws();
        assert_eq!(draws.len(), 2);
        assert!(draws.iter().all(|draw| draw.instance_count == 3));
        assert_eq!(draws[0].base_vertex, 0);
        assert_eq!(draws[1].base_vertex, 4);
        assert_eq!(f.manager.stats().draw_calls, 2);
        assert_eq!(f.manager.stats().instances, 6);

        // other stages draw nothing
        f.gpu.take_commands();
        f.manager.render_stage(&mut f.gpu, RenderStage::AfterParticles, &uniforms());
        assert!(f.gpu.commands().is_empty());
    }

    #[test]
    fn test_instance_bytes_uploaded() {
        let mut f = fixture();
        let model = Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default());
        let provider = InstancerProvider::new(Arc::clone(&f.registry), RenderStage::AfterEntities);
        let instancer = provider.instancer::<Shadow>(&model);
        let handle = instancer.create_instance();
        handle.update(|shadow| shadow.radius = 2.5);

        f.manager.flush(&mut f.gpu).unwrap();
        f.manager.render_stage(&mut f.gpu, RenderStage::AfterEntities, &uniforms());

        let draw = f.gpu.draws()[0];
        let bytes = f.gpu.buffer_contents(draw.instance_buffer).unwrap();
        let read = Shadow::read(&bytes[..Shadow::stride()]);
        assert!((read.radius - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_instancer_stops_drawing() {
        let mut f = fixture();
        let model = Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default());
        let provider = InstancerProvider::new(Arc::clone(&f.registry), RenderStage::AfterEntities);
        let instancer = provider.instancer::<Transformed>(&model);
        let handle = instancer.create_instance();

        f.manager.flush(&mut f.gpu).unwrap();
        assert!(f.manager.tracks(instancer.id()));
        let buffers = f.gpu.live_buffers();

        handle.delete();
        f.manager.flush(&mut f.gpu).unwrap();
        assert!(!f.manager.tracks(instancer.id()));
        assert!(f.manager.stage(RenderStage::AfterEntities).is_none());
        assert!(f.manager.mesh_pool().is_empty());
        // the instance buffer went with it
        assert_eq!(f.gpu.live_buffers(), buffers - 1);

        f.gpu.take_commands();
        f.manager.render_stage(&mut f.gpu, RenderStage::AfterEntities, &uniforms());
        assert!(f.gpu.draws().is_empty());
    }

    #[test]
    fn test_missing_program_skips_group() {
        let mut gpu = HeadlessGpu::new();
        let programs = Arc::new(ProgramCache::new());
        programs
            .reload(
                &mut gpu,
                &CompileRequest::new(
                    ShaderSources::builtin(),
                    vec![Transformed::info()],
                    BlockVertex::LAYOUT.attribute_count(),
                ),
            )
            .unwrap();
        let registry = Arc::new(InstancerRegistry::new());
        let mut manager = DrawManager::new(Arc::clone(&registry), programs, 2.0);
        let model = Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default());
        let provider = InstancerProvider::new(registry, RenderStage::AfterEntities);
        let transformed = provider.instancer::<Transformed>(&model);
        let oriented = provider.instancer::<Oriented>(&model);
        let _a = transformed.create_instance();
        let _b = oriented.create_instance();

        manager.flush(&mut gpu).unwrap();
        gpu.take_commands();
        manager.render_stage(&mut gpu, RenderStage::AfterEntities, &uniforms());

        assert_eq!(gpu.draws().len(), 1);
        assert_eq!(manager.stats().skipped_draws, 1);
    }

    #[test]
    fn test_state_restored_after_stage() {
        let mut f = fixture();
        let model = Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default());
        let provider = InstancerProvider::new(Arc::clone(&f.registry), RenderStage::AfterEntities);
        let _handle = provider.instancer::<Transformed>(&model).create_instance();
        f.manager.flush(&mut f.gpu).unwrap();

        let before = f.gpu.capture_state();
        f.manager.render_stage(&mut f.gpu, RenderStage::AfterEntities, &uniforms());
        assert_eq!(f.gpu.capture_state(), before);
        assert!(matches!(f.gpu.commands().last(), Some(GpuCommand::RestoreState(_))));
    }

    #[test]
    fn test_crumbling_draws_single_instances_by_progress() {
        let mut f = fixture();
        let model = Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default());
        let provider = InstancerProvider::new(Arc::clone(&f.registry), RenderStage::AfterEntities);
        let instancer = provider.instancer::<Transformed>(&model);
        let handles: Vec<_> = (0..4).map(|_| instancer.create_instance()).collect();
        f.manager.flush(&mut f.gpu).unwrap();

        let blocks = [
            CrumblingBlock {
                progress: 7,
                instances: vec![handles[3].instance_ref()],
            },
            CrumblingBlock {
                progress: 2,
                instances: vec![handles[1].instance_ref(), handles[2].instance_ref()],
            },
        ];
        f.gpu.take_commands();
        f.manager.render_crumbling(&mut f.gpu, &blocks, &uniforms());

        let draws = f.gpu.draws();
        assert_eq!(draws.len(), 3);
        assert!(draws.iter().all(|draw| draw.instance_count == 1));
        let bases: Vec<u32> = draws.iter().map(|draw| draw.base_instance).collect();
        // progress 2 bucket first
        assert_eq!(bases, vec![1, 2, 3]);

        let textures: Vec<u8> = f
            .gpu
            .commands()
            .iter()
            .filter_map(|command| match command {
                GpuCommand::BindCrumblingTexture(stage) => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(textures, vec![2, 7]);

        let crumbling = Material::default().crumbling().packed();
        assert!(f.gpu.commands().iter().any(|command| matches!(
            command,
            GpuCommand::SetUniform { value: UniformValue::UVec4(packed), .. } if *packed == crumbling
        )));
    }

    #[test]
    fn test_deleted_instance_is_not_crumbled() {
        let mut f = fixture();
        let model = Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default());
        let provider = InstancerProvider::new(Arc::clone(&f.registry), RenderStage::AfterEntities);
        let instancer = provider.instancer::<Transformed>(&model);
        let _kept = instancer.create_instance();
        let gone = instancer.create_instance();
        let reference = gone.instance_ref();
        gone.delete();
        f.manager.flush(&mut f.gpu).unwrap();

        f.gpu.take_commands();
        f.manager.render_crumbling(
            &mut f.gpu,
            &[CrumblingBlock {
                progress: 0,
                instances: vec![reference],
            }],
            &uniforms(),
        );
        assert!(f.gpu.commands().is_empty());
    }
}
