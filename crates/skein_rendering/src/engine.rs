//! # Engine
//!
//! Shared by the visualization manager and its plans. The thread-safe parts
//! (instancer registry, render origin, program cache) are used from worker
//! plans; the draw manager sits behind a mutex that only the GPU thread
//! takes.
//!
//! ```text
//! begin_frame ─► frame plan: update every instancer (parallel)
//! render_stage ─► first call of the frame flushes the draw manager
//!              └─► draw the stage
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use skein_core::{ForEachPlan, PlanContext, SkeinConfig};

use crate::compile::{CompileRequest, ProgramCache, ShaderSources};
use crate::draw::{CrumblingBlock, DrawManager, FrameStats, RenderStage};
use crate::error::{CompileResult, RenderResult};
use crate::gpu::{FrameUniforms, GpuContext};
use crate::instance::{ErasedInstancer, InstanceTypeInfo, InstancerProvider, InstancerRegistry};
use crate::mesh::BlockVertex;

/// Camera state handed in by the host each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    /// Camera position in world space.
    pub camera_position: [f64; 3],
    /// View-projection matrix with the camera at the origin.
    pub view_projection: [[f32; 4]; 4],
    /// Fraction of the current tick elapsed.
    pub partial_tick: f32,
}

/// Integer world position that GPU-side coordinates are relative to.
///
/// Keeps instance positions small enough for `f32` precision far from the
/// world origin.
#[derive(Debug)]
pub struct RenderOrigin {
    position: Mutex<[i32; 3]>,
    max_distance: f64,
}

impl RenderOrigin {
    /// Creates an origin at zero that moves once the camera is farther than
    /// `max_distance`.
    #[must_use]
    pub fn new(max_distance: f64) -> Self {
        Self {
            position: Mutex::new([0; 3]),
            max_distance,
        }
    }

    /// Returns the current origin.
    #[must_use]
    pub fn get(&self) -> [i32; 3] {
        *self.position.lock()
    }

    /// Moves the origin under the camera if the camera strayed too far.
    ///
    /// # Returns
    ///
    /// True if the origin moved.
    #[allow(clippy::cast_possible_truncation)]
    pub fn update(&self, camera: [f64; 3]) -> bool {
        let mut position = self.position.lock();
        let distance_squared: f64 = (0..3)
            .map(|axis| {
                let delta = f64::from(position[axis]) - camera[axis];
                delta * delta
            })
            .sum();
        if distance_squared <= self.max_distance * self.max_distance {
            return false;
        }
        *position = camera.map(|axis| axis.floor() as i32);
        true
    }
}

/// Owns instancers, programs and the draw manager.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<InstancerRegistry>,
    programs: Arc<ProgramCache>,
    origin: RenderOrigin,
    draw_manager: Mutex<DrawManager>,
    flushed: AtomicBool,
    dump_shader_source: bool,
}

impl Engine {
    /// Creates an engine configured by `config`.
    #[must_use]
    pub fn new(config: &SkeinConfig) -> Self {
        let registry = Arc::new(InstancerRegistry::new());
        let programs = Arc::new(ProgramCache::new());
        let draw_manager = DrawManager::new(
            Arc::clone(&registry),
            Arc::clone(&programs),
            config.mesh_pool_growth,
        );
        Self {
            registry,
            programs,
            origin: RenderOrigin::new(config.max_origin_distance),
            draw_manager: Mutex::new(draw_manager),
            flushed: AtomicBool::new(false),
            dump_shader_source: config.dump_shader_source,
        }
    }

    /// Returns the instancer registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<InstancerRegistry> {
        &self.registry
    }

    /// Returns the program cache.
    #[must_use]
    pub fn programs(&self) -> &Arc<ProgramCache> {
        &self.programs
    }

    /// Returns a provider creating instancers for `stage`.
    #[must_use]
    pub fn instancer_provider(&self, stage: RenderStage) -> InstancerProvider {
        InstancerProvider::new(Arc::clone(&self.registry), stage)
    }

    /// Returns the current render origin.
    #[must_use]
    pub fn render_origin(&self) -> [i32; 3] {
        self.origin.get()
    }

    /// Moves the render origin if needed. Moving it deletes every instance;
    /// visuals must be recreated against the new origin.
    ///
    /// # Returns
    ///
    /// True if the origin moved.
    pub fn update_render_origin(&self, camera: [f64; 3]) -> bool {
        if !self.origin.update(camera) {
            return false;
        }
        self.registry.clear_all();
        tracing::debug!(origin = ?self.origin.get(), "render origin moved");
        true
    }

    /// Builds the compile request for `instance_types` against the engine's
    /// mesh vertex format.
    #[must_use]
    pub fn compile_request(
        &self,
        sources: ShaderSources,
        instance_types: Vec<InstanceTypeInfo>,
    ) -> CompileRequest {
        let mut request =
            CompileRequest::new(sources, instance_types, BlockVertex::LAYOUT.attribute_count());
        request.dump_source = self.dump_shader_source;
        request
    }

    /// Compiles and installs a new program set.
    ///
    /// # Errors
    ///
    /// See [`ProgramCache::reload`]; the previous set stays active.
    pub fn reload_programs(
        &self,
        gpu: &mut dyn GpuContext,
        request: &CompileRequest,
    ) -> CompileResult<()> {
        self.programs.reload(gpu, request)
    }

    /// Creates the plan updating every instancer in parallel.
    #[must_use]
    pub fn create_frame_plan<C: PlanContext>(&self) -> ForEachPlan<C, Arc<dyn ErasedInstancer>> {
        let registry = Arc::clone(&self.registry);
        ForEachPlan::of(
            move |_: &C| registry.snapshot(),
            |instancer: &Arc<dyn ErasedInstancer>, _: &C| instancer.update(),
        )
    }

    /// Marks the start of a frame; the next stage render flushes first.
    pub fn begin_frame(&self) {
        self.flushed.store(false, Ordering::Release);
    }

    /// Flushes the draw manager.
    ///
    /// # Errors
    ///
    /// GPU buffer failures.
    pub fn flush(&self, gpu: &mut dyn GpuContext) -> RenderResult<()> {
        self.draw_manager.lock().flush(gpu)?;
        self.flushed.store(true, Ordering::Release);
        Ok(())
    }

    fn flush_once(&self, gpu: &mut dyn GpuContext) -> RenderResult<()> {
        if self.flushed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.flush(gpu)
    }

    /// Returns the origin-relative uniforms for a frame.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn frame_uniforms(&self, context: &RenderContext) -> FrameUniforms {
        let origin = self.origin.get();
        let camera: [f32; 3] =
            std::array::from_fn(|axis| (context.camera_position[axis] - f64::from(origin[axis])) as f32);
        FrameUniforms {
            view_projection: translated(&context.view_projection, camera.map(|axis| -axis)),
            camera_position: camera,
            origin,
        }
    }

    /// Draws one stage, flushing first if this is the frame's first draw.
    ///
    /// # Errors
    ///
    /// GPU buffer failures from the flush.
    pub fn render_stage(
        &self,
        gpu: &mut dyn GpuContext,
        context: &RenderContext,
        stage: RenderStage,
    ) -> RenderResult<()> {
        self.flush_once(gpu)?;
        let uniforms = self.frame_uniforms(context);
        self.draw_manager.lock().render_stage(gpu, stage, &uniforms);
        Ok(())
    }

    /// Draws the block-breaking overlay.
    ///
    /// # Errors
    ///
    /// GPU buffer failures from the flush.
    pub fn render_crumbling(
        &self,
        gpu: &mut dyn GpuContext,
        context: &RenderContext,
        blocks: &[CrumblingBlock],
    ) -> RenderResult<()> {
        self.flush_once(gpu)?;
        let uniforms = self.frame_uniforms(context);
        self.draw_manager.lock().render_crumbling(gpu, blocks, &uniforms);
        Ok(())
    }

    /// Returns the frame counters and clears the per-draw ones.
    pub fn take_stats(&self) -> FrameStats {
        self.draw_manager.lock().take_stats()
    }

    /// Returns the number of instancers the draw side tracks.
    #[must_use]
    pub fn instancer_count(&self) -> usize {
        self.draw_manager.lock().instancer_count()
    }

    /// Releases every GPU resource and forgets every instancer.
    pub fn delete(&self, gpu: &mut dyn GpuContext) {
        self.registry.reset();
        self.draw_manager.lock().delete(gpu);
        self.programs.delete(gpu);
        tracing::debug!("engine deleted");
    }
}

/// Post-multiplies a column-major matrix by a translation.
fn translated(m: &[[f32; 4]; 4], offset: [f32; 3]) -> [[f32; 4]; 4] {
    let mut out = *m;
    for row in 0..4 {
        out[3][row] = m[0][row] * offset[0] + m[1][row] * offset[1] + m[2][row] * offset[2] + m[3][row];
    }
    out
}
