//! # Visualization Manager
//!
//! Drives ticks and frames. Three flags order the passes:
//!
//! ```text
//! tick():        wait frameComplete ─► wait tickComplete, lower ─► tick plan ─► raise tickComplete
//! begin_frame(): wait tickComplete (no lower) ─► lower frame flags ─► frame plan
//! frame plan:    IfElse(origin moved?)
//!                  ├─ true:  recreate every visual
//!                  └─ false: MapContext(FrameContext) ─► Nested(storage frame plans)
//!                ─► raise frameVisuals ─► ForEach(instancer update) ─► raise frameComplete
//! render_stage(): wait frameComplete ─► engine (flush once, draw)
//! ```
//!
//! Several frames may run per tick; the tick flag stays raised between them.
//! GPU work only happens in the synchronous calls on the render thread.

use std::sync::Arc;

use skein_core::{
    Flag, IfElsePlan, MapContextPlan, NestedPlan, PlanExt, RaisePlan, SharedPlan, SimplePlan,
    SkeinConfig, TaskExecutor,
};

use super::{limiter_for, FrameContext, TickContext, UpdateLimiter, VisualStorage};
use crate::draw::{CrumblingBlock, FrameStats, RenderStage};
use crate::engine::{Engine, RenderContext};
use crate::error::RenderResult;
use crate::frustum::Frustum;
use crate::gpu::GpuContext;

/// Owns the flags and plans of the visualization pipeline.
pub struct VisualizationManager {
    executor: Arc<TaskExecutor>,
    engine: Arc<Engine>,
    storages: Vec<Arc<dyn VisualStorage>>,
    limiter: Arc<dyn UpdateLimiter>,
    tick_plan: SharedPlan<TickContext>,
    frame_plan: SharedPlan<RenderContext>,
    tick_flag: Arc<Flag>,
    frame_visuals_flag: Arc<Flag>,
    frame_flag: Arc<Flag>,
    ticks: u64,
}

impl std::fmt::Debug for VisualizationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizationManager")
            .field("executor", &self.executor.name())
            .field("storages", &self.storages.len())
            .field("ticks", &self.ticks)
            .field("tick_complete", &self.tick_flag.is_raised())
            .field("frame_complete", &self.frame_flag.is_raised())
            .finish()
    }
}

impl VisualizationManager {
    /// Builds the tick and frame plans over `storages`.
    #[must_use]
    pub fn new(
        config: &SkeinConfig,
        executor: Arc<TaskExecutor>,
        engine: Arc<Engine>,
        storages: Vec<Arc<dyn VisualStorage>>,
    ) -> Self {
        let limiter = limiter_for(config);
        let tick_flag = Arc::new(Flag::new("tickComplete"));
        let frame_visuals_flag = Arc::new(Flag::new("frameVisualsComplete"));
        let frame_flag = Arc::new(Flag::new("frameComplete"));

        // nothing is in flight yet
        tick_flag.raise();
        frame_visuals_flag.raise();
        frame_flag.raise();

        let tick_plan = NestedPlan::of(storages.iter().map(|s| Arc::clone(s).tick_plan()).collect())
            .then(RaisePlan::raise(Arc::clone(&tick_flag)))
            .shared();

        let frame_plan = Self::build_frame_plan(
            &engine,
            &storages,
            &limiter,
            &frame_visuals_flag,
            &frame_flag,
        );

        tracing::debug!(
            storages = storages.len(),
            workers = executor.worker_count(),
            "visualization manager created"
        );

        Self {
            executor,
            engine,
            storages,
            limiter,
            tick_plan,
            frame_plan,
            tick_flag,
            frame_visuals_flag,
            frame_flag,
            ticks: 0,
        }
    }

    fn build_frame_plan(
        engine: &Arc<Engine>,
        storages: &[Arc<dyn VisualStorage>],
        limiter: &Arc<dyn UpdateLimiter>,
        frame_visuals_flag: &Arc<Flag>,
        frame_flag: &Arc<Flag>,
    ) -> SharedPlan<RenderContext> {
        let recreate = {
            let storages = storages.to_vec();
            SimplePlan::of(move |context: &RenderContext| {
                for storage in &storages {
                    storage.recreate_all(context.partial_tick);
                }
            })
        };

        let visuals = {
            let engine = Arc::clone(engine);
            let limiter = Arc::clone(limiter);
            MapContextPlan::map(move |context: &RenderContext| {
                frame_context(&engine, &limiter, context)
            })
            .to(NestedPlan::of(
                storages.iter().map(|s| Arc::clone(s).frame_plan()).collect(),
            ))
        };

        let origin = Arc::clone(engine);
        IfElsePlan::on(move |context: &RenderContext| {
            origin.update_render_origin(context.camera_position)
        })
        .if_true(recreate)
        .if_false(visuals)
        .plan()
        .then(RaisePlan::raise(Arc::clone(frame_visuals_flag)))
        .then(engine.create_frame_plan::<RenderContext>())
        .then(RaisePlan::raise(Arc::clone(frame_flag)))
        .shared()
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Returns the executor plans run on.
    #[must_use]
    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Returns the number of ticks started.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn wait_for(&self, flag: &Flag) -> RenderResult<()> {
        if !self.executor.sync_until(|| flag.is_raised())? {
            tracing::warn!(flag = flag.name(), "executor went idle before flag was raised");
        }
        Ok(())
    }

    /// Starts a game tick once the previous frame and tick are done.
    ///
    /// # Errors
    ///
    /// A task of the previous tick or frame panicked.
    pub fn tick(&mut self) -> RenderResult<()> {
        self.wait_for(&self.frame_flag)?;
        self.wait_for(&self.tick_flag)?;
        self.tick_flag.lower();

        self.ticks += 1;
        self.tick_plan
            .execute_detached(&self.executor, TickContext { tick: self.ticks });
        Ok(())
    }

    /// Starts a frame once the current tick is done.
    ///
    /// # Errors
    ///
    /// A task of the tick or previous frame panicked.
    pub fn begin_frame(&self, context: &RenderContext) -> RenderResult<()> {
        self.wait_for(&self.tick_flag)?;
        self.wait_for(&self.frame_flag)?;
        self.frame_visuals_flag.lower();
        self.frame_flag.lower();

        self.engine.begin_frame();
        self.limiter.tick();
        self.frame_plan.execute_detached(&self.executor, *context);
        Ok(())
    }

    /// Waits until this frame's visuals are updated, so the render thread can
    /// read them (for example to collect crumbling instances).
    ///
    /// # Errors
    ///
    /// A frame task panicked.
    pub fn sync_visuals(&self) -> RenderResult<()> {
        self.wait_for(&self.frame_visuals_flag)
    }

    /// Draws one render stage once the frame plan is done.
    ///
    /// Call on the thread that owns `gpu`.
    ///
    /// # Errors
    ///
    /// A frame task panicked, or a GPU buffer failed.
    pub fn render_stage(
        &self,
        gpu: &mut dyn GpuContext,
        context: &RenderContext,
        stage: RenderStage,
    ) -> RenderResult<()> {
        self.wait_for(&self.frame_flag)?;
        self.engine.render_stage(gpu, context, stage)
    }

    /// Draws the block-breaking overlay once the frame plan is done.
    ///
    /// # Errors
    ///
    /// A frame task panicked, or a GPU buffer failed.
    pub fn render_crumbling(
        &self,
        gpu: &mut dyn GpuContext,
        context: &RenderContext,
        blocks: &[CrumblingBlock],
    ) -> RenderResult<()> {
        self.wait_for(&self.frame_flag)?;
        self.engine.render_crumbling(gpu, context, blocks)
    }

    /// Returns and resets the frame counters.
    pub fn take_stats(&self) -> FrameStats {
        self.engine.take_stats()
    }

    /// Waits for every in-flight plan, then releases visuals and GPU
    /// resources.
    ///
    /// # Errors
    ///
    /// A task panicked before the executor drained. Resources are released
    /// regardless.
    pub fn delete(&self, gpu: &mut dyn GpuContext) -> RenderResult<()> {
        let drained = self.executor.sync_point();
        for storage in &self.storages {
            storage.invalidate();
        }
        self.engine.delete(gpu);
        tracing::debug!(storages = self.storages.len(), "visualization manager deleted");
        drained.map_err(Into::into)
    }
}

fn frame_context(
    engine: &Engine,
    limiter: &Arc<dyn UpdateLimiter>,
    context: &RenderContext,
) -> FrameContext {
    let uniforms = engine.frame_uniforms(context);
    FrameContext {
        camera_position: context.camera_position,
        origin: uniforms.origin,
        frustum: Frustum::from_view_projection(&uniforms.view_projection),
        partial_tick: context.partial_tick,
        limiter: Arc::clone(limiter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::ShaderSources;
    use crate::gpu::HeadlessGpu;
    use crate::instance::{InstanceHandle, InstanceType, Oriented, Shadow, Transformed};
    use crate::material::Material;
    use crate::mesh::{BlockVertex, Mesh, Model};
    use crate::visual::{Storage, Visual, VisualizationContext, Visualizer};

    const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    struct Spinner {
        handle: InstanceHandle<Oriented>,
        frames: u16,
    }

    impl Visual for Spinner {
        fn begin_frame(&mut self, _context: &FrameContext) {
            self.frames += 1;
            let angle = f32::from(self.frames) * 0.1;
            self.handle.update(|instance| {
                instance.rotation = [0.0, angle.sin(), 0.0, angle.cos()];
            });
        }

        fn delete(&mut self) {
            self.handle.delete();
        }

        fn is_dynamic(&self) -> bool {
            true
        }
    }

    struct Spinners(Arc<Model>);

    impl Visualizer<u32> for Spinners {
        fn create_visual(&self, context: &VisualizationContext, _object: &u32) -> Box<dyn Visual> {
            Box::new(Spinner {
                handle: context.provider.instancer::<Oriented>(&self.0).create_instance(),
                frames: 0,
            })
        }
    }

    fn context(camera: [f64; 3]) -> RenderContext {
        RenderContext {
            camera_position: camera,
            view_projection: IDENTITY,
            partial_tick: 0.5,
        }
    }

    fn setup(gpu: &mut HeadlessGpu) -> (VisualizationManager, Arc<Storage<u32>>) {
        let config = SkeinConfig::default();
        let executor = TaskExecutor::new("manager-test", 2).unwrap();
        let engine = Arc::new(Engine::new(&config));
        let request = engine.compile_request(
            ShaderSources::builtin(),
            vec![Transformed::info(), Oriented::info(), Shadow::info()],
        );
        engine.reload_programs(gpu, &request).unwrap();

        let model = Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default());
        let storage = Storage::new(
            "spinners",
            Arc::clone(&engine),
            RenderStage::AfterEntities,
            Arc::new(Spinners(model)),
        );
        let manager = VisualizationManager::new(
            &config,
            executor,
            engine,
            vec![Arc::clone(&storage) as Arc<dyn VisualStorage>],
        );
        (manager, storage)
    }

    #[test]
    fn test_frame_draws_visual_instances() {
        let mut gpu = HeadlessGpu::new();
        let (mut manager, storage) = setup(&mut gpu);
        for object in 1..=3 {
            storage.queue_add(object);
        }

        manager.tick().unwrap();
        let frame = context([0.0; 3]);
        manager.begin_frame(&frame).unwrap();
        for stage in RenderStage::ALL {
            manager.render_stage(&mut gpu, &frame, stage).unwrap();
        }

        let stats = manager.take_stats();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.instances, 3);
        assert_eq!(manager.ticks(), 1);
    }

    #[test]
    fn test_origin_move_recreates_visuals() {
        let mut gpu = HeadlessGpu::new();
        let (mut manager, storage) = setup(&mut gpu);
        storage.queue_add(1);
        manager.tick().unwrap();

        let near = context([0.0; 3]);
        manager.begin_frame(&near).unwrap();
        manager.render_stage(&mut gpu, &near, RenderStage::AfterEntities).unwrap();
        let before = storage.visual_for(&1).unwrap();

        let far = context([5000.0, 0.0, 0.0]);
        manager.begin_frame(&far).unwrap();
        manager.render_stage(&mut gpu, &far, RenderStage::AfterEntities).unwrap();

        assert_eq!(manager.engine().render_origin(), [5000, 0, 0]);
        assert!(!Arc::ptr_eq(&before, &storage.visual_for(&1).unwrap()));
        assert_eq!(manager.take_stats().instances, 2);
    }

    #[test]
    fn test_delete_releases_everything() {
        let mut gpu = HeadlessGpu::new();
        let (mut manager, storage) = setup(&mut gpu);
        storage.queue_add(1);
        manager.tick().unwrap();
        let frame = context([0.0; 3]);
        manager.begin_frame(&frame).unwrap();
        manager.render_stage(&mut gpu, &frame, RenderStage::AfterEntities).unwrap();

        manager.delete(&mut gpu).unwrap();
        assert_eq!(storage.visual_count(), 0);
        assert_eq!(gpu.live_buffers(), 0);
        assert_eq!(gpu.live_programs(), 0);
    }
}
