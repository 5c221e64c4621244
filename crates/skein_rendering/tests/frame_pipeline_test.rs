//! # Frame Pipeline Integration Test
//!
//! Drives ticks and frames through the public API against the headless GPU
//! context.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skein_core::{SkeinConfig, TaskExecutor};
use skein_rendering::gpu::GpuCommand;
use skein_rendering::{
    BlockVertex, CompileError, Engine, FrameContext, HeadlessGpu, InstanceHandle, InstanceRef,
    InstanceType, Material, Mesh, Model, Oriented, RenderContext, RenderStage, ShaderSources,
    Shadow, Storage, TickContext, Transformed, Visual, VisualStorage, VisualizationContext,
    VisualizationManager, Visualizer,
};

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn frame(camera: [f64; 3]) -> RenderContext {
    RenderContext {
        camera_position: camera,
        view_projection: IDENTITY,
        partial_tick: 0.0,
    }
}

fn cube() -> Arc<Model> {
    Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default())
}

fn engine(gpu: &mut HeadlessGpu, config: &SkeinConfig) -> Arc<Engine> {
    let engine = Arc::new(Engine::new(config));
    let request = engine.compile_request(
        ShaderSources::builtin(),
        vec![Transformed::info(), Oriented::info(), Shadow::info()],
    );
    engine.reload_programs(gpu, &request).unwrap();
    engine
}

/// Records whether a tick and a frame ever overlapped.
#[derive(Default)]
struct Overlap {
    in_tick: AtomicBool,
    in_frame: AtomicBool,
    violations: AtomicUsize,
    ticks: AtomicUsize,
    frames: AtomicUsize,
}

struct Sentinel {
    overlap: Arc<Overlap>,
    handle: InstanceHandle<Transformed>,
}

impl Visual for Sentinel {
    fn tick(&mut self, _context: &TickContext) {
        let overlap = &self.overlap;
        overlap.in_tick.store(true, Ordering::SeqCst);
        if overlap.in_frame.load(Ordering::SeqCst) {
            overlap.violations.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(1));
        overlap.ticks.fetch_add(1, Ordering::SeqCst);
        overlap.in_tick.store(false, Ordering::SeqCst);
    }

    fn begin_frame(&mut self, _context: &FrameContext) {
        let overlap = &self.overlap;
        overlap.in_frame.store(true, Ordering::SeqCst);
        if overlap.in_tick.load(Ordering::SeqCst) {
            overlap.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.handle.update(|instance| {
            instance.translate(0.0, 1.0, 0.0);
        });
        std::thread::sleep(Duration::from_millis(1));
        overlap.frames.fetch_add(1, Ordering::SeqCst);
        overlap.in_frame.store(false, Ordering::SeqCst);
    }

    fn collect_crumbling_instances(&self, consumer: &mut dyn FnMut(InstanceRef)) {
        consumer(self.handle.instance_ref());
    }

    fn delete(&mut self) {
        self.handle.delete();
    }

    fn is_tickable(&self) -> bool {
        true
    }

    fn is_dynamic(&self) -> bool {
        true
    }
}

struct Sentinels {
    model: Arc<Model>,
    overlap: Arc<Overlap>,
}

impl Visualizer<u64> for Sentinels {
    fn create_visual(&self, context: &VisualizationContext, _object: &u64) -> Box<dyn Visual> {
        Box::new(Sentinel {
            overlap: Arc::clone(&self.overlap),
            handle: context
                .provider
                .instancer::<Transformed>(&self.model)
                .create_instance(),
        })
    }
}

fn sentinels(
    gpu: &mut HeadlessGpu,
    workers: usize,
) -> (VisualizationManager, Arc<Storage<u64>>, Arc<Overlap>) {
    let config = SkeinConfig::default();
    let engine = engine(gpu, &config);
    let overlap = Arc::new(Overlap::default());
    let storage = Storage::new(
        "sentinels",
        Arc::clone(&engine),
        RenderStage::AfterBlockEntities,
        Arc::new(Sentinels {
            model: cube(),
            overlap: Arc::clone(&overlap),
        }),
    );
    let manager = VisualizationManager::new(
        &config,
        TaskExecutor::new("pipeline-test", workers).unwrap(),
        engine,
        vec![Arc::clone(&storage) as Arc<dyn VisualStorage>],
    );
    (manager, storage, overlap)
}

/// Test: ticks and frames never overlap, with several frames per tick.
#[test]
fn test_tick_and_frame_never_overlap() {
    let mut gpu = HeadlessGpu::new();
    let (mut manager, storage, overlap) = sentinels(&mut gpu, 4);
    for object in 0..32 {
        storage.queue_add(object);
    }

    let context = frame([0.0; 3]);
    for _ in 0..10 {
        manager.tick().unwrap();
        for _ in 0..3 {
            manager.begin_frame(&context).unwrap();
            manager
                .render_stage(&mut gpu, &context, RenderStage::AfterBlockEntities)
                .unwrap();
        }
    }
    manager.delete(&mut gpu).unwrap();

    assert_eq!(overlap.violations.load(Ordering::SeqCst), 0);
    assert_eq!(overlap.ticks.load(Ordering::SeqCst), 32 * 10);
    assert_eq!(overlap.frames.load(Ordering::SeqCst), 32 * 30);
}

/// Test: one draw per stage and mesh, every instance included.
#[test]
fn test_instances_batch_into_one_draw() {
    let mut gpu = HeadlessGpu::new();
    let (mut manager, storage, _) = sentinels(&mut gpu, 2);
    for object in 0..100 {
        storage.queue_add(object);
    }

    let context = frame([0.0; 3]);
    manager.tick().unwrap();
    manager.begin_frame(&context).unwrap();
    for stage in RenderStage::ALL {
        manager.render_stage(&mut gpu, &context, stage).unwrap();
    }

    let draws = gpu.draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].instance_count, 100);
    assert_eq!(draws[0].base_instance, 0);
}

/// Test: an instancer that loses its last instance stops drawing.
#[test]
fn test_empty_instancer_leaves_draw_set() {
    let mut gpu = HeadlessGpu::new();
    let (mut manager, storage, _) = sentinels(&mut gpu, 2);
    storage.queue_add(1);
    storage.queue_add(2);

    let context = frame([0.0; 3]);
    manager.tick().unwrap();
    manager.begin_frame(&context).unwrap();
    manager
        .render_stage(&mut gpu, &context, RenderStage::AfterBlockEntities)
        .unwrap();
    assert_eq!(manager.engine().instancer_count(), 1);

    storage.queue_remove(1);
    storage.queue_remove(2);
    manager.tick().unwrap();
    manager.begin_frame(&context).unwrap();
    gpu.take_commands();
    manager
        .render_stage(&mut gpu, &context, RenderStage::AfterBlockEntities)
        .unwrap();

    assert_eq!(manager.engine().instancer_count(), 0);
    assert!(gpu.draws().is_empty());
}

/// Test: crumbling draws one instance at a time with the overlay texture.
#[test]
fn test_crumbling_overlay() {
    let mut gpu = HeadlessGpu::new();
    let (mut manager, storage, _) = sentinels(&mut gpu, 2);
    for object in 0..4 {
        storage.queue_add(object);
    }

    let context = frame([0.0; 3]);
    manager.tick().unwrap();
    manager.begin_frame(&context).unwrap();
    manager.sync_visuals().unwrap();
    let blocks = storage.crumbling_blocks(&[(1, 3), (2, 3), (99, 5)]);
    assert_eq!(blocks.len(), 2);

    manager
        .render_stage(&mut gpu, &context, RenderStage::AfterBlockEntities)
        .unwrap();
    gpu.take_commands();
    manager.render_crumbling(&mut gpu, &context, &blocks).unwrap();

    let textures: Vec<u8> = gpu
        .commands()
        .iter()
        .filter_map(|command| match command {
            GpuCommand::BindCrumblingTexture(progress) => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(textures, vec![3]);

    let draws = gpu.draws();
    assert_eq!(draws.len(), 2);
    assert!(draws.iter().all(|draw| draw.instance_count == 1));
}

/// Test: a failing reload keeps every working program.
#[test]
fn test_failed_reload_keeps_programs() {
    let mut gpu = HeadlessGpu::new();
    let config = SkeinConfig::default();
    let engine = engine(&mut gpu, &config);
    let before = engine.programs().get().unwrap();
    let live = gpu.live_programs();

    let broken = engine.compile_request(
        ShaderSources::builtin().with("instance/oriented.vert", "void main() {\n#error nope\n}\n"),
        vec![Transformed::info(), Oriented::info(), Shadow::info()],
    );
    let err = engine.reload_programs(&mut gpu, &broken).unwrap_err();
    assert!(matches!(err, CompileError::BatchFailed { ref failures, .. } if failures.len() == 2));

    let after = engine.programs().get().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(gpu.live_programs(), live);
}

/// Test: a synchronous executor runs the same pipeline inline.
#[test]
fn test_synchronous_executor() {
    let mut gpu = HeadlessGpu::new();
    let (mut manager, storage, overlap) = sentinels(&mut gpu, 0);
    storage.queue_add(7);

    let context = frame([0.0; 3]);
    manager.tick().unwrap();
    manager.begin_frame(&context).unwrap();
    manager
        .render_stage(&mut gpu, &context, RenderStage::AfterBlockEntities)
        .unwrap();

    assert!(manager.executor().is_synchronous());
    assert_eq!(overlap.ticks.load(Ordering::SeqCst), 1);
    assert_eq!(gpu.draws().len(), 1);
}
