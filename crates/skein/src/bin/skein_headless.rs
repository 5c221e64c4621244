//! # SKEIN Headless Driver
//!
//! Runs the full tick/frame pipeline against the recording GPU context and
//! logs frame statistics. No window, no driver.
//!
//! ```bash
//! # 600 frames with the default configuration
//! RUST_LOG=info ./skein_headless
//!
//! # custom configuration and frame count
//! RUST_LOG=skein_rendering=debug ./skein_headless skein.toml 1200
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use skein::game_loop::{HostLoop, LoopConfig};
use skein::rendering::instance::FULL_BRIGHT;
use skein::rendering::{
    BlockVertex, FrameContext, InstanceHandle, InstanceRef, InstanceType, Material, Mesh, Model,
    Oriented, Shadow, Storage, TickContext, Transformed, Visual, VisualStorage,
    VisualizationContext, Visualizer,
};
use skein::{Engine, HeadlessGpu, RenderContext, RenderStage, SkeinConfig, TaskExecutor};
use tracing_subscriber::EnvFilter;

/// Frames run when no count is given.
const DEFAULT_FRAMES: u64 = 600;

/// Simulated time per frame.
const FRAME_TIME: Duration = Duration::from_micros(16_666);

/// Camera speed along +x, in blocks per frame.
const CAMERA_SPEED: f64 = 0.75;

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

// =============================================================================
// Demo content
// =============================================================================

fn cube_mesh() -> Mesh {
    let corner = |x: f32, y: f32, z: f32, u: f32, v: f32| BlockVertex {
        position: [x, y, z],
        color: [0xFF; 4],
        uv: [u, v],
        light: [0, 0],
        normal: [0; 4],
    };
    let mut vertices = Vec::with_capacity(24);
    for axis in 0..3 {
        for side in [0.0, 1.0] {
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let mut position = [0.0; 3];
                position[axis] = side;
                position[(axis + 1) % 3] = u;
                position[(axis + 2) % 3] = v;
                vertices.push(corner(position[0], position[1], position[2], u, v));
            }
        }
    }
    Mesh::quads(&vertices)
}

/// Block position of a pillar on a 32x32 grid.
fn pillar_position(id: u32) -> [f64; 3] {
    [f64::from(id % 32) * 4.0, 64.0, f64::from(id / 32) * 4.0]
}

/// A bobbing pillar with a shadow.
struct Pillar {
    origin_relative: [f32; 3],
    body: InstanceHandle<Transformed>,
    shadow: InstanceHandle<Shadow>,
}

impl Visual for Pillar {
    fn tick(&mut self, context: &TickContext) {
        #[allow(clippy::cast_precision_loss)]
        let bob = ((context.tick % 40) as f32 / 40.0 * std::f32::consts::TAU).sin() * 0.25;
        let [x, y, z] = self.origin_relative;
        self.body.update(|instance| {
            instance.set_identity().translate(x, y + bob, z);
        });
    }

    fn update(&mut self, _partial_tick: f32) {
        self.body.update(|instance| {
            instance.set_light(FULL_BRIGHT);
        });
    }

    fn collect_crumbling_instances(&self, consumer: &mut dyn FnMut(InstanceRef)) {
        consumer(self.body.instance_ref());
    }

    fn delete(&mut self) {
        self.body.delete();
        self.shadow.delete();
    }

    fn is_tickable(&self) -> bool {
        true
    }
}

struct Pillars {
    model: Arc<Model>,
}

impl Visualizer<u32> for Pillars {
    fn create_visual(&self, context: &VisualizationContext, object: &u32) -> Box<dyn Visual> {
        let origin_relative = context.relative(pillar_position(*object));
        let [x, y, z] = origin_relative;

        let body = context.provider.instancer::<Transformed>(&self.model).create_instance();
        body.update(|instance| {
            instance.translate(x, y, z);
        });
        let shadow = context.provider.instancer::<Shadow>(&self.model).create_instance();
        shadow.update(|instance| {
            instance.position = [x, y, z];
            instance.radius = 0.6;
            instance.alpha = 0.5;
        });

        Box::new(Pillar {
            origin_relative,
            body,
            shadow,
        })
    }
}

/// A drone circling its anchor, updated every frame it is allowed to.
struct Drone {
    anchor: [f64; 3],
    origin_relative: [f32; 3],
    handle: InstanceHandle<Oriented>,
    angle: f32,
}

impl Visual for Drone {
    fn begin_frame(&mut self, context: &FrameContext) {
        if !context.should_update(self.anchor) || !context.is_visible(self.anchor, 2.0) {
            return;
        }
        self.angle += 0.05;
        let angle = self.angle;
        let (sin, cos) = (angle * 0.5).sin_cos();
        let [x, y, z] = self.origin_relative;
        self.handle.update(|instance| {
            instance.position = [x + angle.cos() * 2.0, y, z + angle.sin() * 2.0];
            instance.rotation = [0.0, sin, 0.0, cos];
        });
    }

    fn delete(&mut self) {
        self.handle.delete();
    }

    fn is_dynamic(&self) -> bool {
        true
    }
}

struct Drones {
    model: Arc<Model>,
}

impl Visualizer<u32> for Drones {
    fn create_visual(&self, context: &VisualizationContext, object: &u32) -> Box<dyn Visual> {
        let anchor = [f64::from(*object) * 6.0, 72.0, 16.0];
        Box::new(Drone {
            anchor,
            origin_relative: context.relative(anchor),
            handle: context.provider.instancer::<Oriented>(&self.model).create_instance(),
            angle: 0.0,
        })
    }

    fn will_accept(&self, object: &u32) -> bool {
        *object < 512
    }
}

// =============================================================================
// Driver
// =============================================================================

#[allow(clippy::cast_precision_loss)]
fn run(config_path: Option<&str>, frames: u64) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => SkeinConfig::load(path)?,
        None => SkeinConfig::default(),
    };
    tracing::info!(?config, "configuration loaded");

    let mut gpu = HeadlessGpu::new();
    let executor = TaskExecutor::from_config(&config)?;
    let engine = Arc::new(Engine::new(&config));

    let request = engine.compile_request(
        skein::rendering::ShaderSources::builtin(),
        vec![Transformed::info(), Oriented::info(), Shadow::info()],
    );
    engine.reload_programs(&mut gpu, &request)?;

    let model = Model::single(cube_mesh(), Material::default());
    let pillars = Storage::new(
        "block_entities",
        Arc::clone(&engine),
        RenderStage::AfterBlockEntities,
        Arc::new(Pillars {
            model: Arc::clone(&model),
        }),
    );
    let drones = Storage::new(
        "entities",
        Arc::clone(&engine),
        RenderStage::AfterEntities,
        Arc::new(Drones { model }),
    );
    for id in 0..1024 {
        pillars.queue_add(id);
    }
    for id in 0..600 {
        drones.queue_add(id);
    }

    let manager = skein::VisualizationManager::new(
        &config,
        executor,
        engine,
        vec![
            Arc::clone(&pillars) as Arc<dyn VisualStorage>,
            Arc::clone(&drones) as Arc<dyn VisualStorage>,
        ],
    );
    let mut host = HostLoop::new(
        manager,
        LoopConfig {
            enable_timing_logs: true,
            ..LoopConfig::default()
        },
    );

    for frame in 0..frames {
        let context = RenderContext {
            camera_position: [frame as f64 * CAMERA_SPEED, 70.0, 0.0],
            view_projection: IDENTITY,
            partial_tick: 0.0,
        };
        let timing = host.run_frame(&mut gpu, context, FRAME_TIME)?;

        // break the first pillar over ten stages
        let progress = u8::try_from((frame / 6) % 10).unwrap_or(0);
        let blocks = pillars.crumbling_blocks(&[(0_u32, progress)]);
        host.manager().render_crumbling(&mut gpu, &context, &blocks)?;
        gpu.take_commands();

        if frame % 120 == 0 {
            tracing::info!(
                frame,
                ticks = timing.ticks,
                draw_calls = timing.draws.draw_calls,
                instances = timing.draws.instances,
                instancers = timing.draws.live_instancers,
                mesh_pool_bytes = timing.draws.mesh_pool_bytes,
                origin = ?host.manager().engine().render_origin(),
                "frame"
            );
        }
    }

    host.stats().log_summary();
    host.shutdown(&mut gpu)?;
    tracing::info!(
        live_buffers = gpu.live_buffers(),
        live_programs = gpu.live_programs(),
        "shutdown complete"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(String::as_str);
    let frames = match args.get(2).map(|arg| arg.parse::<u64>()) {
        None => DEFAULT_FRAMES,
        Some(Ok(frames)) => frames,
        Some(Err(err)) => {
            tracing::error!(%err, "frame count must be a number");
            return ExitCode::FAILURE;
        }
    };

    match run(config_path, frames) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "headless run failed");
            ExitCode::FAILURE
        }
    }
}
