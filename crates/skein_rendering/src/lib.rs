//! # SKEIN Rendering
//!
//! Instance-batching renderer. Host objects get visuals, visuals own
//! instances, instances of one model and type share an instancer, and every
//! instancer mesh becomes exactly one instanced draw call.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  VISUALIZATION MANAGER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tick plan ──► Visual::tick           (workers)              │
//! │  frame plan ─► Visual::begin_frame    (workers)              │
//! │             └► instancer update        (workers)              │
//! │       ↓ frameComplete                                        │
//! │  render_stage ─► DrawManager flush ─► grouped draws (GPU)    │
//! │                      ↑                                       │
//! │  MeshPool · ProgramCache · GrowableBuffer                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Only code holding the `&mut dyn GpuContext` touches the GPU, and plans
//!   never get one
//! - A failed shader batch never replaces a working program set
//! - One draw call per (instancer, mesh) pair, never per instance

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod compile;
pub mod draw;
pub mod engine;
pub mod error;
pub mod frustum;
pub mod gpu;
pub mod instance;
pub mod material;
pub mod mesh;
pub mod visual;

pub use compile::{
    CompileRequest, ContextShader, DiagnosticReport, PipelineCompiler, ProgramCache, ProgramKey,
    ShaderSources,
};
pub use draw::{CrumblingBlock, DrawManager, FrameStats, RenderStage};
pub use engine::{Engine, RenderContext, RenderOrigin};
pub use error::{CompileError, CompileResult, GpuError, GpuResult, RenderError, RenderResult};
pub use frustum::{Aabb, Frustum, Plane};
pub use gpu::{FrameUniforms, GpuContext, HeadlessGpu};
pub use instance::{
    InstanceHandle, InstanceRef, InstanceType, Instancer, InstancerProvider, InstancerRegistry,
    Oriented, OrientedInstance, Shadow, ShadowInstance, Transformed, TransformedInstance,
};
pub use material::Material;
pub use mesh::{BlockVertex, Mesh, MeshPool, Model, ModelMesh};
pub use visual::{
    BandedPrimeLimiter, FrameContext, NonLimiter, Storage, TickContext, UpdateLimiter, Visual,
    VisualStorage, VisualizationContext, VisualizationManager, Visualizer,
};
