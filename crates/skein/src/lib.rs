//! # SKEIN
//!
//! Instance-batching renderer core, with its scheduler.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                 SKEIN                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐     ┌──────────────────────────────────────────┐  │
//! │  │   skein_core    │     │            skein_rendering               │  │
//! │  │                 │────>│                                          │  │
//! │  │  • Flags        │     │  • Visuals and storages                  │  │
//! │  │  • Plans        │     │  • Instancers and mesh pool              │  │
//! │  │  • Executor     │     │  • Program cache and compile pipeline    │  │
//! │  │  • Slot pools   │     │  • Draw manager and render stages        │  │
//! │  └─────────────────┘     └──────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `game_loop`: fixed-rate ticks and frame timing around the visualization
//!   manager

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod game_loop;

pub use skein_core as core;
pub use skein_rendering as rendering;

pub use game_loop::{FrameStatsAccumulator, FrameTiming, HostLoop, LoopConfig};
pub use skein_core::{SkeinConfig, TaskExecutor};
pub use skein_rendering::{Engine, HeadlessGpu, RenderContext, RenderStage, VisualizationManager};
