//! # SKEIN Core
//!
//! Scheduling primitives for a renderer that overlaps game-tick and frame work
//! with GPU submission:
//! - Named [`Flag`]s that order handoffs between the main thread and workers
//! - A composable [`Plan`] family executed on a [`TaskExecutor`]
//! - Generational [`SlotPool`]s for handle-based arenas
//!
//! ## Architecture Rules
//!
//! 1. **Plans are immutable** - build once, execute every tick or frame
//! 2. **Completion runs exactly once** - after every leaf has finished
//! 3. **The waiting thread helps** - `sync_until` drains the queue while it waits
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use skein_core::{Flag, PlanExt, RaisePlan, SimplePlan, TaskExecutor};
//!
//! let executor = TaskExecutor::new("doc", 2).unwrap();
//! let done = Arc::new(Flag::new("done"));
//!
//! let plan = SimplePlan::of(|frame: &u64| assert!(*frame > 0))
//!     .then(RaisePlan::raise(Arc::clone(&done)));
//!
//! plan.execute_detached(&executor, 1);
//! assert!(executor.sync_until(|| done.is_raised()).unwrap());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;
pub mod sync;
pub mod task;

pub use config::{optimal_thread_count, SkeinConfig};
pub use error::{ConfigError, ConfigResult, SchedulerError, SchedulerResult};
pub use memory::{PoolHandle, SlotPool};
pub use sync::Flag;
pub use task::{
    ChainPlan, Completion, ForEachPlan, IfElsePlan, Job, MapContextPlan, NestedPlan, Plan,
    PlanContext, PlanExt, RaisePlan, SharedPlan, SimplePlan, Synchronizer, TaskExecutor,
    TaskGuard, UnitPlan,
};
