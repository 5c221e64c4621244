//! # Tasks
//!
//! The executor, the plan family built on top of it, and the countdown
//! barrier plans use to join their parallel leaves.

mod executor;
mod plan;
mod synchronizer;

pub use executor::{Job, TaskExecutor, TaskGuard};
pub use plan::{
    ChainPlan, ForEachPlan, IfElseBuilder, IfElsePlan, MapContextBuilder, MapContextPlan,
    NestedPlan, Plan, PlanContext, PlanExt, RaisePlan, SharedPlan, SimplePlan, UnitPlan,
};
pub use synchronizer::{Completion, Synchronizer};
