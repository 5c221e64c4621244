//! # Plans
//!
//! A plan is an immutable, reusable description of work parameterized by a
//! context value. Executing a plan fans its leaves out over a
//! [`TaskExecutor`] and runs the completion continuation exactly once, after
//! every leaf has finished.
//!
//! ```text
//! IfElse(origin moved?)
//!   ├─ true:  Simple(recreate all)
//!   └─ false: MapContext(frame ctx) ─► Nested(storage plans..)
//! ─► Raise(frameVisuals) ─► ForEach(instancer updates) ─► Raise(frameComplete)
//! ```
//!
//! Plans are built once and executed many times. Mutable per-execution state
//! lives in the context or in the closures' captured shared state, never in
//! the plan.

use std::sync::Arc;

use crate::error::SchedulerResult;
use crate::sync::Flag;
use crate::task::executor::TaskExecutor;
use crate::task::synchronizer::{Completion, Synchronizer};

/// Values that can flow through a plan as its context.
pub trait PlanContext: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> PlanContext for T {}

/// A composable unit of parallel work.
pub trait Plan<C>: Send + Sync + 'static {
    /// Starts the plan. `on_completion` runs exactly once, after all of the
    /// plan's work is done, on whichever thread finishes last.
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion);
}

/// A type-erased plan.
pub type SharedPlan<C> = Arc<dyn Plan<C>>;

impl<C: 'static, P: Plan<C> + ?Sized> Plan<C> for Arc<P> {
    #[inline]
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion) {
        (**self).execute(executor, context, on_completion);
    }
}

/// Combinators available on every plan.
pub trait PlanExt<C: PlanContext>: Plan<C> + Sized {
    /// Runs `self`, then `next` with the same context.
    fn then<P: Plan<C>>(self, next: P) -> ChainPlan<C> {
        ChainPlan {
            first: Arc::new(self),
            second: Arc::new(next),
        }
    }

    /// Erases the plan's concrete type.
    fn shared(self) -> SharedPlan<C> {
        Arc::new(self)
    }

    /// Starts the plan with no continuation.
    fn execute_detached(&self, executor: &Arc<TaskExecutor>, context: C) {
        self.execute(executor, context, Box::new(|| {}));
    }

    /// Runs the plan and blocks until it completes, helping with queued work.
    ///
    /// # Errors
    ///
    /// Returns the first task panic reported by the executor.
    fn execute_and_wait(&self, executor: &Arc<TaskExecutor>, context: C) -> SchedulerResult<()> {
        let done = Arc::new(Flag::new("executeAndWait"));
        let raise = Arc::clone(&done);
        self.execute(executor, context, Box::new(move || raise.raise()));
        executor.sync_until(|| done.is_raised()).map(|_| ())
    }
}

impl<C: PlanContext, P: Plan<C>> PlanExt<C> for P {}

// =============================================================================
// Simple
// =============================================================================

type Task<C> = Arc<dyn Fn(&C) + Send + Sync>;

/// Runs a fixed list of leaf tasks in parallel.
pub struct SimplePlan<C> {
    tasks: Vec<Task<C>>,
}

impl<C: PlanContext> SimplePlan<C> {
    /// Creates a plan with no tasks.
    #[must_use]
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Creates a plan with a single task.
    #[must_use]
    pub fn of(task: impl Fn(&C) + Send + Sync + 'static) -> Self {
        Self::new().with(task)
    }

    /// Adds a task.
    #[must_use]
    pub fn with(mut self, task: impl Fn(&C) + Send + Sync + 'static) -> Self {
        self.tasks.push(Arc::new(task));
        self
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the plan has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<C: PlanContext> Default for SimplePlan<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PlanContext> Plan<C> for SimplePlan<C> {
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion) {
        if self.tasks.is_empty() {
            on_completion();
            return;
        }

        let sync = Arc::new(Synchronizer::new(self.tasks.len(), on_completion));
        for task in &self.tasks {
            let task = Arc::clone(task);
            let context = context.clone();
            let sync = Arc::clone(&sync);
            let guard = executor.guard();
            executor.execute(Box::new(move || {
                guard.run(|| task(&context));
                sync.decrement_and_eventually_run();
            }));
        }
    }
}

// =============================================================================
// Nested
// =============================================================================

/// Runs sub-plans in parallel and completes when all of them have.
pub struct NestedPlan<C> {
    parallel: Vec<SharedPlan<C>>,
}

impl<C: PlanContext> NestedPlan<C> {
    /// Creates a plan with no sub-plans.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parallel: Vec::new(),
        }
    }

    /// Creates a plan from a list of sub-plans.
    #[must_use]
    pub fn of(parallel: Vec<SharedPlan<C>>) -> Self {
        Self { parallel }
    }

    /// Adds a sub-plan.
    #[must_use]
    pub fn and<P: Plan<C>>(mut self, plan: P) -> Self {
        self.parallel.push(Arc::new(plan));
        self
    }
}

impl<C: PlanContext> Default for NestedPlan<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PlanContext> Plan<C> for NestedPlan<C> {
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion) {
        match self.parallel.as_slice() {
            [] => on_completion(),
            [only] => only.execute(executor, context, on_completion),
            plans => {
                let sync = Arc::new(Synchronizer::new(plans.len(), on_completion));
                for plan in plans {
                    let sync = Arc::clone(&sync);
                    plan.execute(
                        executor,
                        context.clone(),
                        Box::new(move || sync.decrement_and_eventually_run()),
                    );
                }
            }
        }
    }
}

// =============================================================================
// IfElse
// =============================================================================

type Predicate<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// Evaluates a predicate on the context and runs exactly one branch.
pub struct IfElsePlan<C> {
    condition: Predicate<C>,
    on_true: SharedPlan<C>,
    on_false: SharedPlan<C>,
}

/// Builder for [`IfElsePlan`]. Missing branches default to [`UnitPlan`].
pub struct IfElseBuilder<C> {
    condition: Predicate<C>,
    on_true: Option<SharedPlan<C>>,
    on_false: Option<SharedPlan<C>>,
}

impl<C: PlanContext> IfElsePlan<C> {
    /// Starts building a plan that branches on `condition`.
    #[must_use]
    pub fn on(condition: impl Fn(&C) -> bool + Send + Sync + 'static) -> IfElseBuilder<C> {
        IfElseBuilder {
            condition: Arc::new(condition),
            on_true: None,
            on_false: None,
        }
    }
}

impl<C: PlanContext> IfElseBuilder<C> {
    /// Sets the branch run when the condition holds.
    #[must_use]
    pub fn if_true<P: Plan<C>>(mut self, plan: P) -> Self {
        self.on_true = Some(Arc::new(plan));
        self
    }

    /// Sets the branch run when the condition does not hold.
    #[must_use]
    pub fn if_false<P: Plan<C>>(mut self, plan: P) -> Self {
        self.on_false = Some(Arc::new(plan));
        self
    }

    /// Finishes the plan.
    #[must_use]
    pub fn plan(self) -> IfElsePlan<C> {
        IfElsePlan {
            condition: self.condition,
            on_true: self.on_true.unwrap_or_else(|| Arc::new(UnitPlan)),
            on_false: self.on_false.unwrap_or_else(|| Arc::new(UnitPlan)),
        }
    }
}

impl<C: PlanContext> Plan<C> for IfElsePlan<C> {
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion) {
        if (self.condition)(&context) {
            self.on_true.execute(executor, context, on_completion);
        } else {
            self.on_false.execute(executor, context, on_completion);
        }
    }
}

// =============================================================================
// MapContext
// =============================================================================

/// Derives a new context and runs an inner plan with it.
pub struct MapContextPlan<C, D> {
    map: Arc<dyn Fn(&C) -> D + Send + Sync>,
    plan: SharedPlan<D>,
}

/// Builder for [`MapContextPlan`].
pub struct MapContextBuilder<C, D> {
    map: Arc<dyn Fn(&C) -> D + Send + Sync>,
}

impl<C: PlanContext, D: PlanContext> MapContextPlan<C, D> {
    /// Starts building a plan that maps its context through `map`.
    #[must_use]
    pub fn map(map: impl Fn(&C) -> D + Send + Sync + 'static) -> MapContextBuilder<C, D> {
        MapContextBuilder { map: Arc::new(map) }
    }
}

impl<C: PlanContext, D: PlanContext> MapContextBuilder<C, D> {
    /// Sets the plan run with the mapped context.
    #[must_use]
    pub fn to<P: Plan<D>>(self, plan: P) -> MapContextPlan<C, D> {
        MapContextPlan {
            map: self.map,
            plan: Arc::new(plan),
        }
    }
}

impl<C: PlanContext, D: PlanContext> Plan<C> for MapContextPlan<C, D> {
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion) {
        let mapped = (self.map)(&context);
        self.plan.execute(executor, mapped, on_completion);
    }
}

// =============================================================================
// Raise / Unit / Chain
// =============================================================================

/// Raises a flag, then completes.
pub struct RaisePlan {
    flag: Arc<Flag>,
}

impl RaisePlan {
    /// Creates a plan raising `flag`.
    #[must_use]
    pub fn raise(flag: Arc<Flag>) -> Self {
        Self { flag }
    }
}

impl<C: PlanContext> Plan<C> for RaisePlan {
    fn execute(&self, _executor: &Arc<TaskExecutor>, _context: C, on_completion: Completion) {
        self.flag.raise();
        on_completion();
    }
}

/// Completes immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitPlan;

impl<C: PlanContext> Plan<C> for UnitPlan {
    fn execute(&self, _executor: &Arc<TaskExecutor>, _context: C, on_completion: Completion) {
        on_completion();
    }
}

/// Runs two plans back to back with the same context.
pub struct ChainPlan<C> {
    first: SharedPlan<C>,
    second: SharedPlan<C>,
}

impl<C: PlanContext> Plan<C> for ChainPlan<C> {
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion) {
        let second = Arc::clone(&self.second);
        let next_executor = Arc::clone(executor);
        let next_context = context.clone();
        self.first.execute(
            executor,
            context,
            Box::new(move || second.execute(&next_executor, next_context, on_completion)),
        );
    }
}

// =============================================================================
// ForEach
// =============================================================================

type ListFn<C, T> = Arc<dyn Fn(&C) -> Vec<T> + Send + Sync>;
type ActionFn<C, T> = Arc<dyn Fn(&T, &C) + Send + Sync>;

/// Collects items from the context and runs an action on each in parallel.
///
/// Items are split into contiguous batches, a few per worker.
pub struct ForEachPlan<C, T> {
    list: ListFn<C, T>,
    action: ActionFn<C, T>,
}

/// Batches submitted per worker thread.
const BATCHES_PER_WORKER: usize = 4;

impl<C: PlanContext, T: Send + Sync + 'static> ForEachPlan<C, T> {
    /// Creates a plan running `action` on every item `list` produces.
    #[must_use]
    pub fn of(
        list: impl Fn(&C) -> Vec<T> + Send + Sync + 'static,
        action: impl Fn(&T, &C) + Send + Sync + 'static,
    ) -> Self {
        Self {
            list: Arc::new(list),
            action: Arc::new(action),
        }
    }
}

impl<C: PlanContext, T: Send + Sync + 'static> Plan<C> for ForEachPlan<C, T> {
    fn execute(&self, executor: &Arc<TaskExecutor>, context: C, on_completion: Completion) {
        let items = (self.list)(&context);
        if items.is_empty() {
            on_completion();
            return;
        }

        let batches = (executor.worker_count().max(1) * BATCHES_PER_WORKER).min(items.len());
        let batch_size = items.len().div_ceil(batches);
        let items = Arc::new(items);
        let batch_count = items.len().div_ceil(batch_size);
        let sync = Arc::new(Synchronizer::new(batch_count, on_completion));

        for batch in 0..batch_count {
            let start = batch * batch_size;
            let end = (start + batch_size).min(items.len());
            let items = Arc::clone(&items);
            let action = Arc::clone(&self.action);
            let context = context.clone();
            let sync = Arc::clone(&sync);
            let guard = executor.guard();
            executor.execute(Box::new(move || {
                for item in &items[start..end] {
                    guard.run(|| action(item, &context));
                }
                sync.decrement_and_eventually_run();
            }));
        }
    }
}
