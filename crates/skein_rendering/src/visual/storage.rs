//! Per-category visual storage.
//!
//! Hosts queue add, remove and update transactions from any thread; the
//! queue is applied at the start of the next tick or frame plan, on a worker.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use skein_core::{ForEachPlan, PlanExt, SharedPlan, SimplePlan};

use super::{FrameContext, SharedVisual, TickContext, VisualizationContext, Visualizer};
use crate::draw::{CrumblingBlock, RenderStage};
use crate::engine::Engine;

/// A storage the manager can drive without knowing its object type.
pub trait VisualStorage: Send + Sync {
    /// Returns the storage's name, used in logs.
    fn name(&self) -> &str;

    /// Builds the plan ticking every tickable visual.
    fn tick_plan(self: Arc<Self>) -> SharedPlan<TickContext>;

    /// Builds the plan running `begin_frame` on every dynamic visual.
    fn frame_plan(self: Arc<Self>) -> SharedPlan<FrameContext>;

    /// Deletes every visual and recreates it against the current origin.
    fn recreate_all(&self, partial_tick: f32);

    /// Deletes every visual and forgets every object.
    fn invalidate(&self);

    /// Returns the number of live visuals.
    fn visual_count(&self) -> usize;
}

#[derive(Debug)]
enum Transaction<O> {
    Add(O),
    Remove(O),
    Update(O),
}

struct Visuals<O> {
    by_object: HashMap<O, SharedVisual>,
    tickable: Vec<SharedVisual>,
    dynamic: Vec<SharedVisual>,
}

impl<O: Eq + Hash> Visuals<O> {
    fn insert(&mut self, object: O, visual: SharedVisual) {
        {
            let guard = visual.lock();
            if guard.is_tickable() {
                self.tickable.push(Arc::clone(&visual));
            }
            if guard.is_dynamic() {
                self.dynamic.push(Arc::clone(&visual));
            }
        }
        self.by_object.insert(object, visual);
    }

    fn remove(&mut self, object: &O) -> Option<SharedVisual> {
        let visual = self.by_object.remove(object)?;
        self.tickable.retain(|other| !Arc::ptr_eq(other, &visual));
        self.dynamic.retain(|other| !Arc::ptr_eq(other, &visual));
        Some(visual)
    }

    fn clear(&mut self) -> Vec<(O, SharedVisual)> {
        self.tickable.clear();
        self.dynamic.clear();
        self.by_object.drain().collect()
    }
}

/// Visuals of one category of host objects, drawn in one render stage.
pub struct Storage<O> {
    name: String,
    stage: RenderStage,
    engine: Arc<Engine>,
    visualizer: Arc<dyn Visualizer<O>>,
    visuals: Mutex<Visuals<O>>,
    queue: Mutex<Vec<Transaction<O>>>,
}

impl<O> std::fmt::Debug for Storage<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("visuals", &self.visuals.lock().by_object.len())
            .field("queued", &self.queue.lock().len())
            .finish()
    }
}

impl<O> Storage<O>
where
    O: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates an empty storage whose visuals draw in `stage`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        engine: Arc<Engine>,
        stage: RenderStage,
        visualizer: Arc<dyn Visualizer<O>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            stage,
            engine,
            visualizer,
            visuals: Mutex::new(Visuals {
                by_object: HashMap::new(),
                tickable: Vec::new(),
                dynamic: Vec::new(),
            }),
            queue: Mutex::new(Vec::new()),
        })
    }

    /// Returns the render stage visuals draw in.
    #[must_use]
    pub fn stage(&self) -> RenderStage {
        self.stage
    }

    /// Queues `object` for visualization.
    pub fn queue_add(&self, object: O) {
        self.queue.lock().push(Transaction::Add(object));
    }

    /// Queues the removal of `object`'s visual.
    pub fn queue_remove(&self, object: O) {
        self.queue.lock().push(Transaction::Remove(object));
    }

    /// Queues a full refresh of `object`'s visual.
    pub fn queue_update(&self, object: O) {
        self.queue.lock().push(Transaction::Update(object));
    }

    /// Returns the number of queued transactions.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    fn context(&self) -> VisualizationContext {
        VisualizationContext {
            provider: self.engine.instancer_provider(self.stage),
            origin: self.engine.render_origin(),
        }
    }

    /// Applies every queued transaction in order.
    pub fn process_queue(&self, partial_tick: f32) {
        let transactions = std::mem::take(&mut *self.queue.lock());
        if transactions.is_empty() {
            return;
        }
        let context = self.context();
        let mut visuals = self.visuals.lock();
        for transaction in transactions {
            match transaction {
                Transaction::Add(object) => {
                    if visuals.by_object.contains_key(&object)
                        || !self.visualizer.will_accept(&object)
                    {
                        continue;
                    }
                    let visual = self.visualizer.create_visual(&context, &object);
                    visuals.insert(object, Arc::new(Mutex::new(visual)));
                }
                Transaction::Remove(object) => {
                    if let Some(visual) = visuals.remove(&object) {
                        visual.lock().delete();
                    }
                }
                Transaction::Update(object) => {
                    if let Some(visual) = visuals.by_object.get(&object) {
                        visual.lock().update(partial_tick);
                    }
                }
            }
        }
    }

    /// Returns the visual of `object`.
    #[must_use]
    pub fn visual_for(&self, object: &O) -> Option<SharedVisual> {
        self.visuals.lock().by_object.get(object).map(Arc::clone)
    }

    /// Collects the overlay instances of objects being broken.
    ///
    /// Objects without a visual are skipped.
    #[must_use]
    pub fn crumbling_blocks(&self, breaking: &[(O, u8)]) -> Vec<CrumblingBlock> {
        breaking
            .iter()
            .filter_map(|(object, progress)| {
                let visual = self.visual_for(object)?;
                let mut instances = Vec::new();
                visual
                    .lock()
                    .collect_crumbling_instances(&mut |instance| instances.push(instance));
                (!instances.is_empty()).then_some(CrumblingBlock {
                    progress: *progress,
                    instances,
                })
            })
            .collect()
    }

    fn tickable(&self) -> Vec<SharedVisual> {
        self.visuals.lock().tickable.clone()
    }

    fn dynamic(&self) -> Vec<SharedVisual> {
        self.visuals.lock().dynamic.clone()
    }
}

impl<O> VisualStorage for Storage<O>
where
    O: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn tick_plan(self: Arc<Self>) -> SharedPlan<TickContext> {
        let queue = Arc::clone(&self);
        let storage = self;
        SimplePlan::of(move |_: &TickContext| queue.process_queue(1.0))
            .then(ForEachPlan::of(
                move |_: &TickContext| storage.tickable(),
                |visual: &SharedVisual, context: &TickContext| visual.lock().tick(context),
            ))
            .shared()
    }

    fn frame_plan(self: Arc<Self>) -> SharedPlan<FrameContext> {
        let queue = Arc::clone(&self);
        let storage = self;
        SimplePlan::of(move |context: &FrameContext| queue.process_queue(context.partial_tick))
            .then(ForEachPlan::of(
                move |_: &FrameContext| storage.dynamic(),
                |visual: &SharedVisual, context: &FrameContext| {
                    visual.lock().begin_frame(context);
                },
            ))
            .shared()
    }

    fn recreate_all(&self, partial_tick: f32) {
        let context = self.context();
        let mut visuals = self.visuals.lock();
        let old = visuals.clear();
        let count = old.len();
        for (object, visual) in old {
            visual.lock().delete();
            let mut fresh = self.visualizer.create_visual(&context, &object);
            fresh.update(partial_tick);
            visuals.insert(object, Arc::new(Mutex::new(fresh)));
        }
        tracing::debug!(storage = %self.name, count, "visuals recreated");
    }

    fn invalidate(&self) {
        self.queue.lock().clear();
        for (_, visual) in self.visuals.lock().clear() {
            visual.lock().delete();
        }
    }

    fn visual_count(&self) -> usize {
        self.visuals.lock().by_object.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceHandle, InstanceRef, Transformed};
    use crate::material::Material;
    use crate::mesh::{BlockVertex, Mesh, Model};
    use crate::visual::Visual;
    use skein_core::{SkeinConfig, TaskExecutor};

    struct Cube {
        handle: InstanceHandle<Transformed>,
        ticks: Arc<Mutex<u32>>,
    }

    impl Visual for Cube {
        fn tick(&mut self, _context: &TickContext) {
            *self.ticks.lock() += 1;
        }

        fn update(&mut self, _partial_tick: f32) {
            self.handle.update(|instance| {
                instance.set_light(15);
            });
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
    }

    struct Cubes {
        model: Arc<Model>,
        ticks: Arc<Mutex<u32>>,
    }

    impl Visualizer<u32> for Cubes {
        fn create_visual(&self, context: &VisualizationContext, _object: &u32) -> Box<dyn Visual> {
            let handle = context
                .provider
                .instancer::<Transformed>(&self.model)
                .create_instance();
            Box::new(Cube {
                handle,
                ticks: Arc::clone(&self.ticks),
            })
        }

        fn will_accept(&self, object: &u32) -> bool {
            *object != 0
        }
    }

    fn storage() -> (Arc<Storage<u32>>, Arc<Engine>, Arc<Mutex<u32>>) {
        let engine = Arc::new(Engine::new(&SkeinConfig::default()));
        let ticks = Arc::new(Mutex::new(0));
        let visualizer = Cubes {
            model: Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default()),
            ticks: Arc::clone(&ticks),
        };
        let storage = Storage::new(
            "cubes",
            Arc::clone(&engine),
            RenderStage::AfterBlockEntities,
            Arc::new(visualizer),
        );
        (storage, engine, ticks)
    }

    #[test]
    fn test_queue_applies_in_order() {
        let (storage, _engine, _) = storage();
        storage.queue_add(1);
        storage.queue_add(2);
        storage.queue_add(0);
        storage.queue_remove(2);
        storage.queue_add(1);
        assert_eq!(storage.queued(), 5);

        storage.process_queue(0.0);
        assert_eq!(storage.queued(), 0);
        assert_eq!(storage.visual_count(), 1);
        assert!(storage.visual_for(&1).is_some());
        assert!(storage.visual_for(&2).is_none());
    }

    #[test]
    fn test_tick_plan_ticks_tickable_visuals() {
        let (storage, _engine, ticks) = storage();
        storage.queue_add(1);
        storage.queue_add(2);

        let executor = TaskExecutor::new("storage-test", 2).unwrap();
        let plan = Arc::clone(&storage).tick_plan();
        plan.execute_and_wait(&executor, TickContext { tick: 1 }).unwrap();
        plan.execute_and_wait(&executor, TickContext { tick: 2 }).unwrap();

        assert_eq!(*ticks.lock(), 4);
    }

    #[test]
    fn test_recreate_replaces_instances() {
        let (storage, engine, _) = storage();
        storage.queue_add(7);
        storage.process_queue(0.0);
        let before = storage.visual_for(&7).unwrap();

        assert!(engine.update_render_origin([1000.0, 0.0, 0.0]));
        storage.recreate_all(0.0);

        let after = storage.visual_for(&7).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(storage.visual_count(), 1);
    }

    #[test]
    fn test_crumbling_blocks_skip_unknown_objects() {
        let (storage, _engine, _) = storage();
        storage.queue_add(3);
        storage.process_queue(0.0);

        let blocks = storage.crumbling_blocks(&[(3, 4), (9, 1)]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].progress, 4);
        assert_eq!(blocks[0].instances.len(), 1);
    }

    #[test]
    fn test_invalidate_deletes_instances() {
        let (storage, engine, _) = storage();
        storage.queue_add(5);
        storage.process_queue(0.0);
        storage.queue_add(6);

        storage.invalidate();
        assert_eq!(storage.visual_count(), 0);
        assert_eq!(storage.queued(), 0);
        assert_eq!(engine.registry().update_and_remove_empty().len(), 1);
    }
}
