//! Instancer lookup and lifetime tracking.
//!
//! Instancers are created lazily from any thread. The draw side picks up new
//! ones at its next flush, where their meshes are pooled and draw calls made.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::instancer::InstancerInner;
use super::{ErasedInstancer, InstanceType, Instancer, InstancerId, InstancerKey};
use crate::draw::{Environment, RenderStage};
use crate::mesh::Model;

/// An instancer created since the last flush.
#[derive(Debug, Clone)]
pub struct PendingInstancer {
    /// The instancer.
    pub instancer: Arc<dyn ErasedInstancer>,
    /// Model its draws are built from.
    pub model: Arc<Model>,
}

struct Entry {
    erased: Arc<dyn ErasedInstancer>,
    typed: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct RegistryState {
    by_key: HashMap<InstancerKey, Entry>,
    pending: Vec<PendingInstancer>,
}

/// Every live instancer, by key.
#[derive(Default)]
pub struct InstancerRegistry {
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for InstancerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InstancerRegistry")
            .field("instancers", &state.by_key.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl InstancerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instancer for a key, creating it on first request.
    #[must_use]
    pub fn instancer<T: InstanceType>(
        &self,
        model: &Arc<Model>,
        stage: RenderStage,
        environment: Environment,
    ) -> Instancer<T> {
        let key = InstancerKey {
            instance_type: T::id(),
            model: model.id(),
            stage,
            environment,
        };

        let mut state = self.state.lock();
        if let Some(entry) = state.by_key.get(&key) {
            if let Ok(inner) = Arc::clone(&entry.typed).downcast::<InstancerInner<T>>() {
                return Instancer::from_inner(inner);
            }
        }

        let inner = Arc::new(InstancerInner::<T>::new(key));
        let erased: Arc<dyn ErasedInstancer> = Arc::clone(&inner) as Arc<dyn ErasedInstancer>;
        state.pending.push(PendingInstancer {
            instancer: Arc::clone(&erased),
            model: Arc::clone(model),
        });
        state.by_key.insert(
            key,
            Entry {
                erased,
                typed: Arc::clone(&inner) as Arc<dyn Any + Send + Sync>,
            },
        );

        tracing::trace!(instance_type = T::NAME, ?stage, "instancer created");
        Instancer::from_inner(inner)
    }

    /// Takes the instancers created since the last call.
    pub fn take_pending(&self) -> Vec<PendingInstancer> {
        std::mem::take(&mut self.state.lock().pending)
    }

    /// Returns every live instancer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn ErasedInstancer>> {
        self.state
            .lock()
            .by_key
            .values()
            .map(|entry| Arc::clone(&entry.erased))
            .collect()
    }

    /// Updates every instancer and forgets the ones left without instances.
    ///
    /// # Returns
    ///
    /// Ids of the removed instancers.
    pub fn update_and_remove_empty(&self) -> Vec<InstancerId> {
        let mut removed = Vec::new();
        self.state.lock().by_key.retain(|_, entry| {
            entry.erased.update();
            if entry.erased.instance_count() == 0 {
                removed.push(entry.erased.id());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Deletes every instance of every instancer.
    pub fn clear_all(&self) {
        for entry in self.state.lock().by_key.values() {
            entry.erased.clear();
        }
    }

    /// Forgets every instancer.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for entry in state.by_key.values() {
            entry.erased.clear();
        }
        state.by_key.clear();
        state.pending.clear();
    }

    /// Returns the number of live instancers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// Returns true if no instancer exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates instancers for one render stage.
#[derive(Debug, Clone)]
pub struct InstancerProvider {
    registry: Arc<InstancerRegistry>,
    stage: RenderStage,
}

impl InstancerProvider {
    /// Creates a provider over `registry` for `stage`.
    #[must_use]
    pub fn new(registry: Arc<InstancerRegistry>, stage: RenderStage) -> Self {
        Self { registry, stage }
    }

    /// Returns the stage instancers are created in.
    #[must_use]
    pub const fn stage(&self) -> RenderStage {
        self.stage
    }

    /// Returns the instancer of type `T` for `model`.
    #[must_use]
    pub fn instancer<T: InstanceType>(&self, model: &Arc<Model>) -> Instancer<T> {
        self.registry
            .instancer::<T>(model, self.stage, Environment::Global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Oriented, Transformed};
    use crate::material::Material;
    use crate::mesh::{BlockVertex, Mesh};

    fn model() -> Arc<Model> {
        Model::single(Mesh::quads(&[BlockVertex::default(); 4]), Material::default())
    }

    #[test]
    fn test_same_key_returns_same_instancer() {
        let registry = Arc::new(InstancerRegistry::new());
        let provider = InstancerProvider::new(Arc::clone(&registry), RenderStage::AfterEntities);
        let model = model();

        let a = provider.instancer::<Transformed>(&model);
        let b = provider.instancer::<Transformed>(&model);
        let c = provider.instancer::<Oriented>(&model);

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.take_pending().len(), 2);
        assert!(registry.take_pending().is_empty());
    }

    #[test]
    fn test_empty_instancers_are_removed() {
        let registry = Arc::new(InstancerRegistry::new());
        let provider = InstancerProvider::new(Arc::clone(&registry), RenderStage::AfterEntities);
        let model = model();

        let kept = provider.instancer::<Transformed>(&model);
        let _handle = kept.create_instance();
        let empty = provider.instancer::<Oriented>(&model);

        let removed = registry.update_and_remove_empty();
        assert_eq!(removed, vec![empty.id()]);
        assert_eq!(registry.len(), 1);

        // A removed key is created afresh.
        let again = provider.instancer::<Oriented>(&model);
        assert_ne!(again.id(), empty.id());
    }

    #[test]
    fn test_clear_all_empties_instancers() {
        let registry = Arc::new(InstancerRegistry::new());
        let provider = InstancerProvider::new(Arc::clone(&registry), RenderStage::AfterBlockEntities);
        let instancer = provider.instancer::<Transformed>(&model());
        let handle = instancer.create_instance();

        registry.clear_all();
        assert!(handle.is_deleted());
        assert_eq!(registry.update_and_remove_empty().len(), 1);
        assert!(registry.is_empty());
    }
}
