//! # Visuals
//!
//! Host-supplied per-object rendering logic and the machinery that drives it.
//!
//! ```text
//! Visualizer ─create_visual─► Visual ─► instances via InstancerProvider
//!                                 │
//! Storage (per category) ─────────┼─ tick plan:  Visual::tick
//!                                 └─ frame plan: Visual::begin_frame
//! VisualizationManager: flags + plans + executor
//! ```

mod limiter;
mod manager;
mod storage;

use std::sync::Arc;

use parking_lot::Mutex;

pub use limiter::{limiter_for, BandedPrimeLimiter, NonLimiter, UpdateLimiter};
pub use manager::VisualizationManager;
pub use storage::{Storage, VisualStorage};

use crate::frustum::Frustum;
use crate::instance::{InstanceRef, InstancerProvider};

/// Context of one game tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickContext {
    /// Ticks run since the manager was created.
    pub tick: u64,
}

/// Context of one frame, as visuals see it.
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// Camera position in world space.
    pub camera_position: [f64; 3],
    /// Render origin of the frame.
    pub origin: [i32; 3],
    /// Origin-relative view frustum.
    pub frustum: Frustum,
    /// Fraction of the current tick elapsed.
    pub partial_tick: f32,
    /// Throttle for distant visuals.
    pub limiter: Arc<dyn UpdateLimiter>,
}

impl FrameContext {
    /// Returns the squared distance from the camera to a world position.
    #[must_use]
    pub fn distance_squared(&self, position: [f64; 3]) -> f64 {
        (0..3)
            .map(|axis| {
                let delta = position[axis] - self.camera_position[axis];
                delta * delta
            })
            .sum()
    }

    /// Returns true if a visual at `position` should update this frame.
    #[must_use]
    pub fn should_update(&self, position: [f64; 3]) -> bool {
        self.limiter.should_update(self.distance_squared(position))
    }

    /// Tests a world-space sphere against the frustum.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_visible(&self, center: [f64; 3], radius: f32) -> bool {
        let relative =
            std::array::from_fn(|axis| (center[axis] - f64::from(self.origin[axis])) as f32);
        self.frustum.test_sphere(relative, radius)
    }
}

/// What a visual needs to create its instances.
#[derive(Debug, Clone)]
pub struct VisualizationContext {
    /// Instancers for the storage's stage.
    pub provider: InstancerProvider,
    /// Render origin instance positions are relative to.
    pub origin: [i32; 3],
}

impl VisualizationContext {
    /// Converts a world position to origin-relative coordinates.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn relative(&self, position: [f64; 3]) -> [f32; 3] {
        std::array::from_fn(|axis| (position[axis] - f64::from(self.origin[axis])) as f32)
    }
}

/// Rendering state of one host object.
///
/// Visuals own instance handles. Dropping or deleting them removes the
/// instances at the next instancer update.
pub trait Visual: Send {
    /// The object changed; refresh everything.
    fn update(&mut self, _partial_tick: f32) {}

    /// Runs once per tick if [`Visual::is_tickable`].
    fn tick(&mut self, _context: &TickContext) {}

    /// Runs once per frame if [`Visual::is_dynamic`].
    fn begin_frame(&mut self, _context: &FrameContext) {}

    /// Reports the instances to draw with the block-breaking overlay.
    fn collect_crumbling_instances(&self, _consumer: &mut dyn FnMut(InstanceRef)) {}

    /// Deletes every instance.
    fn delete(&mut self);

    /// Returns true if the visual wants [`Visual::tick`].
    fn is_tickable(&self) -> bool {
        false
    }

    /// Returns true if the visual wants [`Visual::begin_frame`].
    fn is_dynamic(&self) -> bool {
        false
    }
}

/// A visual shared between the storage and the plans updating it.
pub type SharedVisual = Arc<Mutex<Box<dyn Visual>>>;

/// Creates visuals for host objects of type `O`.
pub trait Visualizer<O>: Send + Sync {
    /// Creates the visual for `object`.
    fn create_visual(&self, context: &VisualizationContext, object: &O) -> Box<dyn Visual>;

    /// Returns false to leave `object` unvisualized.
    fn will_accept(&self, _object: &O) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::RenderStage;
    use crate::instance::InstancerRegistry;

    const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    #[test]
    fn test_frame_context_visibility_is_origin_relative() {
        let frame = FrameContext {
            camera_position: [1000.0, 0.0, 0.0],
            origin: [1000, 0, 0],
            frustum: Frustum::from_view_projection(&IDENTITY),
            partial_tick: 0.0,
            limiter: Arc::new(NonLimiter),
        };
        assert!(frame.is_visible([1000.5, 0.0, 0.0], 0.1));
        assert!(!frame.is_visible([0.0, 0.0, 0.0], 0.1));
        assert!((frame.distance_squared([1003.0, 4.0, 0.0]) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_relative_positions() {
        let context = VisualizationContext {
            provider: InstancerProvider::new(
                Arc::new(InstancerRegistry::new()),
                RenderStage::AfterEntities,
            ),
            origin: [16, 0, -16],
        };
        assert_eq!(context.relative([17.5, 64.0, -16.0]), [1.5, 64.0, 0.0]);
    }
}
