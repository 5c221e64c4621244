//! # Draw Side
//!
//! Render stages, draw-call records and the manager that turns instancers
//! into GPU draws.
//!
//! ```text
//! InstancerRegistry ─take_pending─► DrawManager ─► one DrawCall per model mesh
//!                                       │             └─ MeshPool entry (ref counted)
//!                                       ├─ upload dirty instance bytes
//!                                       └─ render_stage: group ─► program ─► draw
//! ```
//!
//! Draw calls live in a slot pool and refer to their instancer by id and to
//! their mesh by pool handle; nothing on the draw side holds a reference
//! back into an instancer.

mod manager;
mod stats;

use std::collections::BTreeMap;
use std::fmt;

use skein_core::{PoolHandle, SlotPool};

pub use manager::DrawManager;
pub use stats::FrameStats;

use crate::instance::{InstanceRef, InstanceTypeId, InstancerId};
use crate::material::Material;
use crate::mesh::MeshHandle;

/// A named phase of the frame's draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderStage {
    /// After block entities are drawn.
    AfterBlockEntities,
    /// After entities are drawn.
    AfterEntities,
    /// After particles are drawn.
    AfterParticles,
    /// After translucent terrain is drawn.
    AfterTranslucentTerrain,
}

impl RenderStage {
    /// Every stage, in draw order.
    pub const ALL: [Self; 4] = [
        Self::AfterBlockEntities,
        Self::AfterEntities,
        Self::AfterParticles,
        Self::AfterTranslucentTerrain,
    ];
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AfterBlockEntities => "after_block_entities",
            Self::AfterEntities => "after_entities",
            Self::AfterParticles => "after_particles",
            Self::AfterTranslucentTerrain => "after_translucent_terrain",
        };
        f.write_str(name)
    }
}

/// Shader environment an instancer draws in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Environment {
    /// World space, relative to the render origin.
    #[default]
    Global,
}

/// Draws that share a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    /// Instance type of the draws.
    pub instance_type: InstanceTypeId,
    /// Environment of the draws.
    pub environment: Environment,
}

/// Handle to a draw-call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawHandle(PoolHandle);

/// One mesh of one instancer's model.
#[derive(Debug, Clone)]
pub struct DrawCall {
    /// Instancer supplying the instance buffer.
    pub instancer: InstancerId,
    /// Pooled mesh drawn for every instance.
    pub mesh: MeshHandle,
    /// Material of the mesh.
    pub material: Material,
    /// Program group.
    pub group: GroupKey,
    /// Stage the draw belongs to.
    pub stage: RenderStage,
}

/// Draw-call records, addressed by [`DrawHandle`].
#[derive(Debug, Default)]
pub(crate) struct DrawCalls {
    calls: SlotPool<DrawCall>,
}

impl DrawCalls {
    pub(crate) fn insert(&mut self, call: DrawCall) -> DrawHandle {
        DrawHandle(self.calls.insert(call))
    }

    pub(crate) fn remove(&mut self, handle: DrawHandle) -> Option<DrawCall> {
        self.calls.remove(handle.0)
    }

    pub(crate) fn get(&self, handle: DrawHandle) -> Option<&DrawCall> {
        self.calls.get(handle.0)
    }

    pub(crate) fn contains(&self, handle: DrawHandle) -> bool {
        self.calls.contains(handle.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    pub(crate) fn clear(&mut self) {
        self.calls.clear();
    }
}

/// The draws of one render stage, grouped by program.
#[derive(Debug, Default)]
pub struct StageDraws {
    groups: BTreeMap<GroupKey, Vec<DrawHandle>>,
}

impl StageDraws {
    pub(crate) fn insert(&mut self, group: GroupKey, draw: DrawHandle) {
        self.groups.entry(group).or_default().push(draw);
    }

    /// Drops draws whose record is gone, and groups left empty.
    pub(crate) fn retain_live(&mut self, calls: &DrawCalls) {
        self.groups.retain(|_, draws| {
            draws.retain(|draw| calls.contains(*draw));
            !draws.is_empty()
        });
    }

    /// Iterates groups in key order.
    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, &[DrawHandle])> {
        self.groups.iter().map(|(key, draws)| (key, draws.as_slice()))
    }

    /// Returns the number of draws.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Returns true if the stage draws nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Instances to draw with the block-breaking overlay.
#[derive(Debug, Clone)]
pub struct CrumblingBlock {
    /// Damage stage, selects the overlay texture.
    pub progress: u8,
    /// Instances covering the block.
    pub instances: Vec<InstanceRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut sorted = RenderStage::ALL;
        sorted.sort();
        assert_eq!(sorted, RenderStage::ALL);
        assert_eq!(RenderStage::AfterParticles.to_string(), "after_particles");
    }
}
