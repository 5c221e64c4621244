//! Draw statistics.

/// Counters for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Draw calls issued.
    pub draw_calls: u32,
    /// Instances drawn, summed over draw calls.
    pub instances: u32,
    /// Draws skipped because their program is missing.
    pub skipped_draws: u32,
    /// Instancers tracked by the draw manager.
    pub live_instancers: u32,
    /// Bytes of vertex data in the mesh pool.
    pub mesh_pool_bytes: u64,
}

impl FrameStats {
    /// Returns the average instances per draw call.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn instances_per_draw(&self) -> f32 {
        if self.draw_calls > 0 {
            self.instances as f32 / self.draw_calls as f32
        } else {
            0.0
        }
    }

    /// Clears the per-draw counters, keeping the resident totals.
    pub fn reset_draws(&mut self) {
        self.draw_calls = 0;
        self.instances = 0;
        self.skipped_draws = 0;
    }
}
