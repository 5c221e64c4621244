//! # SKEIN Host Loop
//!
//! Fixed-rate ticks interleaved with as many frames as the host renders:
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. TICKS                                                            │
//! │    └─ one manager.tick() per elapsed tick interval (capped)         │
//! │                                                                     │
//! │ 2. BEGIN FRAME                                                      │
//! │    └─ partial tick = leftover time / tick interval                  │
//! │                                                                     │
//! │ 3. RENDER STAGES                                                    │
//! │    ├─ first stage flushes the draw manager                          │
//! │    └─ every stage in order, on the GPU thread                       │
//! │                                                                     │
//! │ 4. END FRAME                                                        │
//! │    └─ record timing and draw statistics                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::{Duration, Instant};

use skein_rendering::{
    FrameStats, GpuContext, RenderContext, RenderResult, RenderStage, VisualizationManager,
};

/// Target frame time for 60 FPS.
pub const TARGET_FRAME_TIME: Duration = Duration::from_micros(16_666);

/// Ticks run per frame at most; the rest of a long stall is dropped.
pub const MAX_TICKS_PER_FRAME: u32 = 10;

/// Configuration for the host loop.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Game ticks per second.
    pub ticks_per_second: u32,
    /// Log frames that exceed [`TARGET_FRAME_TIME`].
    pub enable_timing_logs: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 20,
            enable_timing_logs: false,
        }
    }
}

impl LoopConfig {
    /// Returns the time between ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }
}

/// Timing of one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameTiming {
    /// Frame number.
    pub frame: u64,
    /// Ticks run before the frame.
    pub ticks: u32,
    /// Total frame time in microseconds.
    pub total_us: u64,
    /// Time spent starting ticks in microseconds.
    pub tick_us: u64,
    /// Time spent rendering stages in microseconds.
    pub render_us: u64,
    /// Draw statistics of the frame.
    pub draws: FrameStats,
}

/// Drives a [`VisualizationManager`] from wall-clock or simulated time.
pub struct HostLoop {
    manager: VisualizationManager,
    config: LoopConfig,
    frame_count: u64,
    tick_accumulator: Duration,
    stats: FrameStatsAccumulator,
}

impl HostLoop {
    /// Creates a loop around `manager`.
    #[must_use]
    pub fn new(manager: VisualizationManager, config: LoopConfig) -> Self {
        Self {
            manager,
            config,
            frame_count: 0,
            tick_accumulator: Duration::ZERO,
            stats: FrameStatsAccumulator::new(),
        }
    }

    /// Runs the ticks owed for `elapsed`, then one frame.
    ///
    /// The context's `partial_tick` is overwritten.
    ///
    /// # Errors
    ///
    /// A plan task panicked, or a GPU buffer failed. The frame is abandoned.
    pub fn run_frame(
        &mut self,
        gpu: &mut dyn GpuContext,
        context: RenderContext,
        elapsed: Duration,
    ) -> RenderResult<FrameTiming> {
        let start = Instant::now();
        let interval = self.config.tick_interval();

        self.tick_accumulator += elapsed;
        let mut ticks = 0;
        while self.tick_accumulator >= interval {
            self.tick_accumulator -= interval;
            if ticks < MAX_TICKS_PER_FRAME {
                self.manager.tick()?;
                ticks += 1;
            }
        }
        let tick_us = micros(start.elapsed());

        let context = RenderContext {
            partial_tick: self.tick_accumulator.as_secs_f32() / interval.as_secs_f32(),
            ..context
        };
        let render_start = Instant::now();
        self.manager.begin_frame(&context)?;
        for stage in RenderStage::ALL {
            self.manager.render_stage(gpu, &context, stage)?;
        }

        let timing = FrameTiming {
            frame: self.frame_count,
            ticks,
            total_us: micros(start.elapsed()),
            tick_us,
            render_us: micros(render_start.elapsed()),
            draws: self.manager.take_stats(),
        };
        self.end_frame(timing);
        Ok(timing)
    }

    fn end_frame(&mut self, timing: FrameTiming) {
        self.frame_count += 1;
        self.stats.record(&timing);

        if self.config.enable_timing_logs && timing.total_us > micros(TARGET_FRAME_TIME) {
            tracing::warn!(
                frame = timing.frame,
                total_us = timing.total_us,
                draw_calls = timing.draws.draw_calls,
                "frame exceeded budget"
            );
        }
    }

    /// Returns the current frame count.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Returns the manager.
    #[must_use]
    pub fn manager(&self) -> &VisualizationManager {
        &self.manager
    }

    /// Returns the accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &FrameStatsAccumulator {
        &self.stats
    }

    /// Releases every visual and GPU resource.
    ///
    /// # Errors
    ///
    /// A task panicked before the executor drained.
    pub fn shutdown(self, gpu: &mut dyn GpuContext) -> RenderResult<()> {
        let result = self.manager.delete(gpu);
        self.manager.executor().shutdown();
        result
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Accumulator for frame statistics.
#[derive(Clone, Debug)]
pub struct FrameStatsAccumulator {
    /// Total frames recorded.
    pub frames_recorded: u64,
    /// Total ticks run.
    pub ticks: u64,
    /// Sum of total frame times.
    pub total_us_sum: u64,
    /// Sum of render times.
    pub render_us_sum: u64,
    /// Min frame time.
    pub min_frame_us: u64,
    /// Max frame time.
    pub max_frame_us: u64,
    /// Frames that exceeded budget.
    pub frames_over_budget: u64,
    /// Sum of draw calls.
    pub draw_calls: u64,
    /// Sum of instances drawn.
    pub instances: u64,
}

impl FrameStatsAccumulator {
    /// Creates a new accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames_recorded: 0,
            ticks: 0,
            total_us_sum: 0,
            render_us_sum: 0,
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            frames_over_budget: 0,
            draw_calls: 0,
            instances: 0,
        }
    }

    /// Records a frame's statistics.
    pub fn record(&mut self, timing: &FrameTiming) {
        self.frames_recorded += 1;
        self.ticks += u64::from(timing.ticks);
        self.total_us_sum += timing.total_us;
        self.render_us_sum += timing.render_us;
        self.min_frame_us = self.min_frame_us.min(timing.total_us);
        self.max_frame_us = self.max_frame_us.max(timing.total_us);
        self.draw_calls += u64::from(timing.draws.draw_calls);
        self.instances += u64::from(timing.draws.instances);

        if timing.total_us > micros(TARGET_FRAME_TIME) {
            self.frames_over_budget += 1;
        }
    }

    /// Returns average frame time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_frame_ms(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        (self.total_us_sum as f64 / self.frames_recorded as f64) / 1000.0
    }

    /// Returns average FPS.
    #[must_use]
    pub fn avg_fps(&self) -> f64 {
        let avg_ms = self.avg_frame_ms();
        if avg_ms <= 0.0 {
            return 0.0;
        }
        1000.0 / avg_ms
    }

    /// Returns average draw calls per frame.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_draw_calls(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.draw_calls as f64 / self.frames_recorded as f64
    }

    /// Returns the fraction of frames over budget.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn over_budget_ratio(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.frames_over_budget as f64 / self.frames_recorded as f64
    }

    /// Logs a summary at info level.
    #[allow(clippy::cast_precision_loss)]
    pub fn log_summary(&self) {
        tracing::info!(
            frames = self.frames_recorded,
            ticks = self.ticks,
            avg_frame_ms = self.avg_frame_ms(),
            avg_fps = self.avg_fps(),
            min_frame_ms = self.min_frame_us as f64 / 1000.0,
            max_frame_ms = self.max_frame_us as f64 / 1000.0,
            over_budget = self.frames_over_budget,
            avg_draw_calls = self.avg_draw_calls(),
            instances = self.instances,
            "frame statistics"
        );
    }
}

impl Default for FrameStatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
