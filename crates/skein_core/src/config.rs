//! # Runtime Configuration
//!
//! Settings loaded once at startup from TOML. Every key is optional.
//!
//! ```toml
//! worker_threads = -1        # -1 = auto, 0 = synchronous
//! limit_updates = true
//! max_origin_distance = 100.0
//! mesh_pool_growth = 1.6
//! dump_shader_source = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Largest worker pool chosen automatically.
const MAX_AUTO_WORKERS: usize = 10;

/// SKEIN runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeinConfig {
    /// Worker thread count: -1 picks one from the CPU count, 0 runs every task
    /// on the calling thread (default: -1)
    #[serde(default = "default_worker_threads")]
    pub worker_threads: i32,
    /// Throttle per-frame visual updates by camera distance (default: true)
    #[serde(default = "default_true")]
    pub limit_updates: bool,
    /// Camera distance from the render origin that triggers a re-origin (default: 100.0)
    #[serde(default = "default_max_origin_distance")]
    pub max_origin_distance: f64,
    /// Geometric growth factor for GPU buffers (default: 1.6)
    #[serde(default = "default_mesh_pool_growth")]
    pub mesh_pool_growth: f64,
    /// Log the full assembled shader source when a compile fails (default: false)
    #[serde(default)]
    pub dump_shader_source: bool,
}

fn default_worker_threads() -> i32 {
    -1
}
fn default_true() -> bool {
    true
}
fn default_max_origin_distance() -> f64 {
    100.0
}
fn default_mesh_pool_growth() -> f64 {
    1.6
}

impl Default for SkeinConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            limit_updates: default_true(),
            max_origin_distance: default_max_origin_distance(),
            mesh_pool_growth: default_mesh_pool_growth(),
            dump_shader_source: false,
        }
    }
}

impl SkeinConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`SkeinConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks every field's range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_threads < -1 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: format!("{} is below -1", self.worker_threads),
            });
        }
        if !(self.mesh_pool_growth > 1.0) {
            return Err(ConfigError::Invalid {
                field: "mesh_pool_growth",
                reason: format!("{} must be greater than 1.0", self.mesh_pool_growth),
            });
        }
        if !(self.max_origin_distance > 0.0) {
            return Err(ConfigError::Invalid {
                field: "max_origin_distance",
                reason: format!("{} must be positive", self.max_origin_distance),
            });
        }
        Ok(())
    }

    /// Returns the number of worker threads to start.
    #[must_use]
    pub fn resolved_worker_count(&self) -> usize {
        match usize::try_from(self.worker_threads) {
            Ok(count) => count,
            Err(_) => optimal_thread_count(),
        }
    }
}

/// Picks a worker count from the available parallelism.
///
/// Leaves room for the main and render threads on large machines and never
/// goes below one or above ten.
#[must_use]
pub fn optimal_thread_count() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    worker_count_for(cpus)
}

fn worker_count_for(cpus: usize) -> usize {
    (cpus / 3).max(cpus.saturating_sub(6)).clamp(1, MAX_AUTO_WORKERS)
}
