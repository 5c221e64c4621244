//! Distance-based throttling of per-frame visual updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use skein_core::SkeinConfig;

/// Decides whether a visual updates this frame.
pub trait UpdateLimiter: Send + Sync + std::fmt::Debug {
    /// Advances to the next frame.
    fn tick(&self);

    /// Returns true if a visual `distance_squared` from the camera should
    /// update this frame.
    fn should_update(&self, distance_squared: f64) -> bool;
}

/// Updates every visual every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonLimiter;

impl UpdateLimiter for NonLimiter {
    fn tick(&self) {}

    #[inline]
    fn should_update(&self, _distance_squared: f64) -> bool {
        true
    }
}

/// Update divisors, one per 2048-block² distance band.
const DIVISOR_SEQUENCE: [u64; 12] = [1, 2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31];

/// Squared-distance width of one band.
const BAND_WIDTH: u64 = 2048;

/// Updates distant visuals every N frames, with N a prime picked by distance.
///
/// Primes keep bands from updating on the same frames.
#[derive(Debug, Default)]
pub struct BandedPrimeLimiter {
    frame: AtomicU64,
}

impl BandedPrimeLimiter {
    /// Creates a limiter at frame zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the update divisor for a squared distance.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn divisor(distance_squared: f64) -> u64 {
        let band = (distance_squared.max(0.0).ceil() as u64) / BAND_WIDTH;
        let index = usize::try_from(band).map_or(DIVISOR_SEQUENCE.len() - 1, |band| {
            band.min(DIVISOR_SEQUENCE.len() - 1)
        });
        DIVISOR_SEQUENCE[index]
    }
}

impl UpdateLimiter for BandedPrimeLimiter {
    fn tick(&self) {
        self.frame.fetch_add(1, Ordering::Relaxed);
    }

    fn should_update(&self, distance_squared: f64) -> bool {
        self.frame.load(Ordering::Relaxed) % Self::divisor(distance_squared) == 0
    }
}

/// Returns the limiter `config` asks for.
#[must_use]
pub fn limiter_for(config: &SkeinConfig) -> Arc<dyn UpdateLimiter> {
    if config.limit_updates {
        Arc::new(BandedPrimeLimiter::new())
    } else {
        Arc::new(NonLimiter)
    }
}
