//! # Memory Management
//!
//! Generational slot pools backing the renderer's arenas (mesh entries,
//! draw calls). Handles stay small and `Copy`; stale handles are
//! detected instead of aliasing recycled slots.

mod pool;

pub use pool::{PoolHandle, SlotPool};
