//! # Synchronization Primitives
//!
//! ## The Problem
//!
//! ```text
//! Main thread:     tick() ............ beginFrame() ......... renderStage()
//! Worker threads:        [tick plan]                [frame plan]
//!
//! Without ordering: a frame plan mutates instances a tick plan is still using
//! ```
//!
//! ## The Solution: Flags
//!
//! Each plan ends by raising a flag. The main thread lowers it before starting
//! the next run and waits for it (while helping with queued work) before it
//! touches anything the plan produced.

mod flag;

pub use flag::Flag;
