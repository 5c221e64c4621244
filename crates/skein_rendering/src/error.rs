//! # Rendering Error Types
//!
//! GPU failures are fatal for the pass that hit them. Compile failures are
//! absorbed by the program cache, which keeps the previous program set.

use skein_core::SchedulerError;
use thiserror::Error;

use crate::compile::{DiagnosticReport, ProgramKey};
use crate::gpu::ShaderStage;

/// Errors raised by a GPU context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device could not provide the requested memory.
    #[error("gpu out of memory: requested {requested} bytes, limit {limit}")]
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
        /// Device limit in bytes.
        limit: u64,
    },

    /// A handle did not refer to a live object.
    #[error("invalid {kind} handle {id}")]
    InvalidHandle {
        /// Object kind.
        kind: &'static str,
        /// Raw handle value.
        id: u32,
    },

    /// A buffer could not be mapped.
    #[error("failed to map buffer {buffer}: {reason}")]
    MapFailed {
        /// Raw buffer handle.
        buffer: u32,
        /// Driver message.
        reason: String,
    },

    /// Any other backend failure.
    #[error("gpu backend error: {0}")]
    Backend(String),
}

/// Result type for GPU operations.
pub type GpuResult<T> = Result<T, GpuError>;

/// Errors raised while building shader programs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A named source component is not registered.
    #[error("missing shader source `{0}`")]
    MissingSource(String),

    /// A shader stage failed to compile.
    #[error("{stage} shader for {key} failed to compile\n{diagnostics}")]
    ShaderCompile {
        /// Program being built.
        key: ProgramKey,
        /// Failing stage.
        stage: ShaderStage,
        /// Source-located compile diagnostics.
        diagnostics: DiagnosticReport,
    },

    /// The stages compiled but failed to link.
    #[error("program {key} failed to link: {log}")]
    ProgramLink {
        /// Program being built.
        key: ProgramKey,
        /// Driver link log.
        log: String,
    },

    /// The context cannot draw instanced arrays.
    #[error("instanced rendering is not supported by this gpu context")]
    UnsupportedHardware,

    /// At least one program in a batch failed; nothing was installed.
    #[error("{} of {total} programs failed to build", .failures.len())]
    BatchFailed {
        /// Individual failures.
        failures: Vec<CompileError>,
        /// Programs in the batch.
        total: usize,
    },
}

/// Result type for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors surfaced by the engine and the visualization manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// GPU failure during flush or drawing.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A plan task failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;
