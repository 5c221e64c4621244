//! # Shader Compile Pipeline
//!
//! Builds one linked program per (instance type, context shader) pair.
//!
//! ```text
//! ShaderSources ──► assemble vertex/fragment per key ──► compile (cached by text)
//!                                                    └─► link ──► ProgramSet
//! ProgramCache::reload ── all keys linked? ──yes──► swap in new set, retire old
//!                                          └─no───► keep old set, log report
//! ```

mod cache;
mod compiler;
mod diagnostics;
mod source;

use std::fmt;

pub use cache::{ProgramCache, ProgramSet};
pub use compiler::PipelineCompiler;
pub use diagnostics::{Diagnostic, DiagnosticReport};
pub use source::{generate_instance_component, AssembledSource, ComponentSpan, ShaderSources};

use crate::instance::{InstanceTypeId, InstanceTypeInfo};

/// Uniform holding the packed material `uvec4`.
pub const PACKED_MATERIAL_UNIFORM: &str = "_skein_packedMaterial";

/// Uniform holding the first instance index for single-instance draws.
pub const BASE_INSTANCE_UNIFORM: &str = "_skein_baseInstance";

/// Shader variant selected by the draw path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextShader {
    /// Normal instanced drawing.
    Default,
    /// Block-breaking overlay drawing.
    Crumbling,
}

impl ContextShader {
    /// Every variant, in compile order.
    pub const ALL: [Self; 2] = [Self::Default, Self::Crumbling];

    /// Returns the vertex source name.
    #[must_use]
    pub const fn vertex_shader(self) -> &'static str {
        match self {
            Self::Default => "context/default.vert",
            Self::Crumbling => "context/crumbling.vert",
        }
    }

    /// Returns the fragment source name.
    #[must_use]
    pub const fn fragment_shader(self) -> &'static str {
        match self {
            Self::Default => "context/default.frag",
            Self::Crumbling => "context/crumbling.frag",
        }
    }
}

impl fmt::Display for ContextShader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Crumbling => f.write_str("crumbling"),
        }
    }
}

/// Key of one linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramKey {
    /// Instance type the program reads.
    pub instance_type: InstanceTypeId,
    /// Context variant.
    pub context: ContextShader,
}

impl ProgramKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(instance_type: InstanceTypeId, context: ContextShader) -> Self {
        Self {
            instance_type,
            context,
        }
    }
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance_type, self.context)
    }
}

/// Source names framing the per-key components of the instancing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// `#version` line, without the directive.
    pub glsl_version: &'static str,
    /// Vertex-side implementation of the shader API.
    pub vertex_api_impl: &'static str,
    /// Mesh vertex input declarations.
    pub vertex_input: &'static str,
    /// Vertex entry point.
    pub vertex_main: &'static str,
    /// Fragment-side implementation of the shader API.
    pub fragment_api_impl: &'static str,
    /// Fragment entry point.
    pub fragment_main: &'static str,
}

impl Pipeline {
    /// The instanced-arrays pipeline.
    pub const INSTANCING: Self = Self {
        glsl_version: "150",
        vertex_api_impl: "internal/instancing/api_impl.vert",
        vertex_input: "internal/vertex_input.glsl",
        vertex_main: "internal/instancing/main.vert",
        fragment_api_impl: "internal/instancing/api_impl.frag",
        fragment_main: "internal/instancing/main.frag",
    };
}

/// Everything a compile batch needs.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Named source texts.
    pub sources: ShaderSources,
    /// Framing sources.
    pub pipeline: Pipeline,
    /// Instance types to build programs for.
    pub instance_types: Vec<InstanceTypeInfo>,
    /// Context variants to build programs for.
    pub contexts: Vec<ContextShader>,
    /// Extra vertex components, spliced after the instance unpacking code.
    pub vertex_components: Vec<String>,
    /// Extra fragment components, spliced after the fragment API.
    pub fragment_components: Vec<String>,
    /// Extensions enabled in both stages.
    pub extensions: Vec<String>,
    /// Attribute locations taken by the mesh vertex format.
    pub vertex_attribute_count: u32,
    /// Include the full assembled source in failure logs.
    pub dump_source: bool,
}

impl CompileRequest {
    /// Creates a request for every context variant of `instance_types`.
    #[must_use]
    pub fn new(
        sources: ShaderSources,
        instance_types: Vec<InstanceTypeInfo>,
        vertex_attribute_count: u32,
    ) -> Self {
        Self {
            sources,
            pipeline: Pipeline::INSTANCING,
            instance_types,
            contexts: ContextShader::ALL.to_vec(),
            vertex_components: Vec::new(),
            fragment_components: Vec::new(),
            extensions: Vec::new(),
            vertex_attribute_count,
            dump_source: false,
        }
    }

    /// Returns the full key set: every instance type with every context.
    #[must_use]
    pub fn keys(&self) -> Vec<ProgramKey> {
        self.instance_types
            .iter()
            .flat_map(|info| {
                self.contexts
                    .iter()
                    .map(move |&context| ProgramKey::new(info.id, context))
            })
            .collect()
    }

    /// Returns the description of an instance type in the request.
    #[must_use]
    pub fn instance_type(&self, id: InstanceTypeId) -> Option<&InstanceTypeInfo> {
        self.instance_types.iter().find(|info| info.id == id)
    }
}
