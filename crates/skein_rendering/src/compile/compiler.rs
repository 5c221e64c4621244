//! Batch compilation of pipeline programs.

use std::collections::HashMap;

use super::source::SourceBuilder;
use super::{
    generate_instance_component, AssembledSource, CompileRequest, DiagnosticReport, ProgramKey,
};
use crate::error::{CompileError, CompileResult};
use crate::gpu::{GpuContext, ProgramId, ShaderId, ShaderStage};

/// Compiles and links every program of a [`CompileRequest`].
///
/// Shader objects are cached by stage and full source text for the life of
/// the compiler, so stages shared between keys compile once. Call
/// [`PipelineCompiler::delete`] when the batch is done.
#[derive(Debug, Default)]
pub struct PipelineCompiler {
    shaders: HashMap<(ShaderStage, String), Result<ShaderId, DiagnosticReport>>,
}

impl PipelineCompiler {
    /// Creates a compiler with an empty shader cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every key of the request.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::BatchFailed`] with every individual failure if
    /// any key failed. Programs linked for the other keys are deleted, so a
    /// failed batch leaves nothing behind.
    pub fn compile_batch(
        &mut self,
        gpu: &mut dyn GpuContext,
        request: &CompileRequest,
    ) -> CompileResult<HashMap<ProgramKey, ProgramId>> {
        let keys = request.keys();
        let total = keys.len();
        let mut programs = HashMap::with_capacity(total);
        let mut failures = Vec::new();

        for key in keys {
            match self.compile_program(gpu, request, key) {
                Ok(program) => {
                    programs.insert(key, program);
                }
                Err(error) => failures.push(error),
            }
        }

        if failures.is_empty() {
            return Ok(programs);
        }
        for program in programs.into_values() {
            gpu.delete_program(program);
        }
        Err(CompileError::BatchFailed { failures, total })
    }

    /// Compiles both stages of one key and links them.
    ///
    /// # Errors
    ///
    /// Missing sources, stage compile failures and link failures.
    pub fn compile_program(
        &mut self,
        gpu: &mut dyn GpuContext,
        request: &CompileRequest,
        key: ProgramKey,
    ) -> CompileResult<ProgramId> {
        let vertex = self.compile_stage(gpu, request, key, ShaderStage::Vertex)?;
        let fragment = self.compile_stage(gpu, request, key, ShaderStage::Fragment)?;
        gpu.link_program(&[vertex, fragment])
            .map_err(|log| CompileError::ProgramLink { key, log })
    }

    fn compile_stage(
        &mut self,
        gpu: &mut dyn GpuContext,
        request: &CompileRequest,
        key: ProgramKey,
        stage: ShaderStage,
    ) -> CompileResult<ShaderId> {
        let source = Self::assemble(request, key, stage)?;

        let result = self
            .shaders
            .entry((stage, source.text().to_owned()))
            .or_insert_with(|| {
                gpu.compile_shader(stage, source.text())
                    .map_err(|log| DiagnosticReport::parse(&log, &source))
            })
            .clone();

        result.map_err(|diagnostics| {
            if request.dump_source {
                tracing::error!(%key, %stage, source = source.text(), "failed shader source");
            }
            CompileError::ShaderCompile {
                key,
                stage,
                diagnostics,
            }
        })
    }

    /// Assembles the full source of one stage of one key.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::MissingSource`] if a component is not
    /// registered or the key's instance type is not part of the request.
    pub fn assemble(
        request: &CompileRequest,
        key: ProgramKey,
        stage: ShaderStage,
    ) -> CompileResult<AssembledSource> {
        let pipeline = &request.pipeline;
        let sources = &request.sources;
        let mut builder = SourceBuilder::new(pipeline.glsl_version, &request.extensions);

        match stage {
            ShaderStage::Vertex => {
                let info = request
                    .instance_type(key.instance_type)
                    .ok_or_else(|| CompileError::MissingSource(key.instance_type.to_string()))?;

                builder.push(pipeline.vertex_api_impl, sources.get(pipeline.vertex_api_impl)?);
                builder.push(pipeline.vertex_input, sources.get(pipeline.vertex_input)?);
                builder.push(
                    &format!("generated/{}", info.id),
                    &generate_instance_component(info, request.vertex_attribute_count),
                );
                for name in &request.vertex_components {
                    builder.push(name, sources.get(name)?);
                }
                builder.push(info.vertex_shader, sources.get(info.vertex_shader)?);
                let context = key.context.vertex_shader();
                builder.push(context, sources.get(context)?);
                builder.push(pipeline.vertex_main, sources.get(pipeline.vertex_main)?);
            }
            ShaderStage::Fragment => {
                builder.push(pipeline.fragment_api_impl, sources.get(pipeline.fragment_api_impl)?);
                for name in &request.fragment_components {
                    builder.push(name, sources.get(name)?);
                }
                let context = key.context.fragment_shader();
                builder.push(context, sources.get(context)?);
                builder.push(pipeline.fragment_main, sources.get(pipeline.fragment_main)?);
            }
        }
        Ok(builder.finish())
    }

    /// Returns the number of cached shader objects.
    #[must_use]
    pub fn shader_count(&self) -> usize {
        self.shaders.values().filter(|result| result.is_ok()).count()
    }

    /// Releases every cached shader object. Linked programs stay valid.
    pub fn delete(&mut self, gpu: &mut dyn GpuContext) {
        for (_, result) in self.shaders.drain() {
            if let Ok(shader) = result {
                gpu.delete_shader(shader);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{ContextShader, ShaderSources};
    use crate::gpu::HeadlessGpu;
    use crate::instance::{InstanceType, Oriented, Shadow, Transformed};

    fn request(sources: ShaderSources) -> CompileRequest {
        CompileRequest::new(
            sources,
            vec![Transformed::info(), Oriented::info(), Shadow::info()],
            5,
        )
    }

    #[test]
    fn test_batch_builds_every_key() {
        let mut gpu = HeadlessGpu::new();
        let mut compiler = PipelineCompiler::new();

        let programs = compiler.compile_batch(&mut gpu, &request(ShaderSources::builtin())).unwrap();
        assert_eq!(programs.len(), 6);
        assert_eq!(gpu.live_programs(), 6);
        // 3 types x 2 contexts vertex shaders, fragments shared per context
        assert_eq!(compiler.shader_count(), 8);

        compiler.delete(&mut gpu);
        assert_eq!(gpu.live_shaders(), 0);
        assert_eq!(gpu.live_programs(), 6);
    }

    #[test]
    fn test_failed_key_fails_whole_batch() {
        let mut gpu = HeadlessGpu::new();
        let mut compiler = PipelineCompiler::new();
        let broken = ShaderSources::builtin().with(
            "instance/shadow.vert",
            "void _skein_transform() {\n#error shadow is broken\n}",
        );

        let error = compiler.compile_batch(&mut gpu, &request(broken)).unwrap_err();
        let CompileError::BatchFailed { failures, total } = error else {
            panic!("expected a batch failure");
        };
        assert_eq!(total, 6);
        assert_eq!(failures.len(), 2);
        assert_eq!(gpu.live_programs(), 0);

        let CompileError::ShaderCompile { key, stage, diagnostics } = &failures[0] else {
            panic!("expected a compile failure");
        };
        assert_eq!(key.instance_type, Shadow::id());
        assert_eq!(*stage, ShaderStage::Vertex);
        assert_eq!(diagnostics.diagnostics[0].component, "instance/shadow.vert");
        assert_eq!(diagnostics.diagnostics[0].line, 2);
        assert_eq!(diagnostics.diagnostics[0].source_line, "#error shadow is broken");
    }

    #[test]
    fn test_missing_component_is_reported() {
        let request = CompileRequest {
            vertex_components: vec!["lib/light.glsl".to_owned()],
            ..request(ShaderSources::builtin())
        };
        let key = ProgramKey::new(Transformed::id(), ContextShader::Default);

        assert_eq!(
            PipelineCompiler::assemble(&request, key, ShaderStage::Vertex),
            Err(CompileError::MissingSource("lib/light.glsl".to_owned()))
        );
    }

    #[test]
    fn test_vertex_components_in_order() {
        let request = request(ShaderSources::builtin());
        let key = ProgramKey::new(Oriented::id(), ContextShader::Crumbling);
        let source = PipelineCompiler::assemble(&request, key, ShaderStage::Vertex).unwrap();

        let names: Vec<&str> = source.spans().iter().map(|span| span.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "header",
                "internal/instancing/api_impl.vert",
                "internal/vertex_input.glsl",
                "generated/oriented",
                "instance/oriented.vert",
                "context/crumbling.vert",
                "internal/instancing/main.vert",
            ]
        );
    }
}
