//! The active program set and its hot swap.
//!
//! Render passes take an `Arc<ProgramSet>` for their duration. A reload
//! builds a whole new set off to the side and swaps it in only if every key
//! linked. The replaced set is retired and its programs are deleted by
//! [`ProgramCache::collect_garbage`] once no pass holds it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{CompileRequest, PipelineCompiler, ProgramKey};
use crate::error::{CompileError, CompileResult};
use crate::gpu::{GpuContext, ProgramId};

/// An immutable mapping from key to linked program.
#[derive(Debug, Default)]
pub struct ProgramSet {
    programs: HashMap<ProgramKey, ProgramId>,
}

impl ProgramSet {
    /// Returns the program for a key.
    #[inline]
    #[must_use]
    pub fn get(&self, key: ProgramKey) -> Option<ProgramId> {
        self.programs.get(&key).copied()
    }

    /// Returns the number of programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Returns true if the set holds no program.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Iterates every key and program.
    pub fn iter(&self) -> impl Iterator<Item = (ProgramKey, ProgramId)> + '_ {
        self.programs.iter().map(|(key, program)| (*key, *program))
    }

    fn delete(&self, gpu: &mut dyn GpuContext) {
        for program in self.programs.values() {
            gpu.delete_program(*program);
        }
    }
}

/// Holds the current program set.
#[derive(Debug, Default)]
pub struct ProgramCache {
    current: RwLock<Option<Arc<ProgramSet>>>,
    retired: Mutex<Vec<Arc<ProgramSet>>>,
}

impl ProgramCache {
    /// Creates an empty cache. Nothing draws until the first successful
    /// [`ProgramCache::reload`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles every key of `request` and installs the result.
    ///
    /// On any failure the current set stays active and every individual
    /// failure is logged with its diagnostics.
    ///
    /// # Errors
    ///
    /// [`CompileError::UnsupportedHardware`] if the context cannot draw
    /// instanced, otherwise the batch failure.
    pub fn reload(&self, gpu: &mut dyn GpuContext, request: &CompileRequest) -> CompileResult<()> {
        if !gpu.supports_instancing() {
            tracing::warn!("instancing unsupported, keeping current programs");
            return Err(CompileError::UnsupportedHardware);
        }

        let mut compiler = PipelineCompiler::new();
        let result = compiler.compile_batch(gpu, request);
        compiler.delete(gpu);

        match result {
            Ok(programs) => {
                let count = programs.len();
                let previous = self
                    .current
                    .write()
                    .replace(Arc::new(ProgramSet { programs }));
                if let Some(previous) = previous {
                    self.retired.lock().push(previous);
                }
                tracing::info!(programs = count, "installed program set");
                Ok(())
            }
            Err(error) => {
                if let CompileError::BatchFailed { failures, total } = &error {
                    for failure in failures {
                        tracing::error!("{failure}");
                    }
                    tracing::error!(
                        failed = failures.len(),
                        total,
                        "program batch failed, keeping current programs"
                    );
                } else {
                    tracing::error!("{error}");
                }
                Err(error)
            }
        }
    }

    /// Returns the current set.
    #[must_use]
    pub fn get(&self) -> Option<Arc<ProgramSet>> {
        self.current.read().clone()
    }

    /// Returns the current program for a key.
    #[must_use]
    pub fn program(&self, key: ProgramKey) -> Option<ProgramId> {
        self.current.read().as_ref()?.get(key)
    }

    /// Deletes the programs of retired sets no pass still holds.
    ///
    /// # Returns
    ///
    /// Number of sets destroyed.
    pub fn collect_garbage(&self, gpu: &mut dyn GpuContext) -> usize {
        let mut retired = self.retired.lock();
        let before = retired.len();
        retired.retain(|set| {
            if Arc::strong_count(set) == 1 {
                set.delete(gpu);
                false
            } else {
                true
            }
        });
        let destroyed = before - retired.len();
        if destroyed > 0 {
            tracing::debug!(destroyed, "deleted retired program sets");
        }
        destroyed
    }

    /// Returns the number of retired sets awaiting deletion.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Deletes every program, current and retired.
    pub fn delete(&self, gpu: &mut dyn GpuContext) {
        if let Some(current) = self.current.write().take() {
            current.delete(gpu);
        }
        for set in self.retired.lock().drain(..) {
            set.delete(gpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{ContextShader, ShaderSources};
    use crate::gpu::HeadlessGpu;
    use crate::instance::{InstanceType, InstanceTypeInfo, Oriented, Shadow, Transformed};
    use crate::mesh::BlockVertex;

    fn request(sources: ShaderSources, types: Vec<InstanceTypeInfo>) -> CompileRequest {
        CompileRequest::new(sources, types, BlockVertex::LAYOUT.attribute_count())
    }

    fn full_request() -> CompileRequest {
        request(
            ShaderSources::builtin(),
            vec![Transformed::info(), Oriented::info(), Shadow::info()],
        )
    }

    /// Shadow-shaped instances drawn by a separately named shader.
    struct Marker;

    impl InstanceType for Marker {
        type Instance = <Shadow as InstanceType>::Instance;

        const NAME: &'static str = "marker";
        const VERTEX_SHADER: &'static str = "instance/marker.vert";
        const LAYOUT: &'static [crate::instance::LayoutField] = Shadow::LAYOUT;

        fn write(instance: &Self::Instance, out: &mut [u8]) {
            Shadow::write(instance, out);
        }

        fn read(bytes: &[u8]) -> Self::Instance {
            Shadow::read(bytes)
        }
    }

    struct Beacon;

    impl InstanceType for Beacon {
        type Instance = <Shadow as InstanceType>::Instance;

        const NAME: &'static str = "beacon";
        const VERTEX_SHADER: &'static str = "instance/beacon.vert";
        const LAYOUT: &'static [crate::instance::LayoutField] = Shadow::LAYOUT;

        fn write(instance: &Self::Instance, out: &mut [u8]) {
            Shadow::write(instance, out);
        }

        fn read(bytes: &[u8]) -> Self::Instance {
            Shadow::read(bytes)
        }
    }

    fn five_key_request(beacon_source: &str) -> CompileRequest {
        let shadow = ShaderSources::builtin();
        let marker = shadow.get(Shadow::VERTEX_SHADER).unwrap().to_owned();
        let mut request = request(
            shadow
                .with(Marker::VERTEX_SHADER, marker)
                .with(Beacon::VERTEX_SHADER, beacon_source),
            vec![
                Transformed::info(),
                Oriented::info(),
                Shadow::info(),
                Marker::info(),
                Beacon::info(),
            ],
        );
        request.contexts = vec![ContextShader::Default];
        request
    }

    #[test]
    fn test_failed_batch_keeps_previous_set() {
        let mut gpu = HeadlessGpu::new();
        let cache = ProgramCache::new();
        let working = ShaderSources::builtin();
        let beacon = working.get(Shadow::VERTEX_SHADER).unwrap();
        cache.reload(&mut gpu, &five_key_request(beacon)).unwrap();

        let before = cache.get().unwrap();
        let mut before_programs: Vec<_> = before.iter().collect();
        before_programs.sort();
        assert_eq!(before_programs.len(), 5);

        let broken = five_key_request("void _skein_transformVertex() {\n#error beacon\n}\n");
        assert_eq!(broken.keys().len(), 5);
        let Err(CompileError::BatchFailed { failures, total }) = cache.reload(&mut gpu, &broken)
        else {
            panic!("expected the batch to fail");
        };
        assert_eq!((failures.len(), total), (1, 5));

        let after = cache.get().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        let mut after_programs: Vec<_> = after.iter().collect();
        after_programs.sort();
        assert_eq!(before_programs, after_programs);
        // the four keys that did link were thrown away
        assert_eq!(gpu.live_programs(), 5);
        assert_eq!(cache.retired_count(), 0);
    }

    #[test]
    fn test_get_is_idempotent() {
        let mut gpu = HeadlessGpu::new();
        let cache = ProgramCache::new();
        assert!(cache.get().is_none());
        cache.reload(&mut gpu, &full_request()).unwrap();

        let key = ProgramKey::new(Oriented::id(), ContextShader::Default);
        let first = cache.program(key).unwrap();
        for _ in 0..4 {
            assert_eq!(cache.program(key), Some(first));
        }
        assert!(Arc::ptr_eq(&cache.get().unwrap(), &cache.get().unwrap()));
    }

    #[test]
    fn test_retired_set_outlives_holders() {
        let mut gpu = HeadlessGpu::new();
        let cache = ProgramCache::new();
        cache.reload(&mut gpu, &full_request()).unwrap();

        let held = cache.get().unwrap();
        let old = held.get(ProgramKey::new(Shadow::id(), ContextShader::Default)).unwrap();
        cache.reload(&mut gpu, &full_request()).unwrap();

        assert_eq!(cache.collect_garbage(&mut gpu), 0);
        assert!(gpu.is_program_live(old));

        drop(held);
        assert_eq!(cache.collect_garbage(&mut gpu), 1);
        assert!(!gpu.is_program_live(old));
        assert_eq!(gpu.live_programs(), 6);
    }

    #[test]
    fn test_unsupported_hardware_installs_nothing() {
        let mut gpu = HeadlessGpu::new().without_instancing();
        let cache = ProgramCache::new();
        assert_eq!(
            cache.reload(&mut gpu, &full_request()),
            Err(CompileError::UnsupportedHardware)
        );
        assert!(cache.get().is_none());
        assert_eq!(gpu.live_shaders(), 0);
    }

    #[test]
    fn test_delete_releases_everything() {
        let mut gpu = HeadlessGpu::new();
        let cache = ProgramCache::new();
        cache.reload(&mut gpu, &full_request()).unwrap();
        let _held = cache.get();
        cache.reload(&mut gpu, &full_request()).unwrap();

        cache.delete(&mut gpu);
        assert_eq!(gpu.live_programs(), 0);
        assert!(cache.get().is_none());
        assert_eq!(cache.retired_count(), 0);
    }
}
