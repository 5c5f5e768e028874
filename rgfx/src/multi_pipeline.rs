//! One graphics pipeline per shader macro combination.
//!
//! Each stage declares macros with an inclusive maximum value. Every
//! combination of every stage is compiled up front and the all-zero modules
//! are built immediately into a derivative base. Every combination, the
//! all-zero one included, is built on first request as a derivative of that
//! base and kept for the lifetime of the [`MultiPipeline`].
//!
//! Combinations are enumerated like an odometer: the last macro turns
//! fastest and carries into the one before it on overflow.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::device::Device;
use crate::pipeline::{
    CreatePipelineError, Derivation, GraphicsPipelineDesc, Pipeline, PipelineLayout,
    VertexLayout,
};
use crate::render_pass::RenderPass;
use crate::shader::{EntryPoint, MacroLimit, ShaderMacro, ShaderModule, ShaderStage};
use crate::shader_cache::{LoadShaderModuleError, ShaderCache, ShaderCompiler};

// ---------------------------------------------------------------------------
// Odometer
// ---------------------------------------------------------------------------

/// Number of combinations `limits` produce.
pub fn combination_count(limits: &[MacroLimit]) -> usize {
    limits
        .iter()
        .map(|l| l.max_value as usize + 1)
        .product()
}

/// Iterates every assignment of `limits`, all zeros first.
#[derive(Debug, Clone)]
pub struct MacroOdometer<'a> {
    limits: &'a [MacroLimit],
    values: Vec<u32>,
    done: bool,
}

impl<'a> MacroOdometer<'a> {
    pub fn new(limits: &'a [MacroLimit]) -> Self {
        Self {
            limits,
            values: vec![0; limits.len()],
            done: false,
        }
    }

    /// Returns false once every digit has wrapped back to zero.
    fn advance(&mut self) -> bool {
        for (value, limit) in self.values.iter_mut().zip(self.limits).rev() {
            if *value < limit.max_value {
                *value += 1;
                return true;
            }
            *value = 0;
        }
        false
    }
}

impl Iterator for MacroOdometer<'_> {
    type Item = Vec<ShaderMacro>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self
            .limits
            .iter()
            .zip(&self.values)
            .map(|(limit, &value)| ShaderMacro::new(limit.name.clone(), value))
            .collect();
        self.done = !self.advance();
        Some(current)
    }
}

/// Position of `values` in odometer order.
fn odometer_index(limits: &[MacroLimit], values: &[u32]) -> usize {
    limits
        .iter()
        .zip(values)
        .fold(0, |index, (limit, &value)| {
            index * (limit.max_value as usize + 1) + value as usize
        })
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateMultiPipelineError<E: std::error::Error + 'static> {
    #[error("A {0:?} shader is required")]
    MissingRequiredStage(ShaderStage),
    #[error("{0:?} cannot be part of a graphics pipeline")]
    UnsupportedStage(ShaderStage),
    #[error("{0:?} has no shader in this pipeline")]
    UnknownStage(ShaderStage),
    #[error("{stage:?} does not declare macro {name}")]
    UnknownMacro { stage: ShaderStage, name: String },
    #[error("{stage:?} macro {name}={value} exceeds its maximum {max_value}")]
    MacroOutOfRange {
        stage: ShaderStage,
        name: String,
        value: u32,
        max_value: u32,
    },
    #[error(transparent)]
    Factory(E),
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds the modules and pipelines a [`MultiPipeline`] caches.
pub trait PipelineFactory {
    type Module;
    type Pipeline;
    type Error: std::error::Error + 'static;

    fn compile(
        &mut self,
        stage: ShaderStage,
        path: &Path,
        macros: &[ShaderMacro],
    ) -> Result<Self::Module, Self::Error>;

    /// `stages` is in pipeline order.
    fn create_pipeline(
        &mut self,
        stages: &[&Self::Module],
        base: Option<&Self::Pipeline>,
    ) -> Result<Self::Pipeline, Self::Error>;
}

#[derive(Debug, Error)]
pub enum DevicePipelineError {
    #[error(transparent)]
    Shader(#[from] LoadShaderModuleError),
    #[error(transparent)]
    Pipeline(#[from] CreatePipelineError),
}

/// Compiles through a [`ShaderCache`] and creates real [`Pipeline`]s.
#[derive(Debug)]
pub struct DevicePipelineFactory<C: ShaderCompiler> {
    device: Arc<Device>,
    cache: Arc<ShaderCache<C>>,
    render_pass: Arc<RenderPass>,
    layout: Arc<PipelineLayout>,
    vertex_layout: VertexLayout,
    name: String,
    built: usize,
}

impl<C: ShaderCompiler> DevicePipelineFactory<C> {
    pub fn new(
        device: &Arc<Device>,
        cache: Arc<ShaderCache<C>>,
        render_pass: Arc<RenderPass>,
        layout: Arc<PipelineLayout>,
        vertex_layout: VertexLayout,
        name: impl Into<String>,
    ) -> Self {
        Self {
            device: Arc::clone(device),
            cache,
            render_pass,
            layout,
            vertex_layout,
            name: name.into(),
            built: 0,
        }
    }
}

impl<C: ShaderCompiler> PipelineFactory for DevicePipelineFactory<C> {
    type Module = ShaderModule;
    type Pipeline = Pipeline;
    type Error = DevicePipelineError;

    fn compile(
        &mut self,
        stage: ShaderStage,
        path: &Path,
        macros: &[ShaderMacro],
    ) -> Result<ShaderModule, DevicePipelineError> {
        Ok(self.cache.load_module(&self.device, stage, path, macros)?)
    }

    fn create_pipeline(
        &mut self,
        stages: &[&ShaderModule],
        base: Option<&Pipeline>,
    ) -> Result<Pipeline, DevicePipelineError> {
        let entry_points: Vec<EntryPoint<'_>> =
            stages.iter().map(|m| m.entry_point()).collect();
        let mut desc = GraphicsPipelineDesc::new(&self.render_pass, Arc::clone(&self.layout));
        desc.vertex_layout = self.vertex_layout.clone();
        let derivation = match base {
            Some(base) => Derivation::DerivativeOf(base),
            None => Derivation::Base,
        };
        let name = format!("{} #{}", self.name, self.built);
        let pipeline =
            Pipeline::graphics(&self.device, &desc, &entry_points, derivation, Some(&name))?;
        self.built += 1;
        Ok(pipeline)
    }
}

// ---------------------------------------------------------------------------
// MultiPipeline
// ---------------------------------------------------------------------------

/// Source and macro declarations for one stage.
#[derive(Debug, Clone)]
pub struct StageSource {
    pub path: PathBuf,
    pub macros: Vec<MacroLimit>,
}

#[derive(Debug, Clone, Default)]
pub struct MultiPipelineDesc {
    stages: Vec<(ShaderStage, StageSource)>,
}

impl MultiPipelineDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier source for `stage`.
    pub fn stage(
        mut self,
        stage: ShaderStage,
        path: impl Into<PathBuf>,
        macros: Vec<MacroLimit>,
    ) -> Self {
        self.stages.retain(|(s, _)| *s != stage);
        self.stages.push((
            stage,
            StageSource {
                path: path.into(),
                macros,
            },
        ));
        self
    }
}

/// Requested macro values per stage. Macros left out are 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderCombination {
    stages: Vec<(ShaderStage, Vec<ShaderMacro>)>,
}

impl ShaderCombination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: ShaderStage, macros: Vec<ShaderMacro>) -> Self {
        match self.stages.iter_mut().find(|(s, _)| *s == stage) {
            Some((_, existing)) => existing.extend(macros),
            None => self.stages.push((stage, macros)),
        }
        self
    }

    fn macros(&self, stage: ShaderStage) -> &[ShaderMacro] {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map_or(&[], |(_, m)| m.as_slice())
    }
}

struct StageVariants<M> {
    stage: ShaderStage,
    limits: Vec<MacroLimit>,
    /// In odometer order.
    modules: Vec<M>,
}

pub struct MultiPipeline<F: PipelineFactory> {
    factory: F,
    /// In pipeline order.
    stages: Vec<StageVariants<F::Module>>,
    base: F::Pipeline,
    derived: HashMap<Vec<ShaderMacro>, F::Pipeline>,
}

impl<F: PipelineFactory> std::fmt::Debug for MultiPipeline<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiPipeline")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.stage).collect::<Vec<_>>(),
            )
            .field("derived", &self.derived.len())
            .finish_non_exhaustive()
    }
}

impl<F: PipelineFactory> MultiPipeline<F> {
    /// Compile every combination of every stage and build the base pipeline.
    pub fn new(
        mut factory: F,
        desc: &MultiPipelineDesc,
    ) -> Result<Self, CreateMultiPipelineError<F::Error>> {
        for required in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if !desc.stages.iter().any(|(s, _)| *s == required) {
                return Err(CreateMultiPipelineError::MissingRequiredStage(required));
            }
        }
        if desc.stages.iter().any(|(s, _)| *s == ShaderStage::Compute) {
            return Err(CreateMultiPipelineError::UnsupportedStage(
                ShaderStage::Compute,
            ));
        }

        let mut stages = Vec::new();
        for stage in ShaderStage::GRAPHICS {
            let Some((_, source)) = desc.stages.iter().find(|(s, _)| *s == stage) else {
                continue;
            };
            let mut modules = Vec::with_capacity(combination_count(&source.macros));
            for macros in MacroOdometer::new(&source.macros) {
                modules.push(
                    factory
                        .compile(stage, &source.path, &macros)
                        .map_err(CreateMultiPipelineError::Factory)?,
                );
            }
            tracing::debug!(
                "Compiled {} variants of {}",
                modules.len(),
                source.path.display()
            );
            stages.push(StageVariants {
                stage,
                limits: source.macros.clone(),
                modules,
            });
        }

        let base_modules: Vec<&F::Module> = stages.iter().map(|s| &s.modules[0]).collect();
        let base = factory
            .create_pipeline(&base_modules, None)
            .map_err(CreateMultiPipelineError::Factory)?;

        Ok(Self {
            factory,
            stages,
            base,
            derived: HashMap::new(),
        })
    }

    /// The pipeline for `combination`, built as a derivative of the base
    /// and cached on first request. The all-zero combination gets its own
    /// derivative like every other.
    pub fn get_pipeline_with_shaders(
        &mut self,
        combination: &ShaderCombination,
    ) -> Result<&F::Pipeline, CreateMultiPipelineError<F::Error>> {
        let (key, indices) = self.resolve(combination)?;
        match self.derived.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let modules: Vec<&F::Module> = self
                    .stages
                    .iter()
                    .zip(&indices)
                    .map(|(s, &i)| &s.modules[i])
                    .collect();
                let pipeline = self
                    .factory
                    .create_pipeline(&modules, Some(&self.base))
                    .map_err(CreateMultiPipelineError::Factory)?;
                tracing::debug!("Built pipeline variant {:?}", entry.key());
                Ok(entry.insert(pipeline))
            }
        }
    }

    /// Normalise `combination` into the cache key (every declared macro of
    /// every stage, in pipeline order) and the module index per stage.
    fn resolve(
        &self,
        combination: &ShaderCombination,
    ) -> Result<(Vec<ShaderMacro>, Vec<usize>), CreateMultiPipelineError<F::Error>> {
        if let Some((stage, _)) = combination
            .stages
            .iter()
            .find(|(s, _)| !self.stages.iter().any(|v| v.stage == *s))
        {
            return Err(CreateMultiPipelineError::UnknownStage(*stage));
        }

        let mut key = Vec::new();
        let mut indices = Vec::with_capacity(self.stages.len());
        for variants in &self.stages {
            let requested = combination.macros(variants.stage);
            if let Some(unknown) = requested
                .iter()
                .find(|m| !variants.limits.iter().any(|l| l.name == m.name))
            {
                return Err(CreateMultiPipelineError::UnknownMacro {
                    stage: variants.stage,
                    name: unknown.name.clone(),
                });
            }

            let mut values = Vec::with_capacity(variants.limits.len());
            for limit in &variants.limits {
                let value = requested
                    .iter()
                    .rev()
                    .find(|m| m.name == limit.name)
                    .map_or(0, |m| m.value);
                if value > limit.max_value {
                    return Err(CreateMultiPipelineError::MacroOutOfRange {
                        stage: variants.stage,
                        name: limit.name.clone(),
                        value,
                        max_value: limit.max_value,
                    });
                }
                key.push(ShaderMacro::new(limit.name.clone(), value));
                values.push(value);
            }
            indices.push(odometer_index(&variants.limits, &values));
        }
        Ok((key, indices))
    }

    pub fn base(&self) -> &F::Pipeline {
        &self.base
    }

    /// Derivatives built so far.
    pub fn derived_count(&self) -> usize {
        self.derived.len()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("factory failed")]
    struct FactoryError;

    /// Modules are `(stage, macros)`; pipelines are creation ids.
    #[derive(Default)]
    struct CountingFactory {
        compiled: Vec<(ShaderStage, Vec<ShaderMacro>)>,
        pipelines: Vec<(Vec<(ShaderStage, Vec<ShaderMacro>)>, bool)>,
    }

    impl PipelineFactory for CountingFactory {
        type Module = (ShaderStage, Vec<ShaderMacro>);
        type Pipeline = usize;
        type Error = FactoryError;

        fn compile(
            &mut self,
            stage: ShaderStage,
            _path: &Path,
            macros: &[ShaderMacro],
        ) -> Result<Self::Module, FactoryError> {
            self.compiled.push((stage, macros.to_vec()));
            Ok((stage, macros.to_vec()))
        }

        fn create_pipeline(
            &mut self,
            stages: &[&Self::Module],
            base: Option<&usize>,
        ) -> Result<usize, FactoryError> {
            self.pipelines
                .push((stages.iter().map(|m| (*m).clone()).collect(), base.is_some()));
            Ok(self.pipelines.len() - 1)
        }
    }

    fn limits() -> Vec<MacroLimit> {
        vec![MacroLimit::new("A", 1), MacroLimit::new("B", 2)]
    }

    fn values(combination: &[ShaderMacro]) -> Vec<u32> {
        combination.iter().map(|m| m.value).collect()
    }

    #[test]
    fn odometer_turns_last_digit_fastest() {
        let limits = limits();
        let all: Vec<Vec<u32>> = MacroOdometer::new(&limits).map(|c| values(&c)).collect();
        let expected: Vec<Vec<u32>> = vec![
            vec![0, 0],
            vec![0, 1],
            vec![0, 2],
            vec![1, 0],
            vec![1, 1],
            vec![1, 2],
        ];
        assert_eq!(all, expected);
        assert_eq!(combination_count(&limits), 6);
        for (i, combination) in all.iter().enumerate() {
            assert_eq!(odometer_index(&limits, combination), i);
        }
    }

    #[test]
    fn no_macros_is_one_combination() {
        assert_eq!(MacroOdometer::new(&[]).count(), 1);
        assert_eq!(combination_count(&[]), 1);
    }

    fn desc() -> MultiPipelineDesc {
        MultiPipelineDesc::new()
            .stage(ShaderStage::Vertex, "basic.vert", limits())
            .stage(ShaderStage::Fragment, "basic.frag", vec![])
    }

    fn combination(a: u32, b: u32) -> ShaderCombination {
        ShaderCombination::new().with(
            ShaderStage::Vertex,
            vec![ShaderMacro::new("A", a), ShaderMacro::new("B", b)],
        )
    }

    #[test]
    fn every_combination_is_built_once() {
        let mut multi = MultiPipeline::new(CountingFactory::default(), &desc()).unwrap();
        assert_eq!(multi.factory().compiled.len(), 6 + 1);
        assert_eq!(multi.factory().pipelines.len(), 1);
        assert!(!multi.factory().pipelines[0].1);

        let first = *multi.get_pipeline_with_shaders(&combination(1, 2)).unwrap();
        let again = *multi.get_pipeline_with_shaders(&combination(1, 2)).unwrap();
        assert_eq!(first, again);
        assert_eq!(multi.factory().pipelines.len(), 2);
        assert!(multi.factory().pipelines[first].1);

        for a in 0..=1 {
            for b in 0..=2 {
                multi.get_pipeline_with_shaders(&combination(a, b)).unwrap();
            }
        }
        // Base plus one derivative per combination.
        assert_eq!(multi.factory().pipelines.len(), 1 + 6);
        assert_eq!(multi.derived_count(), 6);
        assert!(multi.factory().pipelines[1..].iter().all(|(_, derived)| *derived));
    }

    #[test]
    fn derivative_uses_the_requested_modules() {
        let mut multi = MultiPipeline::new(CountingFactory::default(), &desc()).unwrap();
        let id = *multi.get_pipeline_with_shaders(&combination(1, 0)).unwrap();
        let (stages, derived) = &multi.factory().pipelines[id];
        assert!(*derived);
        assert_eq!(stages[0].0, ShaderStage::Vertex);
        assert_eq!(values(&stages[0].1), [1, 0]);
        assert_eq!(stages[1].0, ShaderStage::Fragment);
    }

    #[test]
    fn all_zero_request_is_a_cached_derivative() {
        let mut multi = MultiPipeline::new(CountingFactory::default(), &desc()).unwrap();
        let base = *multi.base();
        let zero = *multi
            .get_pipeline_with_shaders(&ShaderCombination::new())
            .unwrap();
        assert_ne!(zero, base);
        assert!(multi.factory().pipelines[zero].1);
        assert_eq!(values(&multi.factory().pipelines[zero].0[0].1), [0, 0]);
        // Omitted macros default to zero, so both requests share one entry.
        assert_eq!(*multi.get_pipeline_with_shaders(&combination(0, 0)).unwrap(), zero);
        assert_eq!(multi.derived_count(), 1);
        assert_eq!(multi.factory().pipelines.len(), 2);
    }

    #[test]
    fn missing_fragment_stage_is_rejected() {
        let desc = MultiPipelineDesc::new().stage(ShaderStage::Vertex, "basic.vert", limits());
        assert!(matches!(
            MultiPipeline::new(CountingFactory::default(), &desc),
            Err(CreateMultiPipelineError::MissingRequiredStage(
                ShaderStage::Fragment
            ))
        ));
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let mut multi = MultiPipeline::new(CountingFactory::default(), &desc()).unwrap();
        assert!(matches!(
            multi.get_pipeline_with_shaders(&combination(0, 3)),
            Err(CreateMultiPipelineError::MacroOutOfRange { value: 3, .. })
        ));
        assert!(matches!(
            multi.get_pipeline_with_shaders(
                &ShaderCombination::new()
                    .with(ShaderStage::Fragment, vec![ShaderMacro::new("A", 1)])
            ),
            Err(CreateMultiPipelineError::UnknownMacro {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
        assert!(matches!(
            multi.get_pipeline_with_shaders(
                &ShaderCombination::new().with(ShaderStage::Geometry, vec![])
            ),
            Err(CreateMultiPipelineError::UnknownStage(ShaderStage::Geometry))
        ));
    }
}
