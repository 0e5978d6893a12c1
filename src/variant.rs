use std::ops::Deref;

use anyhow::{Context, Result};

use crate::compiler::{CompiledArtifact, Model, ModelCompiler};
use crate::device::{MemoryLayout, Tensor};
use crate::plan::OptimizationConfig;

/// Host/device synchronization required after one forward pass. Resolved
/// once when the variant is built, never re-read from configuration on the
/// hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Explicitly block the host after the call so timing boundaries reflect
    /// device completion, not kernel submission.
    HostSync,
    /// Static-graph replay synchronizes internally as part of the replay
    /// protocol; an extra host sync would be measured twice.
    ReplayInternal,
}

impl SyncPolicy {
    pub fn for_config(config: &OptimizationConfig) -> Self {
        if config.static_graph_replay {
            SyncPolicy::ReplayInternal
        } else {
            SyncPolicy::HostSync
        }
    }
}

/// A compiled model bound to the configuration snapshot used to build it.
/// Ready from construction until dropped; dropping releases the artifact's
/// device memory.
pub struct ModelVariant {
    name: String,
    config: OptimizationConfig,
    sync: SyncPolicy,
    artifact: Box<dyn CompiledArtifact>,
}

impl ModelVariant {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync
    }

    /// Input striding the variant's kernels prefer, if any.
    pub fn preferred_layout(&self) -> Option<MemoryLayout> {
        self.config.preferred_layout()
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.artifact.forward(input)
    }
}

/// Builds one ready variant at a time from a private copy of the base model.
pub struct VariantBuilder<'c> {
    compiler: &'c dyn ModelCompiler,
    base: Model,
}

impl<'c> VariantBuilder<'c> {
    pub fn new(compiler: &'c dyn ModelCompiler, base: Model) -> Self {
        Self { compiler, base }
    }

    /// Compile a variant. The returned guard keeps the builder mutably
    /// borrowed, so the next build cannot start until the previous variant
    /// has been disposed; peak device memory stays bounded to one artifact.
    ///
    /// Compiler failure is fatal to the benchmark: there is no partial or
    /// degraded Ready state to fall back to.
    pub fn build(&mut self, name: &str, config: &OptimizationConfig) -> Result<BuiltVariant<'_>> {
        // Clear residual compiler state first, or rebuilding the same
        // logical variant accumulates duplicate artifacts.
        self.compiler.reset_cache();

        let model = self.base.clone();
        let artifact = self
            .compiler
            .compile(&model, config)
            .with_context(|| format!("failed to compile variant '{name}'"))?;

        Ok(BuiltVariant {
            variant: ModelVariant {
                name: name.to_owned(),
                config: *config,
                sync: SyncPolicy::for_config(config),
                artifact,
            },
            _scope: std::marker::PhantomData,
        })
    }
}

/// Scope guard for a ready variant. Dropping it disposes the variant and
/// ends the builder borrow taken by [`VariantBuilder::build`].
pub struct BuiltVariant<'b> {
    variant: ModelVariant,
    _scope: std::marker::PhantomData<&'b mut ()>,
}

impl std::fmt::Debug for BuiltVariant<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltVariant")
            .field("name", &self.variant.name)
            .field("config", &self.variant.config)
            .field("sync", &self.variant.sync)
            .finish_non_exhaustive()
    }
}

impl Deref for BuiltVariant<'_> {
    type Target = ModelVariant;

    fn deref(&self) -> &ModelVariant {
        &self.variant
    }
}
