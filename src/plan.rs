use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::device::MemoryLayout;
use crate::frame::CaptureSettings;

/// Immutable snapshot of optimization toggles for one variant. Copied into
/// the variant at build time; nothing in the crate mutates a config after
/// that, so later plan entries cannot retroactively change a built variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationConfig {
    /// Fuse adjacent operators (constant folding, kernel fusion).
    #[serde(default)]
    pub fuse_operators: bool,
    /// Record the execution graph once and replay it. Replay synchronizes
    /// internally as part of its protocol.
    #[serde(default)]
    pub static_graph_replay: bool,
    /// Repack inputs to channels-last striding for the compiled kernels.
    #[serde(default)]
    pub channels_last: bool,
    /// Verbose compile-pipeline tracing.
    #[serde(default)]
    pub verbose: bool,
}

impl OptimizationConfig {
    pub fn enabled_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.fuse_operators {
            flags.push("fuse_operators");
        }
        if self.static_graph_replay {
            flags.push("static_graph_replay");
        }
        if self.channels_last {
            flags.push("channels_last");
        }
        if self.verbose {
            flags.push("verbose");
        }
        flags
    }

    /// True when every flag enabled in `other` is enabled here too.
    pub fn is_superset_of(&self, other: &OptimizationConfig) -> bool {
        (self.fuse_operators || !other.fuse_operators)
            && (self.static_graph_replay || !other.static_graph_replay)
            && (self.channels_last || !other.channels_last)
            && (self.verbose || !other.verbose)
    }

    /// Input striding the compiled kernels prefer, if any.
    pub fn preferred_layout(&self) -> Option<MemoryLayout> {
        self.channels_last.then_some(MemoryLayout::ChannelsLast)
    }
}

/// Description of the base network handed to the compiler collaborator.
/// The architecture itself lives outside this crate.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
}

fn default_num_classes() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantSpec {
    pub name: String,
    #[serde(default)]
    pub config: OptimizationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkPlan {
    pub capture: CaptureSettings,
    pub model: ModelSpec,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_warmup_iterations")]
    pub warmup_iterations: u32,
    pub variants: Vec<VariantSpec>,
}

fn default_iterations() -> u32 {
    1000
}

fn default_warmup_iterations() -> u32 {
    50
}

pub fn load_and_validate_plan(path: &Path) -> Result<BenchmarkPlan> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let plan: BenchmarkPlan = serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse yaml in {} at {}: {}",
            path.display(),
            location,
            error
        )
    })?;

    validate_plan(&plan)?;
    Ok(plan)
}

pub fn validate_plan(plan: &BenchmarkPlan) -> Result<()> {
    plan.capture.validate()?;

    if plan.iterations == 0 {
        bail!("iterations must be > 0");
    }
    if plan.model.name.trim().is_empty() {
        bail!("model name cannot be empty");
    }
    if plan.model.num_classes == 0 {
        bail!("model num_classes must be > 0");
    }
    if plan.variants.is_empty() {
        bail!("plan must define at least one variant");
    }

    let mut seen_names = HashSet::with_capacity(plan.variants.len());
    for variant in &plan.variants {
        if variant.name.trim().is_empty() {
            bail!("variant name cannot be empty");
        }
        if !seen_names.insert(variant.name.as_str()) {
            bail!("duplicate variant name '{}'", variant.name);
        }
    }

    // Results are only comparable when each variant enables a superset of
    // the previous variant's flags.
    for pair in plan.variants.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if !cur.config.is_superset_of(&prev.config) {
            bail!(
                "variant '{}' ({:?}) must enable a superset of '{}' ({:?})",
                cur.name,
                cur.config.enabled_flags(),
                prev.name,
                prev.config.enabled_flags()
            );
        }
    }

    Ok(())
}
