use std::rc::Rc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use crate::compiler::{Model, ModelCompiler};
use crate::device::Device;
use crate::executor::{run_cycle, InferenceExecutor};
use crate::frame::FrameSource;
use crate::plan::BenchmarkPlan;
use crate::preprocess::Preprocessor;
use crate::stats::LatencySummary;
use crate::trace::{Profiler, ProfilingSession};
use crate::variant::VariantBuilder;
use crate::warmup::run_warmup;

/// Outcome of one variant's measured run.
#[derive(Debug, Clone, Serialize)]
pub struct VariantReport {
    pub name: String,
    pub requested_iterations: u32,
    pub warmup_cycles: u32,
    pub measured_cycles: u32,
    pub latency: Option<LatencySummary>,
}

/// Top-level sequencer. For each variant in plan order: build, warm up,
/// bracket a profiling session, run measured cycles, close the session,
/// dispose, advance. Strictly sequential; exactly one variant is ever ready
/// at a time.
pub struct BenchmarkDriver<'a> {
    device: Rc<dyn Device>,
    compiler: &'a dyn ModelCompiler,
    profiler: &'a dyn Profiler,
    source: &'a mut dyn FrameSource,
}

impl<'a> BenchmarkDriver<'a> {
    pub fn new(
        device: Rc<dyn Device>,
        compiler: &'a dyn ModelCompiler,
        profiler: &'a dyn Profiler,
        source: &'a mut dyn FrameSource,
    ) -> Self {
        Self {
            device,
            compiler,
            profiler,
            source,
        }
    }

    /// Run the whole plan. `external_capture` means an outer tool already
    /// brackets the run, so per-variant sessions keep their start/stop away
    /// from the profiler collaborator.
    ///
    /// End-of-stream ends the current variant's measured loop, never the
    /// benchmark; a compiler failure aborts everything.
    pub fn run_benchmark(
        &mut self,
        plan: &BenchmarkPlan,
        external_capture: bool,
    ) -> Result<Vec<VariantReport>> {
        let preprocessor = Preprocessor::new(Rc::clone(&self.device));
        let executor = InferenceExecutor::new(Rc::clone(&self.device));
        let mut builder = VariantBuilder::new(self.compiler, Model::from_spec(&plan.model));

        let mut reports = Vec::with_capacity(plan.variants.len());
        for spec in &plan.variants {
            // The guard returned by build keeps the builder borrowed until
            // the variant is dropped at the bottom of this block, so the
            // next build cannot start while this artifact holds device
            // memory.
            let variant = builder.build(&spec.name, &spec.config)?;

            let warmup_cycles = run_warmup(
                self.source,
                &preprocessor,
                &executor,
                &variant,
                plan.warmup_iterations,
            )?;

            let session = ProfilingSession::start(self.profiler, variant.name(), external_capture)?;
            let mut samples = Vec::with_capacity(plan.iterations as usize);
            for _ in 0..plan.iterations {
                let started = Instant::now();
                if !run_cycle(
                    self.source,
                    &preprocessor,
                    &executor,
                    &variant,
                    self.profiler,
                )? {
                    break;
                }
                samples.push(started.elapsed());
            }
            session.stop()?;

            let measured_cycles = samples.len() as u32;
            eprintln!(
                "variant {}: warmed {} cycle(s), measured {}/{}",
                variant.name(),
                warmup_cycles,
                measured_cycles,
                plan.iterations
            );

            reports.push(VariantReport {
                name: spec.name.clone(),
                requested_iterations: plan.iterations,
                warmup_cycles,
                measured_cycles,
                latency: LatencySummary::from_durations(&samples),
            });

            drop(variant);
        }

        Ok(reports)
    }
}
