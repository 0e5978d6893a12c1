use std::rc::Rc;

use anyhow::Result;

use crate::device::{Device, Tensor};
use crate::frame::FrameSource;
use crate::preprocess::Preprocessor;
use crate::trace::{region, Color, Profiler};
use crate::variant::{ModelVariant, SyncPolicy};

/// Runs one forward pass under the variant's synchronization policy.
pub struct InferenceExecutor {
    device: Rc<dyn Device>,
}

impl InferenceExecutor {
    pub fn new(device: Rc<dyn Device>) -> Self {
        Self { device }
    }

    /// Execute one inference inside a region named after the variant.
    ///
    /// Non-replay variants get exactly one explicit host sync after the
    /// call, so the region bounds device completion rather than kernel
    /// submission. Replay variants get none: the replay protocol already
    /// synchronized, and skipping the sync here is what keeps their
    /// measured latency honest rather than double-counted.
    pub fn run(&self, variant: &ModelVariant, input: &Tensor, profiler: &dyn Profiler) -> Result<()> {
        let _region = region(
            profiler,
            &format!("infer_{}", variant.name()),
            Color::Red,
        );

        let output = variant.forward(input)?;
        match variant.sync_policy() {
            SyncPolicy::HostSync => self.device.synchronize()?,
            SyncPolicy::ReplayInternal => {}
        }
        drop(output);
        Ok(())
    }
}

/// One full capture → preprocess → infer cycle. Returns `Ok(false)` when the
/// source signals end-of-stream, which ends the current variant's loop but
/// is never an error.
pub fn run_cycle(
    source: &mut dyn FrameSource,
    preprocessor: &Preprocessor,
    executor: &InferenceExecutor,
    variant: &ModelVariant,
    profiler: &dyn Profiler,
) -> Result<bool> {
    let _cycle = region(
        profiler,
        &format!("cycle_{}", variant.name()),
        Color::Blue,
    );

    let frame = {
        let _capture = region(profiler, "capture", Color::Green);
        source.capture()?
    };
    let Some(frame) = frame else {
        return Ok(false);
    };

    let tensor = preprocessor.transform(&frame, variant.preferred_layout(), profiler)?;
    executor.run(variant, &tensor, profiler)?;
    Ok(true)
}
