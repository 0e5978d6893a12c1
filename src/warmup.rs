use anyhow::Result;

use crate::executor::{run_cycle, InferenceExecutor};
use crate::frame::FrameSource;
use crate::preprocess::Preprocessor;
use crate::trace::NullProfiler;
use crate::variant::ModelVariant;

/// Run untimed cycles until deferred compilation, kernel autotuning, and
/// cache population have settled, so measured iterations see steady-state
/// cost only. No profiling instrumentation is attached and no result is
/// reported. Ends early, without error, if the source runs out of frames.
///
/// Returns the number of cycles actually completed.
pub fn run_warmup(
    source: &mut dyn FrameSource,
    preprocessor: &Preprocessor,
    executor: &InferenceExecutor,
    variant: &ModelVariant,
    iterations: u32,
) -> Result<u32> {
    let profiler = NullProfiler;
    for completed in 0..iterations {
        if !run_cycle(source, preprocessor, executor, variant, &profiler)? {
            return Ok(completed);
        }
    }
    Ok(iterations)
}
