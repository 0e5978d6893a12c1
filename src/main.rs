use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use visionbench::compiler::InterpCompiler;
use visionbench::device::{Device, HostDevice};
use visionbench::driver::BenchmarkDriver;
use visionbench::frame::SyntheticSource;
use visionbench::plan::load_and_validate_plan;
use visionbench::trace::{LogProfiler, NullProfiler, Profiler};

#[derive(Debug, Parser)]
#[command(name = "visionbench")]
#[command(about = "Latency benchmark for vision inference optimization variants")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the benchmark described by a plan file.
    Bench {
        plan: PathBuf,
        /// Override the plan's measured iteration count.
        #[arg(long)]
        iterations: Option<u32>,
        /// Limit the synthetic frame source to this many frames.
        #[arg(long)]
        frames: Option<u64>,
        /// The run is wrapped by an external profiler; suppress internal
        /// capture start/stop brackets.
        #[arg(long)]
        external_capture: bool,
        /// Echo region begin/end events to stderr.
        #[arg(long)]
        trace_regions: bool,
        /// Write the per-variant reports as JSON.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Validate a plan file and summarize it.
    Check { plan: PathBuf },
}

const fn version_string() -> &'static str {
    match option_env!("VISIONBENCH_GIT_HASH") {
        Some(hash) => hash,
        None => env!("CARGO_PKG_VERSION"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            plan,
            iterations,
            frames,
            external_capture,
            trace_regions,
            output,
        } => run_bench(
            &plan,
            iterations,
            frames,
            external_capture,
            trace_regions,
            output.as_deref(),
        ),
        Commands::Check { plan } => run_check(&plan),
    }
}

fn run_check(plan_path: &Path) -> Result<()> {
    let plan = load_and_validate_plan(plan_path)?;

    println!(
        "OK: {} ({}x{} @ {} fps, {} iterations, warmup {})",
        plan_path.display(),
        plan.capture.width,
        plan.capture.height,
        plan.capture.fps,
        plan.iterations,
        plan.warmup_iterations
    );
    for variant in &plan.variants {
        let flags = variant.config.enabled_flags();
        let flags = if flags.is_empty() {
            "no flags".to_owned()
        } else {
            flags.join(", ")
        };
        println!("  {} [{}]", variant.name, flags);
    }
    Ok(())
}

fn run_bench(
    plan_path: &Path,
    iterations: Option<u32>,
    frames: Option<u64>,
    external_capture: bool,
    trace_regions: bool,
    output: Option<&Path>,
) -> Result<()> {
    let mut plan = load_and_validate_plan(plan_path)?;
    if let Some(iterations) = iterations {
        plan.iterations = iterations;
    }

    let device: Rc<dyn Device> = Rc::new(HostDevice::new());
    let compiler = InterpCompiler::new(Rc::clone(&device));
    let null = NullProfiler;
    let log = LogProfiler::new();
    let profiler: &dyn Profiler = if trace_regions { &log } else { &null };

    let mut source = SyntheticSource::new(plan.capture);
    if let Some(frames) = frames {
        source = source.with_frame_limit(frames);
    }

    let mut driver = BenchmarkDriver::new(device, &compiler, profiler, &mut source);
    let reports = driver.run_benchmark(&plan, external_capture)?;

    for report in &reports {
        match &report.latency {
            Some(latency) => println!(
                "{}: {} cycle(s), min {:.1}us, mean {:.1}us, p50 {:.1}us, p99 {:.1}us, max {:.1}us",
                report.name,
                report.measured_cycles,
                latency.min_us,
                latency.mean_us,
                latency.p50_us,
                latency.p99_us,
                latency.max_us
            ),
            None => println!("{}: no cycles measured (stream ended early)", report.name),
        }
    }

    if let Some(output) = output {
        let json = serde_json::to_string_pretty(&reports)?;
        fs::write(output, json)
            .with_context(|| format!("failed to write report {}", output.display()))?;
        println!("Wrote {}", output.display());
    }

    Ok(())
}
