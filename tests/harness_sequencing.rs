use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use visionbench::compiler::{CompiledArtifact, InterpCompiler, Model, ModelCompiler};
use visionbench::device::{Device, HostDevice};
use visionbench::driver::BenchmarkDriver;
use visionbench::frame::{CaptureSettings, SyntheticSource};
use visionbench::plan::{BenchmarkPlan, ModelSpec, OptimizationConfig, VariantSpec};
use visionbench::trace::{Color, Profiler};

fn capture_settings() -> CaptureSettings {
    CaptureSettings {
        width: 8,
        height: 6,
        fps: 30,
        buffer_depth: 1,
    }
}

fn plan(iterations: u32, warmup: u32, variants: Vec<VariantSpec>) -> BenchmarkPlan {
    BenchmarkPlan {
        capture: capture_settings(),
        model: ModelSpec {
            name: "probe".to_owned(),
            num_classes: 4,
        },
        iterations,
        warmup_iterations: warmup,
        variants,
    }
}

fn variant(name: &str, config: OptimizationConfig) -> VariantSpec {
    VariantSpec {
        name: name.to_owned(),
        config,
    }
}

fn fused() -> OptimizationConfig {
    OptimizationConfig {
        fuse_operators: true,
        ..OptimizationConfig::default()
    }
}

fn replay() -> OptimizationConfig {
    OptimizationConfig {
        fuse_operators: true,
        static_graph_replay: true,
        ..OptimizationConfig::default()
    }
}

#[derive(Default)]
struct RecordingProfiler {
    events: RefCell<Vec<String>>,
}

impl RecordingProfiler {
    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    /// Every region begin must have a matching end, closed in LIFO order.
    fn assert_balanced(&self) {
        let mut stack = Vec::new();
        for event in self.events.borrow().iter() {
            if let Some(name) = event.strip_prefix('+') {
                stack.push(name.to_owned());
            } else if let Some(name) = event.strip_prefix('-') {
                let open = stack.pop().unwrap_or_else(|| {
                    panic!("region '{name}' closed with nothing open")
                });
                assert_eq!(open, name, "regions closed out of order");
            }
        }
        assert!(stack.is_empty(), "unclosed regions: {stack:?}");
    }
}

impl Profiler for RecordingProfiler {
    fn start_capture(&self) -> Result<()> {
        self.events.borrow_mut().push("start".to_owned());
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        self.events.borrow_mut().push("stop".to_owned());
        Ok(())
    }

    fn region_begin(&self, name: &str, _color: Color) {
        self.events.borrow_mut().push(format!("+{name}"));
    }

    fn region_end(&self, name: &str) {
        self.events.borrow_mut().push(format!("-{name}"));
    }
}

/// Wraps the interpreter backend, recording call order and the device
/// allocation level observed when each compile begins.
struct AuditingCompiler {
    inner: InterpCompiler,
    device: Rc<HostDevice>,
    calls: RefCell<Vec<String>>,
    allocated_at_compile: RefCell<Vec<usize>>,
}

impl AuditingCompiler {
    fn new(device: Rc<HostDevice>) -> Self {
        Self {
            inner: InterpCompiler::new(device.clone() as Rc<dyn Device>),
            device,
            calls: RefCell::new(Vec::new()),
            allocated_at_compile: RefCell::new(Vec::new()),
        }
    }
}

impl ModelCompiler for AuditingCompiler {
    fn reset_cache(&self) {
        self.calls.borrow_mut().push("reset".to_owned());
        self.inner.reset_cache();
    }

    fn compile(
        &self,
        model: &Model,
        config: &OptimizationConfig,
    ) -> Result<Box<dyn CompiledArtifact>> {
        self.calls
            .borrow_mut()
            .push(format!("compile[{}]", config.enabled_flags().join("+")));
        self.allocated_at_compile
            .borrow_mut()
            .push(self.device.allocated_bytes());
        self.inner.compile(model, config)
    }
}

#[test]
fn five_frame_stream_measures_exactly_five_cycles() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(capture_settings()).with_frame_limit(5);

    let plan = plan(1000, 0, vec![variant("baseline", OptimizationConfig::default())]);
    let mut driver = BenchmarkDriver::new(
        device as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    );
    let reports = driver.run_benchmark(&plan, false).expect("benchmark");

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].requested_iterations, 1000);
    assert_eq!(reports[0].measured_cycles, 5);
}

#[test]
fn measured_cycles_equal_requested_when_frames_suffice() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(capture_settings());

    let plan = plan(7, 3, vec![variant("baseline", OptimizationConfig::default())]);
    let mut driver = BenchmarkDriver::new(
        device as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    );
    let reports = driver.run_benchmark(&plan, false).expect("benchmark");

    assert_eq!(reports[0].warmup_cycles, 3);
    assert_eq!(reports[0].measured_cycles, 7);
    assert!(reports[0].latency.is_some());
}

#[test]
fn warmup_cycles_leave_no_trace_in_the_profiling_capture() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(capture_settings());

    let plan = plan(2, 5, vec![variant("baseline", OptimizationConfig::default())]);
    let mut driver = BenchmarkDriver::new(
        device as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    );
    driver.run_benchmark(&plan, false).expect("benchmark");

    let events = profiler.events();
    // Nothing reaches the profiler before the session opens.
    assert_eq!(events.first().map(String::as_str), Some("start"));
    let cycles = events
        .iter()
        .filter(|event| event.starts_with("+cycle_"))
        .count();
    assert_eq!(cycles, 2, "only measured cycles are annotated");
}

#[test]
fn device_memory_returns_to_baseline_before_each_build() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(capture_settings());
    let baseline = device.allocated_bytes();

    let plan = plan(
        3,
        1,
        vec![
            variant("baseline", OptimizationConfig::default()),
            variant("fused", fused()),
            variant("replay", replay()),
        ],
    );
    let mut driver = BenchmarkDriver::new(
        device.clone() as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    );
    driver.run_benchmark(&plan, false).expect("benchmark");

    for observed in compiler.allocated_at_compile.borrow().iter() {
        assert_eq!(
            *observed, baseline,
            "previous variant still held device memory when compile began"
        );
    }
    assert_eq!(device.allocated_bytes(), baseline);
}

#[test]
fn sync_calls_match_each_variant_policy() {
    let settings = capture_settings();

    // Host-sync variant: exactly one sync per measured or warmup inference.
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(settings);
    let plan_host = plan(4, 2, vec![variant("baseline", OptimizationConfig::default())]);
    BenchmarkDriver::new(
        device.clone() as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    )
    .run_benchmark(&plan_host, false)
    .expect("benchmark");
    assert_eq!(device.sync_calls(), 6);

    // Replay variant: the replay protocol syncs internally; zero explicit.
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(settings);
    let plan_replay = plan(4, 2, vec![variant("replay", replay())]);
    BenchmarkDriver::new(
        device.clone() as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    )
    .run_benchmark(&plan_replay, false)
    .expect("benchmark");
    assert_eq!(device.sync_calls(), 0);
}

#[test]
fn regions_are_balanced_and_never_cross_variant_boundaries() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(capture_settings());

    let plan = plan(
        2,
        1,
        vec![
            variant("baseline", OptimizationConfig::default()),
            variant("fused", fused()),
        ],
    );
    BenchmarkDriver::new(
        device as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    )
    .run_benchmark(&plan, false)
    .expect("benchmark");

    profiler.assert_balanced();

    // A variant's cycles appear only inside its own capture window.
    let events = profiler.events();
    let mut window = None;
    for event in &events {
        if let Some(name) = event.strip_prefix("+profile_") {
            window = Some(name.to_owned());
        } else if event.starts_with("-profile_") {
            window = None;
        } else if let Some(name) = event.strip_prefix("+cycle_") {
            assert_eq!(
                window.as_deref(),
                Some(name),
                "cycle annotated outside its variant's window"
            );
        }
    }
}

#[test]
fn second_build_resets_cache_and_compiles_fresh() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(capture_settings());

    let plan = plan(
        1,
        0,
        vec![
            variant("baseline", OptimizationConfig::default()),
            variant("fused", fused()),
        ],
    );
    BenchmarkDriver::new(
        device as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    )
    .run_benchmark(&plan, false)
    .expect("benchmark");

    assert_eq!(
        *compiler.calls.borrow(),
        vec!["reset", "compile[]", "reset", "compile[fuse_operators]"]
    );
    // Reset ran before each compile, so nothing was reused across variants.
    assert_eq!(compiler.inner.cached_signatures().len(), 1);
}

#[test]
fn external_capture_suppresses_all_start_stop_calls() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    let mut source = SyntheticSource::new(capture_settings());

    let plan = plan(
        2,
        1,
        vec![
            variant("baseline", OptimizationConfig::default()),
            variant("fused", fused()),
        ],
    );
    BenchmarkDriver::new(
        device as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    )
    .run_benchmark(&plan, true)
    .expect("benchmark");

    let events = profiler.events();
    assert!(
        events.iter().all(|event| event != "start" && event != "stop"),
        "capture controls leaked through suppression: {events:?}"
    );
    // Regions are still emitted for the external tool to pick up.
    assert!(events.iter().any(|event| event == "+profile_baseline"));
    profiler.assert_balanced();
}

#[test]
fn exhausted_stream_ends_variant_loops_but_not_the_benchmark() {
    let device = Rc::new(HostDevice::new());
    let compiler = AuditingCompiler::new(device.clone());
    let profiler = RecordingProfiler::default();
    // 4 frames total: warmup of the first variant consumes 1, its measured
    // loop 3; later variants see an exhausted stream.
    let mut source = SyntheticSource::new(capture_settings()).with_frame_limit(4);

    let plan = plan(
        10,
        1,
        vec![
            variant("baseline", OptimizationConfig::default()),
            variant("fused", fused()),
        ],
    );
    let reports = BenchmarkDriver::new(
        device as Rc<dyn Device>,
        &compiler,
        &profiler,
        &mut source,
    )
    .run_benchmark(&plan, false)
    .expect("benchmark");

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].warmup_cycles, 1);
    assert_eq!(reports[0].measured_cycles, 3);
    assert_eq!(reports[1].warmup_cycles, 0);
    assert_eq!(reports[1].measured_cycles, 0);
    assert!(reports[1].latency.is_none());
    profiler.assert_balanced();
}
