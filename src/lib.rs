//! visionbench: latency benchmarking harness for real-time vision inference
//! pipelines.
//!
//! Runs a ladder of optimization variants of one model (baseline, compiled,
//! fused, static-graph replay) through repeated capture → preprocess → infer
//! cycles, with warmup before measurement, scoped build/dispose of each
//! compiled artifact, and per-variant profiling brackets for an external
//! capture tool. The compiler, capture hardware, accelerator, and profiler
//! are collaborators behind traits; reference implementations let the
//! harness run end-to-end without any of them attached.

pub mod compiler;
pub mod device;
pub mod driver;
pub mod executor;
pub mod frame;
pub mod plan;
pub mod preprocess;
pub mod stats;
pub mod trace;
pub mod variant;
pub mod warmup;
