use std::time::Duration;

use serde::Serialize;

/// Latency distribution of one variant's measured cycles, in microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub cycles: usize,
    pub min_us: f64,
    pub mean_us: f64,
    pub p50_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
}

impl LatencySummary {
    /// `None` when no cycles were measured (stream ended before the first
    /// measured iteration).
    pub fn from_durations(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut micros = samples
            .iter()
            .map(|sample| sample.as_secs_f64() * 1e6)
            .collect::<Vec<_>>();
        micros.sort_by(|a, b| a.total_cmp(b));

        let total = micros.iter().sum::<f64>();
        Some(Self {
            cycles: micros.len(),
            min_us: micros[0],
            mean_us: total / micros.len() as f64,
            p50_us: percentile(&micros, 0.50),
            p99_us: percentile(&micros, 0.99),
            max_us: micros[micros.len() - 1],
        })
    }
}

/// Nearest-rank percentile over a sorted sample set.
fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
