//! Capacity analysis from historical utilization samples
//!
//! Computes per-host percentile metrics over the CPU series and projects
//! future usage from them. An empty series yields all-zero metrics; scoring
//! treats a zero p90 as "no history" and falls back to live usage.

use crate::models::{CapacityMetrics, Sample};
use std::collections::HashMap;
use std::time::Duration;

/// Percentile metrics over a sample array.
///
/// The index for percentile `p` is `round((n - 1) * p)` clamped to the
/// array bounds; `min_p90` uses p = 0.10 and `max_p90` uses p = 0.90.
pub fn percentiles(values: &[f32]) -> CapacityMetrics {
    if values.is_empty() {
        return CapacityMetrics::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();

    let at = |p: f64| -> f32 {
        let idx = ((n - 1) as f64 * p).round() as usize;
        sorted[idx.min(n - 1)]
    };

    let mean = sorted.iter().sum::<f32>() / n as f32;
    let variance = sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;

    CapacityMetrics {
        p50: at(0.5),
        p90: at(0.9),
        p95: at(0.95),
        p99: at(0.99),
        min_p90: at(0.1),
        max_p90: at(0.9),
        mean,
        stddev: variance.sqrt(),
    }
}

/// Per-host capacity metrics, replaced each cycle
#[derive(Debug, Default)]
pub struct CapacityAnalyzer {
    metrics: HashMap<String, CapacityMetrics>,
}

impl CapacityAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the metrics of `host` from its historical CPU series.
    pub fn observe_history(&mut self, host: &str, samples: &[Sample]) {
        let cpu: Vec<f32> = samples.iter().map(|s| s.cpu_pct as f32).collect();
        self.metrics.insert(host.to_string(), percentiles(&cpu));
    }

    /// Degraded-mode fallback: a single-sample series from live usage, so
    /// the host stays scoreable when history is unavailable.
    pub fn observe_current(&mut self, host: &str, cpu_pct: f32) {
        self.metrics.insert(host.to_string(), percentiles(&[cpu_pct]));
    }

    pub fn get(&self, host: &str) -> Option<&CapacityMetrics> {
        self.metrics.get(host)
    }

    /// Metrics usable for predictive scoring; a zero p90 means no history.
    pub fn usable(&self, host: &str) -> Option<&CapacityMetrics> {
        self.metrics.get(host).filter(|m| m.p90 > 0.0)
    }

    /// Project CPU usage over `horizon`:
    /// `p90 * (1 + stddev/100 * 0.1) * (1 + weeks * 0.05)`, capped at 100.
    pub fn predict(&self, host: &str, horizon: Duration) -> f64 {
        let Some(metrics) = self.metrics.get(host) else {
            return 0.0;
        };
        let variability = 1.0 + f64::from(metrics.stddev) / 100.0 * 0.1;
        let weeks = horizon.as_secs_f64() / 3600.0 / 168.0;
        let growth = 1.0 + weeks * 0.05;
        (f64::from(metrics.p90) * variability * growth).min(100.0)
    }

    /// Textual capacity recommendations for operator tooling.
    pub fn recommendations(&self, host: &str, detailed: bool) -> Vec<String> {
        let Some(m) = self.metrics.get(host) else {
            return vec!["No historical data available for recommendations".to_string()];
        };
        let mut out = Vec::new();

        if m.p90 > 90.0 {
            out.push("High p90 usage (>90%): add resources or redistribute VMs".to_string());
        } else if m.p90 > 80.0 {
            out.push("Elevated p90 usage (>80%): monitor closely and plan expansion".to_string());
        } else if m.p90 < 30.0 {
            out.push("Low p90 usage (<30%): consider consolidating VMs".to_string());
        }

        if m.stddev > 20.0 {
            out.push("High variability: provision headroom for bursts".to_string());
        } else if m.stddev < 5.0 {
            out.push("Low variability: allocation can be tightened".to_string());
        }

        if detailed {
            if m.p95 > 95.0 {
                out.push("Critical p95 usage (>95%): immediate action required".to_string());
            }
            if m.p99 > 98.0 {
                out.push("Extreme p99 usage (>98%): emergency capacity planning needed".to_string());
            }
            if m.p90 > m.p50 * 1.5 {
                out.push("High p90/p50 ratio: workload is burst-dominated".to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn samples(cpu: &[f64]) -> Vec<Sample> {
        cpu.iter()
            .map(|&c| Sample {
                timestamp: Utc::now(),
                cpu_pct: c,
                memory: 0.0,
                load_avg: 0.0,
            })
            .collect()
    }

    #[test]
    fn percentiles_on_even_decade() {
        let values: Vec<f32> = (1..=10).map(|v| (v * 10) as f32).collect();
        let m = percentiles(&values);
        assert_eq!(m.p50, 60.0);
        assert_eq!(m.p90, 90.0);
        assert_eq!(m.p95, 100.0);
        assert_eq!(m.p99, 100.0);
        assert_eq!(m.min_p90, 20.0);
        assert_eq!(m.max_p90, 90.0);
        assert_eq!(m.mean, 55.0);
    }

    #[test]
    fn percentile_ordering_holds() {
        let values = vec![3.0, 45.0, 12.0, 88.0, 9.0, 61.0, 27.0];
        let m = percentiles(&values);
        assert!(m.p50 <= m.p90);
        assert!(m.p90 <= m.p95);
        assert!(m.p95 <= m.p99);
        assert!(m.p99 <= 88.0);
        assert!(m.min_p90 >= 3.0);
    }

    #[test]
    fn empty_series_is_all_zero() {
        let m = percentiles(&[]);
        assert_eq!(m, CapacityMetrics::default());
    }

    #[test]
    fn single_sample_series() {
        let m = percentiles(&[42.0]);
        assert_eq!(m.p50, 42.0);
        assert_eq!(m.p99, 42.0);
        assert_eq!(m.mean, 42.0);
        assert_eq!(m.stddev, 0.0);
    }

    #[test]
    fn analyzer_fallback_keeps_host_scoreable() {
        let mut analyzer = CapacityAnalyzer::new();
        analyzer.observe_current("a", 55.0);
        assert_eq!(analyzer.usable("a").unwrap().p90, 55.0);
    }

    #[test]
    fn empty_history_is_not_usable() {
        let mut analyzer = CapacityAnalyzer::new();
        analyzer.observe_history("a", &[]);
        assert!(analyzer.get("a").is_some());
        assert!(analyzer.usable("a").is_none());
    }

    #[test]
    fn prediction_scales_with_horizon() {
        let mut analyzer = CapacityAnalyzer::new();
        analyzer.observe_history("a", &samples(&[50.0, 50.0, 50.0, 50.0]));

        let week = analyzer.predict("a", Duration::from_secs(7 * 24 * 3600));
        // p90 = 50, stddev = 0, one week of 5% growth.
        assert!((week - 52.5).abs() < 1e-6);

        let now = analyzer.predict("a", Duration::ZERO);
        assert!((now - 50.0).abs() < 1e-6);
    }

    #[test]
    fn prediction_is_capped_at_hundred() {
        let mut analyzer = CapacityAnalyzer::new();
        analyzer.observe_current("a", 99.0);
        let far = analyzer.predict("a", Duration::from_secs(52 * 7 * 24 * 3600));
        assert_eq!(far, 100.0);
    }

    #[test]
    fn prediction_without_metrics_is_zero() {
        let analyzer = CapacityAnalyzer::new();
        assert_eq!(analyzer.predict("missing", Duration::from_secs(3600)), 0.0);
    }

    #[test]
    fn recommendations_reflect_usage() {
        let mut analyzer = CapacityAnalyzer::new();
        analyzer.observe_current("hot", 95.0);
        let recs = analyzer.recommendations("hot", false);
        assert!(recs.iter().any(|r| r.contains("p90")));

        assert_eq!(
            analyzer.recommendations("missing", false),
            vec!["No historical data available for recommendations".to_string()]
        );
    }
}
