//! Workload profiling
//!
//! Classifies each running VM's load pattern from its historical samples and
//! derives priority and criticality from tags and the CPU pattern. Profiles
//! are advisory: the planner surfaces them through operator tooling and the
//! derivation never fails a cycle.

use crate::capacity::percentiles;
use crate::models::{
    CpuPattern, CpuPatternKind, Criticality, LoadProfile, MemoryPattern, MemoryPatternKind,
    Priority, Sample, StoragePattern, StoragePatternKind, Vm,
};
use std::collections::HashMap;

/// Mean CPU below this is an idle workload
const IDLE_MEAN_PCT: f32 = 5.0;
/// Sustained workloads above this level are treated as realtime
const REALTIME_SUSTAINED_PCT: f32 = 70.0;

#[derive(Debug, Default)]
pub struct WorkloadProfiler {
    profiles: HashMap<u32, LoadProfile>,
}

impl WorkloadProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and store the profile of one VM. `samples` may be empty, in
    /// which case patterns fall back to a sustained estimate from live CPU.
    pub fn analyze(&mut self, vm: &Vm, samples: &[Sample]) -> &LoadProfile {
        let cpu = classify_cpu(vm, samples);
        let memory = classify_memory(samples);
        let storage = StoragePattern {
            kind: StoragePatternKind::Mixed,
        };

        let priority = derive_priority(vm, &cpu);
        let criticality = derive_criticality(vm, priority);

        self.profiles.insert(
            vm.id,
            LoadProfile {
                cpu,
                memory,
                storage,
                priority,
                criticality,
            },
        );
        &self.profiles[&vm.id]
    }

    pub fn get(&self, vm_id: u32) -> Option<&LoadProfile> {
        self.profiles.get(&vm_id)
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
    }
}

fn classify_cpu(vm: &Vm, samples: &[Sample]) -> CpuPattern {
    if samples.is_empty() {
        return CpuPattern {
            kind: CpuPatternKind::Sustained,
            sustained_level: vm.cpu_pct,
        };
    }

    let values: Vec<f32> = samples.iter().map(|s| s.cpu_pct as f32).collect();
    let m = percentiles(&values);

    let kind = if m.mean < IDLE_MEAN_PCT {
        CpuPatternKind::Idle
    } else if m.stddev > 0.5 * m.mean {
        CpuPatternKind::Burst
    } else {
        CpuPatternKind::Sustained
    };

    CpuPattern {
        kind,
        sustained_level: m.p90,
    }
}

fn classify_memory(samples: &[Sample]) -> MemoryPattern {
    if samples.len() < 2 {
        return MemoryPattern {
            kind: MemoryPatternKind::Static,
            growth_pct_per_hour: 0.0,
        };
    }

    let values: Vec<f64> = samples.iter().map(|s| s.memory).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return MemoryPattern {
            kind: MemoryPatternKind::Static,
            growth_pct_per_hour: 0.0,
        };
    }
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    let stddev = variance.sqrt();

    let span = samples.last().unwrap().timestamp - samples.first().unwrap().timestamp;
    let hours = (span.num_seconds() as f64 / 3600.0).max(1.0 / 60.0);
    let growth_pct_per_hour =
        regression_slope(&values) * (values.len() as f64 - 1.0) / hours / mean * 100.0;

    let kind = if stddev / mean > 0.2 {
        MemoryPatternKind::Volatile
    } else if growth_pct_per_hour > 1.0 {
        MemoryPatternKind::Growing
    } else {
        MemoryPatternKind::Static
    };

    MemoryPattern {
        kind,
        growth_pct_per_hour: growth_pct_per_hour as f32,
    }
}

/// Least-squares slope of `values` over their indices.
fn regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64) * (i as f64)).sum();

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

fn derive_priority(vm: &Vm, cpu: &CpuPattern) -> Priority {
    for tag in &vm.tags {
        match tag.trim() {
            "realtime" | "critical" | "high-priority" => return Priority::Realtime,
            "interactive" | "user-facing" => return Priority::Interactive,
            "background" | "batch" | "low-priority" => return Priority::Background,
            _ => {}
        }
    }

    match cpu.kind {
        CpuPatternKind::Sustained if cpu.sustained_level > REALTIME_SUSTAINED_PCT => {
            Priority::Realtime
        }
        CpuPatternKind::Burst => Priority::Interactive,
        _ => Priority::Background,
    }
}

fn derive_criticality(vm: &Vm, priority: Priority) -> Criticality {
    for tag in &vm.tags {
        match tag.trim() {
            "critical" | "essential" => return Criticality::Critical,
            "important" | "production" => return Criticality::Important,
            _ => {}
        }
    }

    match priority {
        Priority::Realtime => Criticality::Critical,
        Priority::Interactive => Criticality::Important,
        Priority::Background => Criticality::Normal,
    }
}
