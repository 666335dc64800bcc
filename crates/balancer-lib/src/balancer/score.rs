//! Host scoring
//!
//! Assigns each host a composite score; lower scores make better migration
//! targets. Components:
//!
//! - resource: weighted mean of live cpu/mem/storage utilization, blended
//!   with the p90 forecast when history exists
//! - stability: penalty for recent migration churn minus a bonus for
//!   long-settled VMs
//! - capacity: projected headroom, weighted by the aggressiveness preset
//! - cost: how expensive the host is to touch at its current load

use crate::capacity::CapacityAnalyzer;
use crate::config::{AggressivenessProfile, Weights};
use crate::history::MigrationLog;
use crate::models::{Host, HostScore};
use chrono::{DateTime, Duration, Utc};

const RESOURCE_WEIGHT: f64 = 0.4;
const STABILITY_WEIGHT: f64 = 0.2;
const CAPACITY_WEIGHT: f64 = 0.3;
const COST_WEIGHT: f64 = 0.1;

/// Live usage dominates the forecast in the resource blend
const BLEND_CURRENT: f64 = 0.7;
const BLEND_FORECAST: f64 = 0.3;

pub struct HostScorer<'a> {
    weights: Weights,
    aggressiveness: AggressivenessProfile,
    capacity: &'a CapacityAnalyzer,
    history: &'a MigrationLog,
    now: DateTime<Utc>,
}

impl<'a> HostScorer<'a> {
    pub fn new(
        weights: Weights,
        aggressiveness: AggressivenessProfile,
        capacity: &'a CapacityAnalyzer,
        history: &'a MigrationLog,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            weights,
            aggressiveness,
            capacity,
            history,
            now,
        }
    }

    /// Score all hosts, sorted ascending; ties broken by host name so the
    /// ordering is deterministic across cycles.
    pub fn score_hosts(&self, hosts: &[Host]) -> Vec<HostScore> {
        let mut scores: Vec<HostScore> = hosts
            .iter()
            .map(|host| HostScore {
                host: host.name.clone(),
                score: self.score(host),
                cpu_pct: host.cpu.usage_pct,
                mem_pct: host.memory.usage_pct,
                storage_pct: host.storage.usage_pct,
            })
            .collect();

        scores.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.host.cmp(&b.host))
        });
        scores
    }

    pub fn score(&self, host: &Host) -> f64 {
        RESOURCE_WEIGHT * self.resource_score(host)
            + STABILITY_WEIGHT * self.stability_score(host)
            + CAPACITY_WEIGHT * self.capacity_score(host)
            + COST_WEIGHT * self.migration_cost(host)
    }

    /// Weighted mean utilization; cpu and memory components blend the p90
    /// forecast in when the host has usable history.
    fn resource_score(&self, host: &Host) -> f64 {
        let mut cpu = f64::from(host.cpu.usage_pct);
        let mut mem = f64::from(host.memory.usage_pct);
        let storage = f64::from(host.storage.usage_pct);

        if let Some(metrics) = self.capacity.usable(&host.name) {
            let p90 = f64::from(metrics.p90);
            cpu = cpu * BLEND_CURRENT + p90 * BLEND_FORECAST;
            mem = mem * BLEND_CURRENT + p90 * BLEND_FORECAST;
        }

        let total = self.weights.cpu + self.weights.memory + self.weights.storage;
        (cpu * self.weights.cpu + mem * self.weights.memory + storage * self.weights.storage)
            / total
    }

    fn stability_score(&self, host: &Host) -> f64 {
        let recent = self
            .history
            .touching_host(&host.name, Duration::hours(1), self.now);
        let penalty = recent as f64 * 10.0;

        let mut total_age_hours = 0.0;
        let mut aged = 0usize;
        for vm in &host.vms {
            if let Some(moved) = vm.last_migrated {
                total_age_hours += (self.now - moved).num_seconds() as f64 / 3600.0;
                aged += 1;
            }
        }
        let avg_age = if aged > 0 {
            total_age_hours / aged as f64
        } else {
            0.0
        };
        let age_bonus = avg_age.min(24.0) / 24.0 * 20.0;

        penalty - age_bonus
    }

    fn capacity_score(&self, host: &Host) -> f64 {
        let (p90_cpu, p90_mem) = match self.capacity.usable(&host.name) {
            Some(metrics) => (f64::from(metrics.p90), f64::from(metrics.p90)),
            None => (
                f64::from(host.cpu.usage_pct),
                f64::from(host.memory.usage_pct),
            ),
        };
        let headroom = 0.6 * (100.0 - p90_cpu) + 0.4 * (100.0 - p90_mem);
        headroom * self.aggressiveness.capacity_weight
    }

    fn migration_cost(&self, host: &Host) -> f64 {
        let cpu = f64::from(host.cpu.usage_pct);
        let mem = f64::from(host.memory.usage_pct);
        let mut cost = (cpu + mem) / 2.0;
        if cpu > 80.0 || mem > 80.0 {
            cost += 10.0;
        }
        cost
    }
}
