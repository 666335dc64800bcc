//! Advanced balancing engine
//!
//! Plans migrations from a composite host score that folds in live usage,
//! percentile forecasts from host history, migration churn, and the
//! aggressiveness preset. The plan is bounded to five migrations per cycle
//! and every candidate is validated against the rule engine.
//!
//! Scores are computed once per cycle against the pre-migration snapshot;
//! the large minimum-improvement thresholds and the per-cycle cap bound the
//! staleness this introduces. Anti-affinity is additionally checked against
//! the tentative occupancy of migrations already emitted in the same cycle,
//! so one plan never stacks two group members onto one target.

use super::score::HostScorer;
use super::{
    collect_vms, exceeds_thresholds, filter_available, summarize, Balancer, CyclePhase, RunGate,
    MAX_MIGRATIONS_PER_CYCLE,
};
use crate::capacity::CapacityAnalyzer;
use crate::config::Config;
use crate::history::MigrationLog;
use crate::models::{
    BalancingOutcome, CapacityMetrics, ClusterSummary, Host, HostScore, LoadProfile, Migration,
    MigrationRecord, MigrationStatus, Vm, VmStatus,
};
use crate::platform::{PlatformClient, Timeframe};
use crate::profile::WorkloadProfiler;
use crate::rules::RuleEngine;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A VM moved (by us or otherwise) within this window stays put
const VM_COOLDOWN: ChronoDuration = ChronoDuration::hours(1);

const MIGRATION_REASON: &str = "load_balancing";

pub struct AdvancedBalancer {
    client: Arc<dyn PlatformClient>,
    config: Arc<Config>,
    rules: RuleEngine,
    history: MigrationLog,
    profiler: WorkloadProfiler,
    capacity: CapacityAnalyzer,
    last_run: Option<DateTime<Utc>>,
    phase: CyclePhase,
    gate: RunGate,
}

impl AdvancedBalancer {
    pub fn new(client: Arc<dyn PlatformClient>, config: Arc<Config>, gate: RunGate) -> Self {
        Self {
            client,
            config,
            rules: RuleEngine::new(),
            history: MigrationLog::new(),
            profiler: WorkloadProfiler::new(),
            capacity: CapacityAnalyzer::new(),
            last_run: None,
            phase: CyclePhase::Idle,
            gate,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn capacity_metrics(&self, host: &str) -> Option<&CapacityMetrics> {
        self.capacity.get(host)
    }

    pub fn predict_usage(&self, host: &str, horizon: Duration) -> f64 {
        self.capacity.predict(host, horizon)
    }

    pub fn capacity_recommendations(&self, host: &str, detailed: bool) -> Vec<String> {
        self.capacity.recommendations(host, detailed)
    }

    pub fn load_profile(&self, vm_id: u32) -> Option<&LoadProfile> {
        self.profiler.get(vm_id)
    }

    async fn cycle(&mut self, force: bool) -> Result<Vec<BalancingOutcome>> {
        let now = Utc::now();

        self.phase = CyclePhase::Snapshotting;
        let hosts = self.client.list_hosts().await.context("failed to snapshot cluster")?;
        let available = filter_available(&hosts, &self.config.cluster.maintenance_hosts);
        if available.len() < 2 {
            bail!(
                "insufficient available hosts for balancing ({} of {})",
                available.len(),
                hosts.len()
            );
        }

        // Group membership must see the whole cluster, including hosts that
        // cannot participate as sources or targets.
        let all_vms = collect_vms(&hosts);
        self.rules.ingest(&all_vms);

        self.phase = CyclePhase::Analyzing;
        if self.config.balancing.load_profiles.enabled {
            self.refresh_profiles(&available).await;
        }
        if self.config.balancing.capacity.enabled {
            self.refresh_capacity(&available).await;
        }

        let overloaded = available
            .iter()
            .filter(|h| exceeds_thresholds(h, &self.config.balancing.thresholds))
            .count();
        if !force && overloaded == 0 {
            debug!("no host exceeds thresholds, nothing to balance");
            return Ok(vec![]);
        }

        let aggressiveness = self.config.balancing.aggressiveness.profile();
        if !force {
            if let Some(last) = self.last_run {
                let floor = ChronoDuration::from_std(aggressiveness.cooldown)
                    .unwrap_or_else(|_| ChronoDuration::hours(4));
                if now - last < floor {
                    debug!(last_run = %last, "inter-cycle cooldown active, skipping");
                    return Ok(vec![]);
                }
            }
        }

        self.phase = CyclePhase::Planning;
        let scorer = HostScorer::new(
            self.config.balancing.weights,
            aggressiveness,
            &self.capacity,
            &self.history,
            now,
        );
        let scores = scorer.score_hosts(&available);
        let plan = self.plan_migrations(&available, &scores, aggressiveness.min_improvement, now);
        if plan.is_empty() {
            debug!("planner produced an empty plan");
            self.last_run = Some(now);
            return Ok(vec![]);
        }

        self.phase = CyclePhase::Executing;
        let score_by_host: HashMap<&str, f64> =
            scores.iter().map(|s| (s.host.as_str(), s.score)).collect();
        let outcomes = self.execute(plan, &score_by_host).await;

        self.history.prune(Utc::now());
        self.last_run = Some(now);
        Ok(outcomes)
    }

    async fn refresh_profiles(&mut self, hosts: &[Host]) {
        self.profiler.clear();
        let timeframe = Timeframe::for_horizon(self.config.balancing.load_profiles.window);
        for host in hosts {
            for vm in &host.vms {
                if vm.status != VmStatus::Running {
                    continue;
                }
                // One VM's history failure never affects the rest.
                let samples = match self
                    .client
                    .vm_history(&host.name, vm.id, vm.kind, timeframe)
                    .await
                {
                    Ok(samples) => samples,
                    Err(err) => {
                        debug!(vm = %vm.name, error = %err, "VM history unavailable, profiling from live usage");
                        vec![]
                    }
                };
                self.profiler.analyze(vm, &samples);
            }
        }
    }

    async fn refresh_capacity(&mut self, hosts: &[Host]) {
        let timeframe = Timeframe::for_horizon(self.config.balancing.capacity.forecast);
        for host in hosts {
            match self.client.host_history(&host.name, timeframe).await {
                Ok(samples) => self.capacity.observe_history(&host.name, &samples),
                Err(err) => {
                    debug!(host = %host.name, error = %err, "host history unavailable, using live usage");
                    self.capacity.observe_current(&host.name, host.cpu.usage_pct);
                }
            }
        }
    }

    fn plan_migrations(
        &self,
        available: &[Host],
        scores: &[HostScore],
        min_improvement: f64,
        now: DateTime<Utc>,
    ) -> Vec<Migration> {
        let score_by_host: HashMap<&str, f64> =
            scores.iter().map(|s| (s.host.as_str(), s.score)).collect();
        let mut plan: Vec<Migration> = Vec::new();
        // (vm, target) pairs already emitted this cycle, for anti-affinity.
        let mut tentative: Vec<(u32, String)> = Vec::new();

        for source in available
            .iter()
            .filter(|h| exceeds_thresholds(h, &self.config.balancing.thresholds))
        {
            for vm in &source.vms {
                if vm.status != VmStatus::Running {
                    continue;
                }
                if let Some(moved) = vm.last_migrated {
                    if now - moved < VM_COOLDOWN {
                        debug!(vm = %vm.name, "per-VM cooldown active");
                        continue;
                    }
                }
                if self.history.moved_within(vm.id, VM_COOLDOWN, now) {
                    debug!(vm = %vm.name, "recently migrated, anti-flip-flop applies");
                    continue;
                }

                let Some(target) = self.pick_target(vm, &source.name, scores, &tentative) else {
                    continue;
                };

                let gain = score_by_host
                    .get(source.name.as_str())
                    .zip(score_by_host.get(target.as_str()))
                    .map(|(src, dst)| src - dst)
                    .unwrap_or(0.0);
                if gain < min_improvement {
                    debug!(
                        vm = %vm.name,
                        gain,
                        min_improvement,
                        "improvement below threshold, skipping"
                    );
                    continue;
                }

                tentative.push((vm.id, target.clone()));
                plan.push(Migration {
                    vm: vm.clone(),
                    from_host: source.name.clone(),
                    to_host: target,
                    status: MigrationStatus::Pending,
                    start_time: now,
                    end_time: None,
                    error: None,
                });

                if plan.len() >= MAX_MIGRATIONS_PER_CYCLE {
                    return plan;
                }
            }
        }
        plan
    }

    /// Best-scored host that passes rule validation and does not collide
    /// with a same-group move already planned this cycle.
    fn pick_target(
        &self,
        vm: &Vm,
        source: &str,
        scores: &[HostScore],
        tentative: &[(u32, String)],
    ) -> Option<String> {
        let peers = self.rules.anti_affinity_peers(vm.id);
        for candidate in scores.iter().filter(|s| s.host != source) {
            if let Err(err) = self.rules.validate_placement(vm, &candidate.host) {
                debug!(vm = %vm.name, target = %candidate.host, reason = %err, "placement rejected");
                continue;
            }
            let occupied = tentative
                .iter()
                .any(|(id, host)| peers.contains(id) && host == &candidate.host);
            if occupied {
                debug!(vm = %vm.name, target = %candidate.host, "anti-affinity peer already planned for target");
                continue;
            }
            return Some(candidate.host.clone());
        }
        None
    }

    async fn execute(
        &mut self,
        plan: Vec<Migration>,
        scores: &HashMap<&str, f64>,
    ) -> Vec<BalancingOutcome> {
        let total = plan.len();
        let mut outcomes = Vec::with_capacity(total);

        for mut migration in plan {
            if !self.gate.is_open() {
                info!(
                    executed = outcomes.len(),
                    planned = total,
                    "cycle cancelled between migrations"
                );
                break;
            }

            migration.status = MigrationStatus::Running;
            let gain = scores
                .get(migration.from_host.as_str())
                .zip(scores.get(migration.to_host.as_str()))
                .map(|(src, dst)| src - dst)
                .unwrap_or(0.0);

            let result = self
                .client
                .migrate(migration.vm.id, &migration.from_host, &migration.to_host)
                .await;
            let finished = Utc::now();
            migration.end_time = Some(finished);

            match result {
                Ok(()) => {
                    migration.status = MigrationStatus::Succeeded;
                    info!(
                        vm = %migration.vm.name,
                        vm_id = migration.vm.id,
                        from = %migration.from_host,
                        to = %migration.to_host,
                        gain,
                        "migration succeeded"
                    );
                    self.history.record(MigrationRecord {
                        vm_id: migration.vm.id,
                        from_host: migration.from_host.clone(),
                        to_host: migration.to_host.clone(),
                        timestamp: finished,
                        reason: MIGRATION_REASON.to_string(),
                    });
                    outcomes.push(BalancingOutcome {
                        vm: migration.vm,
                        from_host: migration.from_host,
                        to_host: migration.to_host,
                        reason: MIGRATION_REASON.to_string(),
                        resource_gain: gain,
                        timestamp: finished,
                        success: true,
                        error: None,
                    });
                }
                Err(err) => {
                    // One failed migration does not abort the plan.
                    migration.status = MigrationStatus::Failed;
                    warn!(
                        vm = %migration.vm.name,
                        vm_id = migration.vm.id,
                        from = %migration.from_host,
                        to = %migration.to_host,
                        error = %err,
                        "migration failed"
                    );
                    outcomes.push(BalancingOutcome {
                        vm: migration.vm,
                        from_host: migration.from_host,
                        to_host: migration.to_host,
                        reason: MIGRATION_REASON.to_string(),
                        resource_gain: gain,
                        timestamp: finished,
                        success: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        outcomes
    }
}

#[async_trait]
impl Balancer for AdvancedBalancer {
    async fn run(&mut self, force: bool) -> Result<Vec<BalancingOutcome>> {
        let result = self.cycle(force).await;
        self.phase = CyclePhase::Idle;
        result
    }

    async fn summary(&self) -> Result<ClusterSummary> {
        let hosts = self.client.list_hosts().await?;
        Ok(summarize(
            &hosts,
            &self.config.cluster.maintenance_hosts,
            self.last_run,
        ))
    }
}
