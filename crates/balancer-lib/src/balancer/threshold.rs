//! Legacy threshold balancer
//!
//! A single-score planner kept behind
//! `balancing.balancer_type = "threshold"`. Hosts are scored by normalized
//! weighted utilization alone; any positive improvement justifies a move.
//! No migration history, cooldowns, or capacity forecasts are involved.

use super::{
    collect_vms, exceeds_thresholds, filter_available, summarize, Balancer, RunGate,
};
use crate::config::Config;
use crate::models::{BalancingOutcome, ClusterSummary, Host, Migration, MigrationStatus, Vm};
use crate::platform::PlatformClient;
use crate::rules::RuleEngine;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIGRATION_REASON: &str = "load balancing";

pub struct ThresholdBalancer {
    client: Arc<dyn PlatformClient>,
    config: Arc<Config>,
    rules: RuleEngine,
    last_run: Option<DateTime<Utc>>,
    gate: RunGate,
}

impl ThresholdBalancer {
    pub fn new(client: Arc<dyn PlatformClient>, config: Arc<Config>, gate: RunGate) -> Self {
        Self {
            client,
            config,
            rules: RuleEngine::new(),
            last_run: None,
            gate,
        }
    }

    /// Normalized weighted utilization in [0, 1]; lower is better.
    fn score(&self, host: &Host) -> f64 {
        let w = &self.config.balancing.weights;
        let weighted = f64::from(host.cpu.usage_pct) / 100.0 * w.cpu
            + f64::from(host.memory.usage_pct) / 100.0 * w.memory
            + f64::from(host.storage.usage_pct) / 100.0 * w.storage;
        weighted / (w.cpu + w.memory + w.storage)
    }

    fn plan(&self, available: &[Host], scores: &[(String, f64)]) -> Vec<Migration> {
        let score_by_host: HashMap<&str, f64> =
            scores.iter().map(|(h, s)| (h.as_str(), *s)).collect();
        let now = Utc::now();
        let mut plan = Vec::new();

        for source in available
            .iter()
            .filter(|h| exceeds_thresholds(h, &self.config.balancing.thresholds))
        {
            for vm in &source.vms {
                if self.rules.is_ignored(vm.id) {
                    continue;
                }
                let Some(target) = self.best_target(vm, &source.name, scores) else {
                    continue;
                };
                let gain = score_by_host
                    .get(source.name.as_str())
                    .zip(score_by_host.get(target.as_str()))
                    .map(|(src, dst)| src - dst)
                    .unwrap_or(0.0);
                if gain <= 0.0 {
                    continue;
                }
                plan.push(Migration {
                    vm: vm.clone(),
                    from_host: source.name.clone(),
                    to_host: target,
                    status: MigrationStatus::Pending,
                    start_time: now,
                    end_time: None,
                    error: None,
                });
            }
        }
        plan
    }

    fn best_target(&self, vm: &Vm, source: &str, scores: &[(String, f64)]) -> Option<String> {
        for (host, _) in scores.iter().filter(|(h, _)| h != source) {
            if self.rules.validate_placement(vm, host).is_ok() {
                return Some(host.clone());
            }
        }
        None
    }
}

#[async_trait]
impl Balancer for ThresholdBalancer {
    async fn run(&mut self, force: bool) -> Result<Vec<BalancingOutcome>> {
        let hosts = self.client.list_hosts().await.context("failed to snapshot cluster")?;
        let available = filter_available(&hosts, &self.config.cluster.maintenance_hosts);
        if available.len() < 2 {
            bail!(
                "insufficient available hosts for balancing ({} of {})",
                available.len(),
                hosts.len()
            );
        }

        self.rules.ingest(&collect_vms(&hosts));

        let overloaded = available
            .iter()
            .any(|h| exceeds_thresholds(h, &self.config.balancing.thresholds));
        if !force && !overloaded {
            debug!("no host exceeds thresholds, nothing to balance");
            return Ok(vec![]);
        }

        let mut scores: Vec<(String, f64)> = available
            .iter()
            .map(|h| (h.name.clone(), self.score(h)))
            .collect();
        scores.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let plan = self.plan(&available, &scores);
        let score_by_host: HashMap<&str, f64> =
            scores.iter().map(|(h, s)| (h.as_str(), *s)).collect();

        let mut outcomes = Vec::with_capacity(plan.len());
        for migration in plan {
            if !self.gate.is_open() {
                info!(executed = outcomes.len(), "cycle cancelled between migrations");
                break;
            }
            let gain = score_by_host
                .get(migration.from_host.as_str())
                .zip(score_by_host.get(migration.to_host.as_str()))
                .map(|(src, dst)| src - dst)
                .unwrap_or(0.0);

            let result = self
                .client
                .migrate(migration.vm.id, &migration.from_host, &migration.to_host)
                .await;
            let timestamp = Utc::now();

            match result {
                Ok(()) => {
                    info!(
                        vm = %migration.vm.name,
                        from = %migration.from_host,
                        to = %migration.to_host,
                        "migration succeeded"
                    );
                    outcomes.push(BalancingOutcome {
                        vm: migration.vm,
                        from_host: migration.from_host,
                        to_host: migration.to_host,
                        reason: MIGRATION_REASON.to_string(),
                        resource_gain: gain,
                        timestamp,
                        success: true,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(
                        vm = %migration.vm.name,
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
                        timestamp,
                        success: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        self.last_run = Some(Utc::now());
        Ok(outcomes)
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
