//! Periodic balancing control loop
//!
//! Ticks at the configured interval and runs a cycle only while this
//! instance holds leadership. Leadership is consumed through a coalescing
//! watch channel; the loop never queues stale transitions. Cancellation is
//! honored between migrations through the balancer's run gate, so an
//! in-flight migration RPC always completes and is recorded first.

use crate::balancer::Balancer;
use crate::observability::BalancerMetrics;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

pub struct ControlLoop {
    balancer: Box<dyn Balancer>,
    interval: Duration,
    leadership: watch::Receiver<bool>,
    metrics: BalancerMetrics,
}

impl ControlLoop {
    pub fn new(
        balancer: Box<dyn Balancer>,
        interval: Duration,
        leadership: watch::Receiver<bool>,
    ) -> Self {
        Self {
            balancer,
            interval,
            leadership,
            metrics: BalancerMetrics::new(),
        }
    }

    /// Run until shutdown. The first cycle only happens after leadership is
    /// held; ticks while not leader are skipped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "control loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would race leader election; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !*self.leadership.borrow() {
                        debug!("not the leader, skipping balancing tick");
                        continue;
                    }
                    self.cycle().await;
                }
                changed = self.leadership.changed() => {
                    if changed.is_err() {
                        info!("leadership channel closed, stopping control loop");
                        return;
                    }
                    if *self.leadership.borrow() {
                        info!("leadership acquired, balancing resumes on next tick");
                    } else {
                        info!("leadership lost, balancing suspended");
                    }
                }
                _ = shutdown.recv() => {
                    info!("control loop shutting down");
                    return;
                }
            }
        }
    }

    async fn cycle(&mut self) {
        let started = Utc::now();
        let clock = std::time::Instant::now();
        debug!(cycle_start = %started, "running balancing cycle");

        match self.balancer.run(false).await {
            Ok(outcomes) => {
                self.metrics.observe_cycle(clock.elapsed().as_secs_f64());
                if outcomes.is_empty() {
                    debug!(cycle_start = %started, "no balancing actions needed");
                    return;
                }
                for outcome in &outcomes {
                    self.metrics.observe_migration(outcome.success);
                    if outcome.success {
                        info!(
                            cycle_start = %started,
                            vm = %outcome.vm.name,
                            vm_id = outcome.vm.id,
                            from = %outcome.from_host,
                            to = %outcome.to_host,
                            gain = outcome.resource_gain,
                            "migrated"
                        );
                    } else {
                        error!(
                            cycle_start = %started,
                            vm = %outcome.vm.name,
                            vm_id = outcome.vm.id,
                            error = outcome.error.as_deref().unwrap_or("unknown"),
                            "migration failed"
                        );
                    }
                }
                info!(
                    cycle_start = %started,
                    migrations = outcomes.len(),
                    succeeded = outcomes.iter().filter(|o| o.success).count(),
                    "balancing cycle complete"
                );
            }
            Err(err) => {
                // A failed cycle is reported and the loop keeps ticking.
                self.metrics.observe_cycle_error();
                error!(cycle_start = %started, error = %err, "balancing cycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::testutil::{host, vm, MockPlatform};
    use crate::balancer::{AdvancedBalancer, RunGate};
    use crate::config::Config;
    use std::sync::Arc;

    fn quick_config() -> Arc<Config> {
        let mut cfg = Config::default();
        cfg.balancing.load_profiles.enabled = false;
        cfg.balancing.capacity.enabled = false;
        Arc::new(cfg)
    }

    fn overloaded_cluster() -> Vec<crate::models::Host> {
        vec![
            host("a", 85.0, 75.0, 80.0, vec![vm(100, "vm100", "a", &[])]),
            host("b", 30.0, 25.0, 20.0, vec![]),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn non_leader_never_migrates() {
        let platform = Arc::new(MockPlatform::with_hosts(overloaded_cluster()));
        let (_leader_tx, leader_rx) = watch::channel(false);
        let balancer = Box::new(AdvancedBalancer::new(
            platform.clone(),
            quick_config(),
            RunGate::always_open(),
        ));
        let control = ControlLoop::new(balancer, Duration::from_secs(60), leader_rx);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(control.run(shutdown_rx));

        // Several ticks pass without leadership.
        tokio::time::sleep(Duration::from_secs(200)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(platform.recorded_migrations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leader_balances_on_tick() {
        let platform = Arc::new(MockPlatform::with_hosts(overloaded_cluster()));
        let (leader_tx, leader_rx) = watch::channel(true);
        let balancer = Box::new(AdvancedBalancer::new(
            platform.clone(),
            quick_config(),
            RunGate::watching(leader_rx.clone()),
        ));
        let control = ControlLoop::new(balancer, Duration::from_secs(60), leader_rx);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(control.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(90)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        drop(leader_tx);

        assert_eq!(
            platform.recorded_migrations(),
            vec![(100, "a".to_string(), "b".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn leadership_gain_does_not_trigger_immediate_cycle() {
        let platform = Arc::new(MockPlatform::with_hosts(overloaded_cluster()));
        let (leader_tx, leader_rx) = watch::channel(false);
        let balancer = Box::new(AdvancedBalancer::new(
            platform.clone(),
            quick_config(),
            RunGate::always_open(),
        ));
        let control = ControlLoop::new(balancer, Duration::from_secs(60), leader_rx);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(control.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        leader_tx.send(true).unwrap();
        // Leadership alone does not balance; the next tick does.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(platform.recorded_migrations().is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(platform.recorded_migrations().len(), 1);
    }
}
