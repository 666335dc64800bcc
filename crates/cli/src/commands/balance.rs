//! One-shot balancing cycle

use super::platform_client;
use crate::output::{print_error, print_info, print_success, OutputFormat};
use anyhow::Result;
use balancer_lib::balancer::{build_balancer, RunGate};
use balancer_lib::config::Config;
use std::sync::Arc;

pub async fn run(config: &Config, force: bool, format: OutputFormat) -> Result<()> {
    let client = platform_client(config)?;
    let mut balancer = build_balancer(client, Arc::new(config.clone()), RunGate::always_open());

    let outcomes = balancer.run(force).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcomes)?),
        OutputFormat::Table => {
            if outcomes.is_empty() {
                print_info("no balancing actions needed");
                return Ok(());
            }
            for outcome in &outcomes {
                if outcome.success {
                    print_success(&format!(
                        "migrated {} ({}) from {} to {} (gain: {:.2})",
                        outcome.vm.name,
                        outcome.vm.id,
                        outcome.from_host,
                        outcome.to_host,
                        outcome.resource_gain
                    ));
                } else {
                    print_error(&format!(
                        "failed to migrate {} ({}): {}",
                        outcome.vm.name,
                        outcome.vm.id,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
            let succeeded = outcomes.iter().filter(|o| o.success).count();
            println!("\n{succeeded} of {} migrations succeeded", outcomes.len());
        }
    }
    Ok(())
}
