//! Core library for vlb, the rule-aware workload rebalancer
//!
//! This crate provides:
//! - Placement rule evaluation from operator tags
//! - Capacity analysis and workload profiling from historical metrics
//! - The scoring and planning engines that produce bounded migration plans
//! - Leader-election coordination for multi-manager deployments
//! - The control loop, status endpoint, and daemon assembly

pub mod balancer;
pub mod capacity;
pub mod config;
pub mod control;
pub mod daemon;
pub mod history;
pub mod models;
pub mod observability;
pub mod platform;
pub mod profile;
pub mod raft;
pub mod rules;
pub mod status;

pub use balancer::{build_balancer, AdvancedBalancer, Balancer, RunGate, ThresholdBalancer};
pub use config::Config;
pub use models::*;
pub use platform::{PlatformClient, RestClient, Timeframe};
pub use rules::{PlacementError, RuleEngine};
