//! fleetctl - control plane for the Compiler Explorer fleet
//!
//! This crate drives blue/green deployments, rolling instance lifecycle,
//! compiler-to-queue routing synchronization and the ce-router kill-switch
//! across the fleet's environments, orchestrating auto-scaling groups,
//! load-balancer rules, the parameter store, the routing table and the CDN
//! into idempotent, observable workflows.

pub mod cloud;
pub mod config;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod instances;
pub mod killswitch;
pub mod lifecycle;
pub mod notify;
pub mod routing;
pub mod types;

pub use config::FleetConfig;
pub use environment::Environment;
pub use error::{FleetError, Result};

// Export main types at root level
pub use types::{BlueGreenStatus, Color, Instance, InstanceSnapshot, RuleState};
