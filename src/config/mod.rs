use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Tool configuration, loaded from `fleetctl.toml`.
///
/// Every tunable has a documented default so a fresh checkout works against
/// a conventionally-named fleet without a config file at all.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// AWS region override; falls back to the ambient SDK configuration
    pub region: Option<String>,
    /// Listener carrying the per-environment forwarding and router rules
    pub listener_arn: Option<String>,
    /// CloudFront distribution per environment name, invalidated after a
    /// traffic switch when present
    pub cdn_distributions: HashMap<String, String>,
    pub deploy: DeployTunables,
    pub lifecycle: LifecycleTunables,
    pub routing: RoutingTunables,
    pub notify: NotifyTunables,

    /// Runtime flags carried from the CLI, never read from the file
    #[serde(skip)]
    pub dry_run: bool,
    #[serde(skip)]
    pub skip_confirmation: bool,
    #[serde(skip)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployTunables {
    /// Healthy-capacity floor maintained through a deployment, in percent
    pub min_healthy_percent: u32,
    /// Initial health poll interval in seconds
    pub poll_interval_secs: u64,
    /// Ceiling for the backed-off poll interval in seconds
    pub poll_max_interval_secs: u64,
    /// Minimum spacing between the two quorum-confirming polls in seconds
    pub quorum_gap_secs: u64,
    /// Consecutive polls without health progress before rollback
    pub stall_polls: u32,
    /// Hard deadline for a whole deployment in seconds
    pub timeout_secs: u64,
    /// Deploy-lock lease TTL in seconds; slightly longer than the deadline
    pub lease_ttl_secs: i64,
}

impl Default for DeployTunables {
    fn default() -> Self {
        Self {
            min_healthy_percent: 75,
            poll_interval_secs: 15,
            poll_max_interval_secs: 60,
            quorum_gap_secs: 30,
            stall_polls: 10,
            timeout_secs: 30 * 60,
            lease_ttl_secs: 35 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleTunables {
    pub min_healthy_percent: u32,
    /// Bound on waiting for a deregistered target to finish draining
    pub drain_timeout_secs: u64,
    /// Bound on waiting for a restarted instance to report healthy
    pub health_timeout_secs: u64,
    /// Bound on waiting for the in-instance service restart command
    pub command_timeout_secs: u64,
    /// Instances restarted at once during a rolling restart
    pub restart_concurrency: u32,
    pub poll_interval_secs: u64,
    /// Bound on an ASG instance refresh before giving up on polling
    pub refresh_timeout_secs: u64,
}

impl Default for LifecycleTunables {
    fn default() -> Self {
        Self {
            min_healthy_percent: 75,
            drain_timeout_secs: 300,
            health_timeout_secs: 600,
            command_timeout_secs: 300,
            restart_concurrency: 1,
            poll_interval_secs: 10,
            refresh_timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingTunables {
    /// DynamoDB table holding the compiler routing entries
    pub table: String,
    /// Timeout for the live inventory fetch in seconds; not retried
    pub fetch_timeout_secs: u64,
}

impl Default for RoutingTunables {
    fn default() -> Self {
        Self {
            table: "CompilerRouting".to_string(),
            fetch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyTunables {
    /// Repository whose commits, PRs and issues are notified on release
    pub repo: String,
    pub timeout_secs: u64,
}

impl Default for NotifyTunables {
    fn default() -> Self {
        Self {
            repo: "compiler-explorer/compiler-explorer".to_string(),
            timeout_secs: 10,
        }
    }
}

impl FleetConfig {
    /// Load configuration from an explicit path, or from the default
    /// location under the user config directory. A missing file yields the
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleetctl")
            .join("fleetctl.toml")
    }

    /// The listener every traffic mutation goes through; required for
    /// deploys and kill-switch operations.
    pub fn listener_arn(&self) -> Result<&str, ConfigError> {
        self.listener_arn
            .as_deref()
            .ok_or(ConfigError::MissingSetting {
                name: "listener_arn".to_string(),
            })
    }

    pub fn cdn_distribution(&self, env_name: &str) -> Option<&str> {
        self.cdn_distributions.get(env_name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.deploy.min_healthy_percent, 75);
        assert_eq!(cfg.deploy.poll_interval_secs, 15);
        assert_eq!(cfg.deploy.poll_max_interval_secs, 60);
        assert_eq!(cfg.deploy.timeout_secs, 1800);
        assert_eq!(cfg.deploy.lease_ttl_secs, 2100);
        assert_eq!(cfg.routing.table, "CompilerRouting");
        assert_eq!(cfg.routing.fetch_timeout_secs, 30);
        assert_eq!(cfg.notify.timeout_secs, 10);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FleetConfig::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(cfg.lifecycle.restart_concurrency, 1);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetctl.toml");
        std::fs::write(
            &path,
            "listener_arn = \"arn:aws:elasticloadbalancing:us-east-1:1:listener/app/ce/x/y\"\n\
             [deploy]\nmin_healthy_percent = 50\n",
        )
        .unwrap();

        let cfg = FleetConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.deploy.min_healthy_percent, 50);
        assert_eq!(cfg.deploy.poll_interval_secs, 15);
        assert!(cfg.listener_arn().is_ok());
    }

    #[test]
    fn listener_arn_is_required_for_traffic_ops() {
        let cfg = FleetConfig::default();
        assert!(matches!(
            cfg.listener_arn(),
            Err(ConfigError::MissingSetting { .. })
        ));
    }
}
