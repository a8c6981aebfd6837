use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Blue/green fleet color, derived from the instance `Color` tag.
///
/// Exactly one color is active per environment at any time; the other is the
/// standby side a deployment scales up before switching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Blue,
    Green,
    None,
}

impl Color {
    /// The opposite fleet color. `None` has no inverse: an environment with
    /// no recorded active color must be bootstrapped by an operator first.
    pub fn invert(self) -> Option<Color> {
        match self {
            Color::Blue => Some(Color::Green),
            Color::Green => Some(Color::Blue),
            Color::None => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
            Color::None => "none",
        }
    }

    pub fn parse(value: &str) -> Result<Color, ConfigError> {
        match value {
            "blue" => Ok(Color::Blue),
            "green" => Ok(Color::Green),
            _ => Err(ConfigError::InvalidColor {
                value: value.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ASG lifecycle state of a worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Standby,
    Terminating,
    Unknown,
}

impl LifecycleState {
    pub fn from_asg(state: &str) -> Self {
        match state {
            "Pending" | "Pending:Wait" | "Pending:Proceed" => LifecycleState::Pending,
            "InService" => LifecycleState::InService,
            "Standby" | "EnteringStandby" => LifecycleState::Standby,
            s if s.starts_with("Terminating") => LifecycleState::Terminating,
            _ => LifecycleState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::InService => "in service",
            LifecycleState::Standby => "standby",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Unknown => "unknown",
        }
    }
}

/// Target-group health as reported by the load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetHealth {
    Healthy,
    Unhealthy,
    Draining,
    Unused,
}

impl TargetHealth {
    pub fn from_state(state: &str) -> Self {
        match state {
            "healthy" => TargetHealth::Healthy,
            "draining" => TargetHealth::Draining,
            "unused" | "unavailable" => TargetHealth::Unused,
            _ => TargetHealth::Unhealthy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetHealth::Healthy => "healthy",
            TargetHealth::Unhealthy => "unhealthy",
            TargetHealth::Draining => "draining",
            TargetHealth::Unused => "unused",
        }
    }
}

/// One worker node as the registry sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub color: Color,
    pub lifecycle: LifecycleState,
    pub isolated: bool,
    pub scale_in_protected: bool,
    pub stop_protected: bool,
    pub termination_protected: bool,
    pub private_ip: Option<String>,
    pub health: TargetHealth,
}

impl Instance {
    /// Counted toward serving capacity only when both the load balancer and
    /// the ASG agree the instance is up.
    pub fn is_serving(&self) -> bool {
        self.health == TargetHealth::Healthy && self.lifecycle == LifecycleState::InService
    }
}

/// Point-in-time view of an environment's instances; never cached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub environment: String,
    pub taken_at: DateTime<Utc>,
    pub active_color: Color,
    pub instances: Vec<Instance>,
}

impl InstanceSnapshot {
    pub fn by_color(&self, color: Color) -> impl Iterator<Item = &Instance> {
        self.instances.iter().filter(move |i| i.color == color)
    }

    pub fn serving_count(&self, color: Color) -> u32 {
        self.by_color(color).filter(|i| i.is_serving()).count() as u32
    }

    pub fn isolated(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter().filter(|i| i.isolated)
    }
}

/// Kill-switch classification of a listener rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleState {
    Enabled,
    KillswitchActive,
    NotFound,
}

impl RuleState {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleState::Enabled => "enabled",
            RuleState::KillswitchActive => "killswitch_active",
            RuleState::NotFound => "not_found",
        }
    }
}

/// Summary returned by `blue-green status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueGreenStatus {
    pub environment: String,
    pub active_color: Color,
    pub blue_version: Option<String>,
    pub green_version: Option<String>,
    pub blue_serving: u32,
    pub green_serving: u32,
    pub blue_desired: u32,
    pub green_desired: u32,
    /// Set when the listener rule and the active-color key disagree
    pub drift: Option<String>,
}
