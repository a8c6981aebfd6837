use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Color;

/// Operating system family a fleet runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86_64,
    AArch64,
    Gpu,
}

/// How compilation requests reach an environment's workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Requests are placed on the environment's SQS compilation queue
    Queue,
    /// Requests are forwarded straight to the environment's compile URL
    DirectUrl,
}

/// A deployment target in the fleet.
///
/// This is a closed set: every ASG, target group, SSM key and routing-table
/// slice in the account is derived from one of these variants, so an
/// operation can never touch infrastructure outside the known fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    Beta,
    Staging,
    GpuProd,
    AArch64Prod,
    AArch64Staging,
    WinProd,
    WinStaging,
    WinTest,
}

impl Environment {
    pub const ALL: [Environment; 9] = [
        Environment::Prod,
        Environment::Beta,
        Environment::Staging,
        Environment::GpuProd,
        Environment::AArch64Prod,
        Environment::AArch64Staging,
        Environment::WinProd,
        Environment::WinStaging,
        Environment::WinTest,
    ];

    pub fn by_name(name: &str) -> Result<Environment, ConfigError> {
        Environment::ALL
            .iter()
            .copied()
            .find(|e| e.name() == name)
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.to_string(),
            })
    }

    /// Stable key used in resource names, SSM paths and routing-table rows
    pub fn name(self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Beta => "beta",
            Environment::Staging => "staging",
            Environment::GpuProd => "gpu",
            Environment::AArch64Prod => "aarch64prod",
            Environment::AArch64Staging => "aarch64staging",
            Environment::WinProd => "winprod",
            Environment::WinStaging => "winstaging",
            Environment::WinTest => "wintest",
        }
    }

    pub fn is_production(self) -> bool {
        matches!(
            self,
            Environment::Prod
                | Environment::GpuProd
                | Environment::AArch64Prod
                | Environment::WinProd
        )
    }

    pub fn os_family(self) -> OsFamily {
        match self {
            Environment::WinProd | Environment::WinStaging | Environment::WinTest => {
                OsFamily::Windows
            }
            _ => OsFamily::Linux,
        }
    }

    pub fn architecture(self) -> Architecture {
        match self {
            Environment::GpuProd => Architecture::Gpu,
            Environment::AArch64Prod | Environment::AArch64Staging => Architecture::AArch64,
            _ => Architecture::X86_64,
        }
    }

    pub fn routing_mode(self) -> RoutingMode {
        match self {
            // Windows fleets still compile over the instance URL path
            Environment::WinProd | Environment::WinStaging | Environment::WinTest => {
                RoutingMode::DirectUrl
            }
            _ => RoutingMode::Queue,
        }
    }

    /// Number of historical builds kept around for rollback
    pub fn keep_builds(self) -> u32 {
        match self {
            Environment::Prod | Environment::GpuProd | Environment::AArch64Prod => 10,
            Environment::WinProd => 10,
            Environment::Beta => 5,
            _ => 2,
        }
    }

    /// Public host (and path prefix for non-prod) serving this environment
    pub fn external_hostname(self) -> &'static str {
        match self {
            Environment::Prod => "godbolt.org",
            Environment::Beta => "godbolt.org/beta",
            Environment::Staging => "godbolt.org/staging",
            Environment::GpuProd => "godbolt.org/gpu",
            Environment::AArch64Prod => "godbolt.org/aarch64prod",
            Environment::AArch64Staging => "godbolt.org/aarch64staging",
            Environment::WinProd => "godbolt.org/winprod",
            Environment::WinStaging => "godbolt.org/winstaging",
            Environment::WinTest => "godbolt.org/wintest",
        }
    }

    /// Well-known SSM key path for this environment
    pub fn parameter_key(self, suffix: &str) -> String {
        format!("/fleet/{}/{}", self.name(), suffix)
    }

    pub fn active_color_key(self) -> String {
        self.parameter_key("active-color")
    }

    pub fn version_key(self, color: Color) -> String {
        self.parameter_key(&format!("version/{}", color))
    }

    pub fn deploy_lock_key(self) -> String {
        self.parameter_key("deploy-lock")
    }

    pub fn asg_name(self, color: Color) -> String {
        format!("{}-{}", self.name(), color)
    }

    pub fn target_group_name(self, color: Color) -> String {
        format!("{}-{}", self.name(), color)
    }

    /// Target group fronting the queue-based router Lambda for this
    /// environment; the kill-switch locates the primary listener rule by it.
    pub fn router_target_group_name(self) -> String {
        format!("{}-router", self.name())
    }

    pub fn queue_name(self) -> String {
        format!("{}-compilation-queue", self.name())
    }

    pub fn compilers_url(self) -> String {
        format!("https://{}/api/compilers?fields=id", self.external_hostname())
    }

    pub fn compile_url(self, compiler_id: &str) -> String {
        format!(
            "https://{}/api/compiler/{}/compile",
            self.external_hostname(),
            compiler_id
        )
    }

    /// Path patterns the primary (queue) listener rule carries when enabled
    pub fn router_path_patterns(self) -> Vec<String> {
        match self {
            Environment::Prod => vec![
                "/api/compiler/*/compile".to_string(),
                "/api/compiler/*/cmake".to_string(),
            ],
            other => vec![
                format!("/{}/api/compiler/*/compile", other.name()),
                format!("/{}/api/compiler/*/cmake", other.name()),
            ],
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
