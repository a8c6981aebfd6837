use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use crate::cloud::{
    AsgApi, CommandApi, CommandStatus, ComputeApi, LoadBalancerApi, ParamStoreApi, RefreshState,
};
use crate::config::LifecycleTunables;
use crate::deploy::required_quorum;
use crate::environment::{Environment, OsFamily};
use crate::error::{CloudError, LifecycleError};
use crate::instances::{Registry, ISOLATED_TAG};
use crate::types::{Color, Instance, LifecycleState, TargetHealth};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartReport {
    pub environment: String,
    pub restarted: Vec<String>,
}

/// Drains, restarts, isolates and replaces individual worker instances
/// while keeping the environment above its minimum healthy capacity.
///
/// Partial failures stop at the failing stage and leave state as-is;
/// recovery is driven by the operator, never guessed at here.
pub struct LifecycleManager<'a> {
    env: Environment,
    tunables: &'a LifecycleTunables,
    asg: &'a dyn AsgApi,
    compute: &'a dyn ComputeApi,
    lb: &'a dyn LoadBalancerApi,
    params: &'a dyn ParamStoreApi,
    commands: &'a dyn CommandApi,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(
        env: Environment,
        tunables: &'a LifecycleTunables,
        asg: &'a dyn AsgApi,
        compute: &'a dyn ComputeApi,
        lb: &'a dyn LoadBalancerApi,
        params: &'a dyn ParamStoreApi,
        commands: &'a dyn CommandApi,
    ) -> Self {
        Self {
            env,
            tunables,
            asg,
            compute,
            lb,
            params,
            commands,
        }
    }

    fn registry(&self) -> Registry<'a> {
        Registry::new(self.asg, self.compute, self.lb, self.params)
    }

    fn cloud(instance: &str, stage: &'static str) -> impl FnOnce(CloudError) -> LifecycleError {
        let instance = instance.to_string();
        move |source| LifecycleError::Cloud {
            instance,
            stage,
            source,
        }
    }

    /// Pull one instance out of service for debugging, keeping it alive.
    ///
    /// The ordering is strict: protection comes first so a concurrent
    /// scale-in cannot reap the instance, then standby, then target-group
    /// deregistration, then the marker tag.
    pub async fn isolate(&self, instance_id: Option<&str>) -> Result<String, LifecycleError> {
        let snapshot = self
            .registry()
            .snapshot(self.env)
            .await
            .map_err(Self::cloud("<none>", "snapshot"))?;

        let target: Instance = match instance_id {
            Some(id) => snapshot
                .instances
                .iter()
                .find(|i| i.instance_id == id)
                .cloned()
                .ok_or_else(|| LifecycleError::NotFound {
                    instance: id.to_string(),
                })?,
            None => snapshot
                .by_color(snapshot.active_color)
                .find(|i| i.lifecycle == LifecycleState::InService)
                .cloned()
                .ok_or_else(|| LifecycleError::Precondition {
                    instance: "<none>".to_string(),
                    reason: format!("no in-service {} instance in {}", snapshot.active_color, self.env),
                })?,
        };
        let id = target.instance_id.clone();

        if target.lifecycle != LifecycleState::InService {
            return Err(LifecycleError::Precondition {
                instance: id,
                reason: format!("instance is {}, not in service", target.lifecycle.as_str()),
            });
        }
        if target.color == Color::None {
            return Err(LifecycleError::Precondition {
                instance: id,
                reason: "instance carries no color tag".to_string(),
            });
        }

        info!("🔬 isolating {} in {}", id, self.env);

        self.compute
            .set_stop_protection(&id, true)
            .await
            .map_err(Self::cloud(&id, "protect"))?;
        self.compute
            .set_termination_protection(&id, true)
            .await
            .map_err(Self::cloud(&id, "protect"))?;

        self.asg
            .enter_standby(&self.env.asg_name(target.color), &id)
            .await
            .map_err(Self::cloud(&id, "standby"))?;

        for color in [Color::Blue, Color::Green] {
            let arn = match self
                .lb
                .target_group_arn(&self.env.target_group_name(color))
                .await
            {
                Ok(arn) => arn,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(Self::cloud(&id, "deregister")(e)),
            };
            self.lb
                .deregister(&arn, &id)
                .await
                .map_err(Self::cloud(&id, "deregister"))?;
        }

        self.compute
            .tag_instance(&id, ISOLATED_TAG, "true")
            .await
            .map_err(Self::cloud(&id, "tag"))?;

        info!("✅ {} isolated; terminate with `instances terminate-isolated`", id);
        Ok(id)
    }

    /// Return an isolated instance to service: standby exit first so the
    /// ASG counts it again, then registration, then the protections and
    /// the marker come off.
    pub async fn restore(&self, instance_id: &str) -> Result<(), LifecycleError> {
        let snapshot = self
            .registry()
            .snapshot(self.env)
            .await
            .map_err(Self::cloud(instance_id, "snapshot"))?;
        let target = snapshot
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| LifecycleError::NotFound {
                instance: instance_id.to_string(),
            })?;

        if target.lifecycle != LifecycleState::Standby || !target.isolated {
            return Err(LifecycleError::Precondition {
                instance: instance_id.to_string(),
                reason: "only standby+isolated instances can be restored".to_string(),
            });
        }
        let color = target.color;

        self.asg
            .exit_standby(&self.env.asg_name(color), instance_id)
            .await
            .map_err(Self::cloud(instance_id, "exit-standby"))?;

        let tg_arn = self
            .lb
            .target_group_arn(&self.env.target_group_name(color))
            .await
            .map_err(Self::cloud(instance_id, "register"))?;
        self.lb
            .register(&tg_arn, instance_id)
            .await
            .map_err(Self::cloud(instance_id, "register"))?;
        self.await_serving(&tg_arn, instance_id).await?;

        self.compute
            .set_stop_protection(instance_id, false)
            .await
            .map_err(Self::cloud(instance_id, "unprotect"))?;
        self.compute
            .set_termination_protection(instance_id, false)
            .await
            .map_err(Self::cloud(instance_id, "unprotect"))?;
        self.compute
            .tag_instance(instance_id, ISOLATED_TAG, "false")
            .await
            .map_err(Self::cloud(instance_id, "tag"))?;

        info!("✅ {} restored to service", instance_id);
        Ok(())
    }

    /// Destroy a previously isolated instance; the ASG replaces it.
    pub async fn terminate_isolated(&self, instance_id: &str) -> Result<(), LifecycleError> {
        let snapshot = self
            .registry()
            .snapshot(self.env)
            .await
            .map_err(Self::cloud(instance_id, "snapshot"))?;
        let target = snapshot
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| LifecycleError::NotFound {
                instance: instance_id.to_string(),
            })?;

        if target.lifecycle != LifecycleState::Standby || !target.isolated {
            return Err(LifecycleError::Precondition {
                instance: instance_id.to_string(),
                reason: format!(
                    "instance is {} and {}; only standby+isolated instances may be terminated",
                    target.lifecycle.as_str(),
                    if target.isolated { "isolated" } else { "not isolated" }
                ),
            });
        }

        self.compute
            .set_stop_protection(instance_id, false)
            .await
            .map_err(Self::cloud(instance_id, "unprotect"))?;
        self.compute
            .set_termination_protection(instance_id, false)
            .await
            .map_err(Self::cloud(instance_id, "unprotect"))?;
        self.compute
            .terminate(instance_id)
            .await
            .map_err(Self::cloud(instance_id, "terminate"))?;

        info!("💥 {} terminated; the ASG will replace it", instance_id);
        Ok(())
    }

    /// Drain one instance, restart its worker service in place, and wait
    /// for it to serve again.
    pub async fn restart_one(&self, instance: &Instance) -> Result<(), LifecycleError> {
        let id = instance.instance_id.as_str();
        let Some(color) = (instance.color != Color::None).then_some(instance.color) else {
            return Err(LifecycleError::Precondition {
                instance: id.to_string(),
                reason: "instance carries no color tag".to_string(),
            });
        };

        let tg_arn = self
            .lb
            .target_group_arn(&self.env.target_group_name(color))
            .await
            .map_err(Self::cloud(id, "deregister"))?;

        info!("♻️  restarting {} in {}", id, self.env);
        self.lb
            .deregister(&tg_arn, id)
            .await
            .map_err(Self::cloud(id, "deregister"))?;
        self.await_drained(&tg_arn, id).await?;

        self.restart_service(id).await?;

        self.lb
            .register(&tg_arn, id)
            .await
            .map_err(Self::cloud(id, "register"))?;
        self.await_serving(&tg_arn, id).await?;

        info!("✅ {} back in service", id);
        Ok(())
    }

    async fn await_drained(&self, tg_arn: &str, id: &str) -> Result<(), LifecycleError> {
        const STAGE: &str = "drain";
        let deadline = Instant::now() + Duration::from_secs(self.tunables.drain_timeout_secs);
        loop {
            let states = self
                .lb
                .target_health(tg_arn)
                .await
                .map_err(Self::cloud(id, STAGE))?;
            let state = states.iter().find(|(target, _)| target == id);
            match state {
                None => return Ok(()),
                Some((_, TargetHealth::Unused)) => return Ok(()),
                Some(_) => {}
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::DrainTimeout {
                    instance: id.to_string(),
                    stage: STAGE,
                });
            }
            tokio::time::sleep(Duration::from_secs(self.tunables.poll_interval_secs)).await;
        }
    }

    async fn restart_service(&self, id: &str) -> Result<(), LifecycleError> {
        const STAGE: &str = "restart-service";
        let (document, commands) = match self.env.os_family() {
            OsFamily::Linux => (
                "AWS-RunShellScript",
                vec!["sudo systemctl restart compiler-explorer".to_string()],
            ),
            OsFamily::Windows => (
                "AWS-RunPowerShellScript",
                vec!["Restart-Service CompilerExplorer".to_string()],
            ),
        };

        let command_id = self
            .commands
            .run_command(id, document, &commands)
            .await
            .map_err(Self::cloud(id, STAGE))?;

        let deadline = Instant::now() + Duration::from_secs(self.tunables.command_timeout_secs);
        loop {
            match self
                .commands
                .command_status(&command_id, id)
                .await
                .map_err(Self::cloud(id, STAGE))?
            {
                CommandStatus::Success => return Ok(()),
                CommandStatus::Failed(detail) => {
                    return Err(Self::cloud(id, STAGE)(CloudError::new(
                        crate::error::CloudErrorKind::Unknown,
                        "ssm.get_command_invocation",
                        detail,
                    )));
                }
                CommandStatus::InProgress => {}
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::HealthTimeout {
                    instance: id.to_string(),
                    stage: STAGE,
                });
            }
            tokio::time::sleep(Duration::from_secs(self.tunables.poll_interval_secs)).await;
        }
    }

    async fn await_serving(&self, tg_arn: &str, id: &str) -> Result<(), LifecycleError> {
        const STAGE: &str = "await-healthy";
        let deadline = Instant::now() + Duration::from_secs(self.tunables.health_timeout_secs);
        loop {
            let states = self
                .lb
                .target_health(tg_arn)
                .await
                .map_err(Self::cloud(id, STAGE))?;
            if states
                .iter()
                .any(|(target, health)| target == id && *health == TargetHealth::Healthy)
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::HealthTimeout {
                    instance: id.to_string(),
                    stage: STAGE,
                });
            }
            tokio::time::sleep(Duration::from_secs(self.tunables.poll_interval_secs)).await;
        }
    }

    /// Rolling restart of the active color, in waves sized so the serving
    /// count never dips below the min-healthy floor.
    pub async fn restart(&self, concurrency: Option<u32>) -> Result<RestartReport, LifecycleError> {
        let registry = self.registry();
        let snapshot = registry
            .snapshot(self.env)
            .await
            .map_err(Self::cloud("<none>", "snapshot"))?;
        let active = snapshot.active_color;
        let targets: Vec<Instance> = snapshot
            .by_color(active)
            .filter(|i| i.lifecycle == LifecycleState::InService)
            .cloned()
            .collect();

        if targets.is_empty() {
            return Err(LifecycleError::Precondition {
                instance: "<none>".to_string(),
                reason: format!("no in-service {active} instances in {}", self.env),
            });
        }

        let total = targets.len() as u32;
        let quorum = required_quorum(total, self.tunables.min_healthy_percent);
        let headroom = total.saturating_sub(quorum);
        if headroom == 0 {
            return Err(LifecycleError::InvariantViolation {
                reason: format!(
                    "{total} instances with a floor of {quorum} leaves no room to restart any"
                ),
            });
        }
        let wave_size = concurrency
            .unwrap_or(self.tunables.restart_concurrency)
            .clamp(1, headroom) as usize;

        info!(
            "🔄 rolling restart of {} {} instances in {} (waves of {wave_size}, floor {quorum})",
            total, active, self.env
        );

        let mut restarted = Vec::new();
        for wave in targets.chunks(wave_size) {
            let serving = registry
                .serving_count(self.env, active)
                .await
                .map_err(Self::cloud("<none>", "snapshot"))?;
            if serving.saturating_sub(wave.len() as u32) < quorum {
                return Err(LifecycleError::InvariantViolation {
                    reason: format!(
                        "taking {} instances down would leave {} serving, below the floor of {quorum}",
                        wave.len(),
                        serving.saturating_sub(wave.len() as u32)
                    ),
                });
            }

            let results =
                futures::future::join_all(wave.iter().map(|i| self.restart_one(i))).await;
            for (instance, result) in wave.iter().zip(results) {
                result?;
                restarted.push(instance.instance_id.clone());
            }
        }

        Ok(RestartReport {
            environment: self.env.name().to_string(),
            restarted,
        })
    }

    /// Hand the whole fleet over to the ASG's native rolling replacement
    /// and poll it to completion.
    pub async fn refresh(&self) -> Result<(), LifecycleError> {
        const STAGE: &str = "refresh";
        let registry = self.registry();
        let active = registry
            .active_color(self.env)
            .await
            .map_err(Self::cloud("<none>", STAGE))?;
        if active == Color::None {
            return Err(LifecycleError::Precondition {
                instance: "<none>".to_string(),
                reason: format!("no active color recorded for {}", self.env),
            });
        }

        let asg_name = self.env.asg_name(active);
        let refresh_id = self
            .asg
            .start_refresh(&asg_name, self.tunables.min_healthy_percent)
            .await
            .map_err(Self::cloud("<none>", STAGE))?;
        info!("🔁 instance refresh {refresh_id} started on {asg_name}");

        let deadline = Instant::now() + Duration::from_secs(self.tunables.refresh_timeout_secs);
        loop {
            match self
                .asg
                .refresh_status(&asg_name, &refresh_id)
                .await
                .map_err(Self::cloud("<none>", STAGE))?
            {
                RefreshState::Successful => {
                    info!("✅ instance refresh {refresh_id} completed");
                    return Ok(());
                }
                RefreshState::Failed { reason } => {
                    return Err(Self::cloud("<none>", STAGE)(CloudError::new(
                        crate::error::CloudErrorKind::Unknown,
                        "asg.describe_instance_refreshes",
                        reason.unwrap_or_else(|| "instance refresh failed".to_string()),
                    )));
                }
                RefreshState::Cancelled => {
                    return Err(LifecycleError::Precondition {
                        instance: "<none>".to_string(),
                        reason: "instance refresh was cancelled outside this tool".to_string(),
                    });
                }
                RefreshState::Pending => {}
                RefreshState::InProgress { percent } => {
                    if let Some(percent) = percent {
                        info!("⏳ instance refresh {refresh_id}: {percent}%");
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::HealthTimeout {
                    instance: "<none>".to_string(),
                    stage: STAGE,
                });
            }
            tokio::time::sleep(Duration::from_secs(self.tunables.poll_interval_secs * 3)).await;
        }
    }
}
