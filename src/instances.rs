use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use crate::cloud::{AsgApi, ComputeApi, InstanceProtection, LoadBalancerApi, ParamStoreApi};
use crate::environment::Environment;
use crate::error::CloudError;
use crate::types::{Color, Instance, InstanceSnapshot, LifecycleState, TargetHealth};

/// Tag carrying the fleet color of a worker instance
pub const COLOR_TAG: &str = "Color";
/// Marker tag set when an instance is pulled out of service for debugging
pub const ISOLATED_TAG: &str = "fleet:isolated";

/// Produces consistent point-in-time views of an environment's instances.
///
/// Nothing is cached between calls; pollers re-read on every tick.
pub struct Registry<'a> {
    asg: &'a dyn AsgApi,
    compute: &'a dyn ComputeApi,
    lb: &'a dyn LoadBalancerApi,
    params: &'a dyn ParamStoreApi,
}

impl<'a> Registry<'a> {
    pub fn new(
        asg: &'a dyn AsgApi,
        compute: &'a dyn ComputeApi,
        lb: &'a dyn LoadBalancerApi,
        params: &'a dyn ParamStoreApi,
    ) -> Self {
        Self {
            asg,
            compute,
            lb,
            params,
        }
    }

    /// The color currently recorded as receiving traffic. `Color::None`
    /// means the environment has never been bootstrapped.
    pub async fn active_color(&self, env: Environment) -> Result<Color, CloudError> {
        match self.params.get(&env.active_color_key()).await? {
            None => Ok(Color::None),
            Some(value) => Color::parse(&value).map_err(|_| {
                CloudError::invalid(
                    "ssm.get_parameter",
                    format!(
                        "active-color key for {env} holds unexpected value {value:?}"
                    ),
                )
            }),
        }
    }

    /// The standby color a deployment would scale up. Inverting an
    /// unbootstrapped environment is an error: every caller needs a
    /// well-defined pair of colors before touching traffic.
    pub async fn inactive_color(&self, env: Environment) -> Result<Color, CloudError> {
        self.active_color(env).await?.invert().ok_or_else(|| {
            CloudError::not_found(
                "ssm.get_parameter",
                format!("no active color recorded for {env}"),
            )
        })
    }

    /// Enumerate both color ASGs, resolve tags and addresses, and
    /// cross-reference target-group health.
    pub async fn snapshot(&self, env: Environment) -> Result<InstanceSnapshot, CloudError> {
        let mut members: Vec<(String, LifecycleState, bool)> = Vec::new();
        for color in [Color::Blue, Color::Green] {
            match self.asg.describe(&env.asg_name(color)).await {
                Ok(detail) => {
                    for i in detail.instances {
                        members.push((
                            i.instance_id,
                            LifecycleState::from_asg(&i.lifecycle_state),
                            i.protected_from_scale_in,
                        ));
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!("no {} ASG for {}", color, env);
                }
                Err(e) => return Err(e),
            }
        }

        let ids: Vec<String> = members.iter().map(|(id, _, _)| id.clone()).collect();
        let described = self.compute.describe_instances(&ids).await?;
        let by_id: HashMap<&str, &crate::cloud::ComputeInstance> = described
            .iter()
            .map(|c| (c.instance_id.as_str(), c))
            .collect();

        let mut protections: HashMap<String, InstanceProtection> = HashMap::new();
        for id in &ids {
            match self.compute.protection(id).await {
                Ok(protection) => {
                    protections.insert(id.clone(), protection);
                }
                // Instances can vanish between the listing and the
                // attribute reads
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let mut health: HashMap<Color, HashMap<String, TargetHealth>> = HashMap::new();
        for color in [Color::Blue, Color::Green] {
            let tg_name = env.target_group_name(color);
            let arn = match self.lb.target_group_arn(&tg_name).await {
                Ok(arn) => arn,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let states = self.lb.target_health(&arn).await?;
            health.insert(color, states.into_iter().collect());
        }

        let instances = members
            .into_iter()
            .map(|(instance_id, lifecycle, scale_in_protected)| {
                let detail = by_id.get(instance_id.as_str());
                let color = detail
                    .and_then(|d| d.tags.get(COLOR_TAG))
                    .and_then(|v| Color::parse(v).ok())
                    .unwrap_or(Color::None);
                let isolated = detail
                    .and_then(|d| d.tags.get(ISOLATED_TAG))
                    .map(|v| v == "true")
                    .unwrap_or(false);
                let state = health
                    .get(&color)
                    .and_then(|targets| targets.get(&instance_id).copied())
                    .unwrap_or(TargetHealth::Unused);
                let protection = protections
                    .get(&instance_id)
                    .copied()
                    .unwrap_or_default();
                Instance {
                    instance_id,
                    color,
                    lifecycle,
                    isolated,
                    scale_in_protected,
                    stop_protected: protection.stop_protected,
                    termination_protected: protection.termination_protected,
                    private_ip: detail.and_then(|d| d.private_ip.clone()),
                    health: state,
                }
            })
            .collect();

        Ok(InstanceSnapshot {
            environment: env.name().to_string(),
            taken_at: Utc::now(),
            active_color: self.active_color(env).await?,
            instances,
        })
    }

    /// Count of targets serving for a color right now, straight from the
    /// load balancer and ASG with no snapshot assembly. Used by pollers.
    pub async fn serving_count(&self, env: Environment, color: Color) -> Result<u32, CloudError> {
        let tg_arn = self.lb.target_group_arn(&env.target_group_name(color)).await?;
        let states = self.lb.target_health(&tg_arn).await?;
        let healthy: Vec<&String> = states
            .iter()
            .filter(|(_, h)| *h == TargetHealth::Healthy)
            .map(|(id, _)| id)
            .collect();
        if healthy.is_empty() {
            return Ok(0);
        }

        let in_service: std::collections::HashSet<String> = self
            .asg
            .list_instances(&env.asg_name(color))
            .await?
            .into_iter()
            .filter(|i| LifecycleState::from_asg(&i.lifecycle_state) == LifecycleState::InService)
            .map(|i| i.instance_id)
            .collect();

        Ok(healthy
            .into_iter()
            .filter(|id| in_service.contains(id.as_str()))
            .count() as u32)
    }
}
