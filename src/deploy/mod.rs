use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cloud::{AsgApi, CdnApi, ComputeApi, LoadBalancerApi, ParamStoreApi};
use crate::config::DeployTunables;
use crate::environment::Environment;
use crate::error::{DeployError, FleetError};
use crate::instances::Registry;
use crate::notify::NotifyMode;
use crate::types::{BlueGreenStatus, Color};

pub mod lock;

pub use lock::{DeployLock, LeaseRecord};

/// Ephemeral plan computed at the start of a deployment
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub environment: Environment,
    pub version: String,
    pub active_color: Color,
    pub inactive_color: Color,
    pub desired_capacity: u32,
    pub min_healthy_percent: u32,
    pub notify: NotifyMode,
    /// Version the active side was serving when the plan was made
    pub active_version: Option<String>,
    /// Pre-deploy value of the inactive version key, restored on rollback
    pub previous_inactive_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub version: String,
    /// Required when the environment is currently drained
    pub capacity: Option<u32>,
    pub notify: NotifyMode,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub environment: String,
    pub version: String,
    pub from_color: Color,
    pub to_color: Color,
    pub capacity: u32,
    pub switched: bool,
    pub dry_run: bool,
    /// Version that was live before the switch, fed to the notifier
    pub previous_version: Option<String>,
}

/// Healthy-target count needed to satisfy the min-healthy policy
pub fn required_quorum(total: u32, min_healthy_percent: u32) -> u32 {
    (total * min_healthy_percent).div_ceil(100)
}

#[derive(Debug, PartialEq, Eq)]
pub enum QuorumDecision {
    Satisfied,
    Wait,
    Stalled,
}

/// Tracks health polls for the scaling-up color.
///
/// Success requires the full desired capacity and the quorum floor to hold
/// for two observations spaced at least `gap` apart. A bounded run of
/// polls without the healthy count improving counts as a stall.
pub struct QuorumTracker {
    required: u32,
    quorum: u32,
    gap: Duration,
    stall_limit: u32,
    first_met: Option<Instant>,
    best: u32,
    stalled_polls: u32,
}

impl QuorumTracker {
    pub fn new(required: u32, quorum: u32, gap: Duration, stall_limit: u32) -> Self {
        Self {
            required,
            quorum,
            gap,
            stall_limit,
            first_met: None,
            best: 0,
            stalled_polls: 0,
        }
    }

    pub fn observe(&mut self, serving: u32, now: Instant) -> QuorumDecision {
        let target = self.required.max(self.quorum);
        if serving >= target {
            return match self.first_met {
                Some(first) if now.duration_since(first) >= self.gap => QuorumDecision::Satisfied,
                Some(_) => QuorumDecision::Wait,
                None => {
                    self.first_met = Some(now);
                    QuorumDecision::Wait
                }
            };
        }

        self.first_met = None;
        if serving > self.best {
            self.best = serving;
            self.stalled_polls = 0;
        } else {
            self.stalled_polls += 1;
            if self.stalled_polls >= self.stall_limit {
                return QuorumDecision::Stalled;
            }
        }
        QuorumDecision::Wait
    }
}

struct RuleSwitch {
    rule_arn: String,
    old_tg_arn: String,
}

/// Drives one blue/green deployment as a strict state machine:
/// plan, record version, scale up, await healthy, switch traffic,
/// protect the new side, scale down the old side.
///
/// The deploy lock is taken in `run` and held until `finish` so the
/// warn-only follow-up phases (routing sync, notification) stay under the
/// same exclusion.
pub struct BlueGreenDeploy<'a> {
    env: Environment,
    tunables: &'a DeployTunables,
    asg: &'a dyn AsgApi,
    compute: &'a dyn ComputeApi,
    lb: &'a dyn LoadBalancerApi,
    params: &'a dyn ParamStoreApi,
    listener_arn: String,
    cdn: Option<(&'a dyn CdnApi, String)>,
    lock: Option<DeployLock>,
}

impl<'a> BlueGreenDeploy<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: Environment,
        tunables: &'a DeployTunables,
        asg: &'a dyn AsgApi,
        compute: &'a dyn ComputeApi,
        lb: &'a dyn LoadBalancerApi,
        params: &'a dyn ParamStoreApi,
        listener_arn: String,
    ) -> Self {
        Self {
            env,
            tunables,
            asg,
            compute,
            lb,
            params,
            listener_arn,
            cdn: None,
            lock: None,
        }
    }

    /// Invalidate the given distribution after a successful switch
    pub fn with_cdn(mut self, cdn: &'a dyn CdnApi, distribution_id: String) -> Self {
        self.cdn = Some((cdn, distribution_id));
        self
    }

    fn registry(&self) -> Registry<'a> {
        Registry::new(self.asg, self.compute, self.lb, self.params)
    }

    pub async fn run(&mut self, opts: &DeployOptions) -> Result<DeployReport, DeployError> {
        let lock =
            DeployLock::acquire(self.params, self.env, self.tunables.lease_ttl_secs).await?;
        info!("🔒 deploy lock for {} taken by {}", self.env, lock.owner);
        self.lock = Some(lock);

        match self.run_locked(opts).await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.finish().await;
                Err(err)
            }
        }
    }

    /// Release the deploy lock. Failure only delays the next deploy until
    /// the lease expires, so it is logged rather than surfaced.
    pub async fn finish(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Err(e) = lock.release(self.params).await {
                warn!("failed to release deploy lock for {}: {e}", self.env);
            }
        }
    }

    async fn run_locked(&mut self, opts: &DeployOptions) -> Result<DeployReport, DeployError> {
        let plan = self.plan(opts).await?;
        info!(
            "📋 deploying {} to {}: {} -> {} at capacity {}",
            plan.version, plan.environment, plan.active_color, plan.inactive_color,
            plan.desired_capacity
        );

        if opts.dry_run {
            return Ok(self.report(&plan, false, true));
        }

        self.record_version(&plan).await?;
        self.scale_up(&plan).await?;
        self.await_healthy(&plan).await?;
        let switch = self.switch(&plan).await?;
        self.protect_new(&plan).await?;
        self.scale_down_old(&plan).await?;
        self.invalidate_cdn().await;

        info!(
            "✅ {} now live on {} {}",
            plan.version, plan.environment, plan.inactive_color
        );
        Ok(self.report(&plan, switch, false))
    }

    fn report(&self, plan: &DeploymentPlan, switched: bool, dry_run: bool) -> DeployReport {
        DeployReport {
            environment: plan.environment.name().to_string(),
            version: plan.version.clone(),
            from_color: plan.active_color,
            to_color: plan.inactive_color,
            capacity: plan.desired_capacity,
            switched,
            dry_run,
            previous_version: plan.active_version.clone(),
        }
    }

    async fn plan(&self, opts: &DeployOptions) -> Result<DeploymentPlan, DeployError> {
        const STAGE: &str = "plan";
        let registry = self.registry();

        let active = registry
            .active_color(self.env)
            .await
            .map_err(DeployError::cloud(STAGE))?;
        let inactive = registry.inactive_color(self.env).await.map_err(|e| {
            // The registry reports an uninvertible color as absent; that is
            // an operator precondition here, not a cloud failure.
            if e.is_not_found() {
                DeployError::Precondition(format!(
                    "no active color recorded for {}; bootstrap the environment first",
                    self.env
                ))
            } else {
                DeployError::Cloud {
                    stage: STAGE,
                    source: e,
                }
            }
        })?;

        let active_version = self
            .params
            .get(&self.env.version_key(active))
            .await
            .map_err(DeployError::cloud(STAGE))?;
        if active_version.as_deref() == Some(opts.version.as_str()) {
            return Err(DeployError::Precondition(format!(
                "{} is already live on {} {}",
                opts.version, self.env, active
            )));
        }

        let active_detail = self
            .asg
            .describe(&self.env.asg_name(active))
            .await
            .map_err(DeployError::cloud(STAGE))?;
        let desired_capacity = match (active_detail.desired_capacity, opts.capacity) {
            (0, None) => {
                return Err(DeployError::Precondition(format!(
                    "{} is currently drained; pass --capacity to deploy",
                    self.env
                )));
            }
            (_, Some(explicit)) if explicit > 0 => explicit,
            (_, Some(_)) => {
                return Err(DeployError::Precondition(
                    "--capacity must be at least 1".to_string(),
                ));
            }
            (current, None) => current,
        };

        let previous_inactive_version = self
            .params
            .get(&self.env.version_key(inactive))
            .await
            .map_err(DeployError::cloud(STAGE))?;

        Ok(DeploymentPlan {
            environment: self.env,
            version: opts.version.clone(),
            active_color: active,
            inactive_color: inactive,
            desired_capacity,
            min_healthy_percent: self.tunables.min_healthy_percent,
            notify: opts.notify,
            active_version,
            previous_inactive_version,
        })
    }

    /// Write the version key the new instances read at boot
    async fn record_version(&self, plan: &DeploymentPlan) -> Result<(), DeployError> {
        const STAGE: &str = "record-version";
        let key = self.env.version_key(plan.inactive_color);
        if let Err(e) = self.params.put(&key, &plan.version, false).await {
            self.rollback(plan, None).await;
            return Err(DeployError::Cloud { stage: STAGE, source: e });
        }
        Ok(())
    }

    async fn scale_up(&self, plan: &DeploymentPlan) -> Result<(), DeployError> {
        const STAGE: &str = "scale-up";
        let asg_name = self.env.asg_name(plan.inactive_color);
        info!(
            "📈 scaling {} to {} instances",
            asg_name, plan.desired_capacity
        );
        let result = async {
            self.asg
                .set_desired_capacity(&asg_name, plan.desired_capacity)
                .await?;
            self.asg.set_min_size(&asg_name, plan.desired_capacity).await
        }
        .await;
        if let Err(e) = result {
            self.rollback(plan, None).await;
            return Err(DeployError::Cloud { stage: STAGE, source: e });
        }
        Ok(())
    }

    async fn await_healthy(&self, plan: &DeploymentPlan) -> Result<(), DeployError> {
        const STAGE: &str = "await-healthy";
        let registry = self.registry();
        let quorum = required_quorum(plan.desired_capacity, plan.min_healthy_percent);
        let mut tracker = QuorumTracker::new(
            plan.desired_capacity,
            quorum,
            Duration::from_secs(self.tunables.quorum_gap_secs),
            self.tunables.stall_polls,
        );
        let base_interval = Duration::from_secs(self.tunables.poll_interval_secs);
        let max_interval = Duration::from_secs(self.tunables.poll_max_interval_secs);
        let deadline = Instant::now() + Duration::from_secs(self.tunables.timeout_secs);
        let mut interval = base_interval;

        loop {
            match registry.serving_count(self.env, plan.inactive_color).await {
                Ok(serving) => {
                    interval = base_interval;
                    info!(
                        "⏳ {} {}: {}/{} serving",
                        self.env, plan.inactive_color, serving, plan.desired_capacity
                    );
                    match tracker.observe(serving, Instant::now()) {
                        QuorumDecision::Satisfied => return Ok(()),
                        QuorumDecision::Stalled => {
                            self.rollback(plan, None).await;
                            return Err(DeployError::Stalled { stage: STAGE });
                        }
                        QuorumDecision::Wait => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!("health poll failed, backing off: {e}");
                    interval = (interval * 2).min(max_interval);
                }
                Err(e) => {
                    self.rollback(plan, None).await;
                    return Err(DeployError::Cloud { stage: STAGE, source: e });
                }
            }

            if Instant::now() + interval >= deadline {
                self.rollback(plan, None).await;
                return Err(DeployError::Timeout { stage: STAGE });
            }
            // Ctrl-C while waiting takes the same path as the deadline:
            // nothing has committed yet, so roll back and report.
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted; rolling back {} deploy", self.env);
                    self.rollback(plan, None).await;
                    return Err(DeployError::Timeout { stage: STAGE });
                }
            }
        }
    }

    /// The traffic-switch commit: active-color key first, then the
    /// listener rule. The rule mutation is the observable commit point;
    /// if it fails the key is rolled back immediately.
    async fn switch(&self, plan: &DeploymentPlan) -> Result<bool, DeployError> {
        const STAGE: &str = "switch";
        let old_tg = self
            .lb
            .target_group_arn(&self.env.target_group_name(plan.active_color))
            .await;
        let new_tg = self
            .lb
            .target_group_arn(&self.env.target_group_name(plan.inactive_color))
            .await;
        let (old_tg, new_tg) = match (old_tg, new_tg) {
            (Ok(old), Ok(new)) => (old, new),
            (Err(e), _) | (_, Err(e)) => {
                self.rollback(plan, None).await;
                return Err(DeployError::Cloud { stage: STAGE, source: e });
            }
        };

        let rules = match self.lb.describe_rules(&self.listener_arn).await {
            Ok(rules) => rules,
            Err(e) => {
                self.rollback(plan, None).await;
                return Err(DeployError::Cloud { stage: STAGE, source: e });
            }
        };
        let rule = rules.iter().find(|r| {
            r.target_group_arn.as_deref() == Some(old_tg.as_str())
                || r.target_group_arn.as_deref() == Some(new_tg.as_str())
        });
        let Some(rule) = rule else {
            self.rollback(plan, None).await;
            return Err(DeployError::InvariantViolation(format!(
                "no rule on {} forwards to the {} target groups",
                self.listener_arn, self.env
            )));
        };
        let rule_arn = rule.rule_arn.clone();

        if let Err(e) = self
            .params
            .put(&self.env.active_color_key(), plan.inactive_color.as_str(), false)
            .await
        {
            self.rollback(plan, None).await;
            return Err(DeployError::Cloud { stage: STAGE, source: e });
        }

        if let Err(e) = self.lb.set_rule_forward(&rule_arn, &new_tg).await {
            // The key already names the new color; undo it before anything
            // else so readers never see the half-switched state for long.
            if let Err(restore) = self
                .params
                .put(&self.env.active_color_key(), plan.active_color.as_str(), false)
                .await
            {
                warn!(
                    "active-color key for {} could not be restored: {restore}",
                    self.env
                );
            }
            self.rollback(
                plan,
                Some(&RuleSwitch {
                    rule_arn,
                    old_tg_arn: old_tg,
                }),
            )
            .await;
            return Err(DeployError::Cloud { stage: STAGE, source: e });
        }

        info!(
            "🔀 traffic for {} switched to {}",
            self.env, plan.inactive_color
        );
        Ok(true)
    }

    /// Keep the fresh fleet from being scaled in while it warms, and
    /// drop any stale per-instance protections on the old side.
    async fn protect_new(&self, plan: &DeploymentPlan) -> Result<(), DeployError> {
        const STAGE: &str = "protect-new";
        let new_asg = self.env.asg_name(plan.inactive_color);
        self.asg
            .set_min_size(&new_asg, plan.desired_capacity)
            .await
            .map_err(DeployError::cloud(STAGE))?;

        let old_asg = self.env.asg_name(plan.active_color);
        let stale: Vec<String> = self
            .asg
            .list_instances(&old_asg)
            .await
            .map_err(DeployError::cloud(STAGE))?
            .into_iter()
            .filter(|i| i.protected_from_scale_in)
            .map(|i| i.instance_id)
            .collect();
        if !stale.is_empty() {
            self.asg
                .set_scale_in_protection(&old_asg, &stale, false)
                .await
                .map_err(DeployError::cloud(STAGE))?;
        }
        Ok(())
    }

    /// Old side drains on its own; deliberately not awaited
    async fn scale_down_old(&self, plan: &DeploymentPlan) -> Result<(), DeployError> {
        const STAGE: &str = "scale-down-old";
        let old_asg = self.env.asg_name(plan.active_color);
        info!("📉 scaling {} to 0", old_asg);
        self.asg
            .set_min_size(&old_asg, 0)
            .await
            .map_err(DeployError::cloud(STAGE))?;
        self.asg
            .set_desired_capacity(&old_asg, 0)
            .await
            .map_err(DeployError::cloud(STAGE))?;
        Ok(())
    }

    async fn invalidate_cdn(&self) {
        if let Some((cdn, distribution)) = &self.cdn {
            match cdn.invalidate(distribution, &["/*".to_string()]).await {
                Ok(id) => info!("🧹 CDN invalidation {id} submitted for {distribution}"),
                Err(e) => warn!("CDN invalidation for {distribution} failed: {e}"),
            }
        }
    }

    /// Restore the pre-deploy world: active color key, inactive version
    /// key, the listener rule when the switch had been attempted, and the
    /// failed side scaled back to zero. Every restore failure is logged;
    /// recovery stays with the operator.
    async fn rollback(&self, plan: &DeploymentPlan, rule: Option<&RuleSwitch>) {
        warn!(
            "⏪ rolling back {} deploy of {}",
            plan.environment, plan.version
        );

        if let Err(e) = self
            .params
            .put(&self.env.active_color_key(), plan.active_color.as_str(), false)
            .await
        {
            warn!("rollback: active-color key not restored: {e}");
        }

        if let Some(switch) = rule {
            if let Err(e) = self
                .lb
                .set_rule_forward(&switch.rule_arn, &switch.old_tg_arn)
                .await
            {
                warn!("rollback: listener rule not restored: {e}");
            }
        }

        let version_key = self.env.version_key(plan.inactive_color);
        let result = match &plan.previous_inactive_version {
            Some(previous) => self.params.put(&version_key, previous, false).await,
            None => self.params.delete(&version_key).await,
        };
        if let Err(e) = result {
            warn!("rollback: version key not restored: {e}");
        }

        let failed_asg = self.env.asg_name(plan.inactive_color);
        if let Err(e) = self.asg.set_min_size(&failed_asg, 0).await {
            warn!("rollback: min size of {failed_asg} not reset: {e}");
        }
        if let Err(e) = self.asg.set_desired_capacity(&failed_asg, 0).await {
            warn!("rollback: desired capacity of {failed_asg} not reset: {e}");
        }
    }
}

/// Point traffic back at the standby color without a redeploy.
///
/// Useful right after a bad release while the previous fleet is still
/// warm; refuses to run when the standby side has nothing serving.
pub async fn switch_back(
    env: Environment,
    asg: &dyn AsgApi,
    compute: &dyn ComputeApi,
    lb: &dyn LoadBalancerApi,
    params: &dyn ParamStoreApi,
    listener_arn: &str,
) -> Result<DeployReport, DeployError> {
    const STAGE: &str = "switch-back";
    let registry = Registry::new(asg, compute, lb, params);

    let active = registry
        .active_color(env)
        .await
        .map_err(DeployError::cloud(STAGE))?;
    let standby = registry.inactive_color(env).await.map_err(|e| {
        if e.is_not_found() {
            DeployError::Precondition(format!("no active color recorded for {env}"))
        } else {
            DeployError::Cloud {
                stage: STAGE,
                source: e,
            }
        }
    })?;

    let serving = registry
        .serving_count(env, standby)
        .await
        .map_err(DeployError::cloud(STAGE))?;
    if serving == 0 {
        return Err(DeployError::Precondition(format!(
            "{standby} side of {env} has no serving targets to switch back to"
        )));
    }

    let standby_tg = lb
        .target_group_arn(&env.target_group_name(standby))
        .await
        .map_err(DeployError::cloud(STAGE))?;
    let active_tg = lb
        .target_group_arn(&env.target_group_name(active))
        .await
        .map_err(DeployError::cloud(STAGE))?;
    let rules = lb
        .describe_rules(listener_arn)
        .await
        .map_err(DeployError::cloud(STAGE))?;
    let rule = rules
        .iter()
        .find(|r| {
            r.target_group_arn.as_deref() == Some(active_tg.as_str())
                || r.target_group_arn.as_deref() == Some(standby_tg.as_str())
        })
        .ok_or_else(|| {
            DeployError::InvariantViolation(format!(
                "no rule on {listener_arn} forwards to the {env} target groups"
            ))
        })?;

    params
        .put(&env.active_color_key(), standby.as_str(), false)
        .await
        .map_err(DeployError::cloud(STAGE))?;
    if let Err(e) = lb.set_rule_forward(&rule.rule_arn, &standby_tg).await {
        if let Err(restore) = params
            .put(&env.active_color_key(), active.as_str(), false)
            .await
        {
            warn!("active-color key for {env} could not be restored: {restore}");
        }
        return Err(DeployError::Cloud { stage: STAGE, source: e });
    }

    let version = params
        .get(&env.version_key(standby))
        .await
        .map_err(DeployError::cloud(STAGE))?;
    Ok(DeployReport {
        environment: env.name().to_string(),
        version: version.unwrap_or_else(|| "unknown".to_string()),
        from_color: active,
        to_color: standby,
        capacity: serving,
        switched: true,
        dry_run: false,
        previous_version: None,
    })
}

/// Assemble the `blue-green status` report, including drift detection
/// between the active-color key and the listener rule.
pub async fn status(
    env: Environment,
    asg: &dyn AsgApi,
    compute: &dyn ComputeApi,
    lb: &dyn LoadBalancerApi,
    params: &dyn ParamStoreApi,
    listener_arn: Option<&str>,
) -> Result<BlueGreenStatus, FleetError> {
    let registry = Registry::new(asg, compute, lb, params);
    let active = registry.active_color(env).await?;

    let blue_version = params.get(&env.version_key(Color::Blue)).await?;
    let green_version = params.get(&env.version_key(Color::Green)).await?;

    let mut desired = [0u32; 2];
    let mut serving = [0u32; 2];
    for (idx, color) in [Color::Blue, Color::Green].into_iter().enumerate() {
        match asg.describe(&env.asg_name(color)).await {
            Ok(detail) => desired[idx] = detail.desired_capacity,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
        serving[idx] = match registry.serving_count(env, color).await {
            Ok(n) => n,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e.into()),
        };
    }

    let mut drift = None;
    if let Some(listener_arn) = listener_arn {
        drift = detect_drift(env, lb, listener_arn, active).await?;
    }

    Ok(BlueGreenStatus {
        environment: env.name().to_string(),
        active_color: active,
        blue_version,
        green_version,
        blue_serving: serving[0],
        green_serving: serving[1],
        blue_desired: desired[0],
        green_desired: desired[1],
        drift,
    })
}

async fn detect_drift(
    env: Environment,
    lb: &dyn LoadBalancerApi,
    listener_arn: &str,
    recorded: Color,
) -> Result<Option<String>, FleetError> {
    let mut arns = Vec::new();
    for color in [Color::Blue, Color::Green] {
        match lb.target_group_arn(&env.target_group_name(color)).await {
            Ok(arn) => arns.push((color, arn)),
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let rules = lb.describe_rules(listener_arn).await?;
    let routed = rules.iter().find_map(|r| {
        arns.iter()
            .find(|(_, arn)| r.target_group_arn.as_deref() == Some(arn.as_str()))
            .map(|(color, _)| *color)
    });

    Ok(match routed {
        Some(color) if color != recorded => Some(format!(
            "listener rule sends traffic to {color} but the active-color key says {recorded}"
        )),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_rounds_up() {
        assert_eq!(required_quorum(2, 75), 2);
        assert_eq!(required_quorum(4, 75), 3);
        assert_eq!(required_quorum(10, 75), 8);
        assert_eq!(required_quorum(0, 75), 0);
        assert_eq!(required_quorum(3, 100), 3);
    }

    #[tokio::test]
    async fn quorum_needs_two_spaced_confirmations() {
        let gap = Duration::from_secs(30);
        let mut tracker = QuorumTracker::new(2, 2, gap, 10);
        let start = Instant::now();

        assert_eq!(tracker.observe(2, start), QuorumDecision::Wait);
        // Second confirmation too soon after the first
        assert_eq!(
            tracker.observe(2, start + Duration::from_secs(10)),
            QuorumDecision::Wait
        );
        assert_eq!(
            tracker.observe(2, start + Duration::from_secs(31)),
            QuorumDecision::Satisfied
        );
    }

    #[tokio::test]
    async fn quorum_confirmation_resets_on_dip() {
        let gap = Duration::from_secs(30);
        let mut tracker = QuorumTracker::new(2, 2, gap, 10);
        let start = Instant::now();

        assert_eq!(tracker.observe(2, start), QuorumDecision::Wait);
        assert_eq!(
            tracker.observe(1, start + Duration::from_secs(15)),
            QuorumDecision::Wait
        );
        // Back at quorum, but the clock starts over
        assert_eq!(
            tracker.observe(2, start + Duration::from_secs(31)),
            QuorumDecision::Wait
        );
        assert_eq!(
            tracker.observe(2, start + Duration::from_secs(62)),
            QuorumDecision::Satisfied
        );
    }

    #[tokio::test]
    async fn stalled_when_health_never_improves() {
        let mut tracker = QuorumTracker::new(2, 2, Duration::from_secs(30), 3);
        let start = Instant::now();

        assert_eq!(tracker.observe(1, start), QuorumDecision::Wait);
        assert_eq!(
            tracker.observe(1, start + Duration::from_secs(15)),
            QuorumDecision::Wait
        );
        assert_eq!(
            tracker.observe(1, start + Duration::from_secs(30)),
            QuorumDecision::Wait
        );
        assert_eq!(
            tracker.observe(1, start + Duration::from_secs(45)),
            QuorumDecision::Stalled
        );
    }

    #[tokio::test]
    async fn progress_resets_the_stall_counter() {
        let mut tracker = QuorumTracker::new(3, 3, Duration::from_secs(30), 2);
        let start = Instant::now();

        assert_eq!(tracker.observe(0, start), QuorumDecision::Wait);
        assert_eq!(
            tracker.observe(1, start + Duration::from_secs(15)),
            QuorumDecision::Wait
        );
        assert_eq!(
            tracker.observe(2, start + Duration::from_secs(30)),
            QuorumDecision::Wait
        );
        assert_eq!(
            tracker.observe(2, start + Duration::from_secs(45)),
            QuorumDecision::Wait
        );
        assert_eq!(
            tracker.observe(2, start + Duration::from_secs(60)),
            QuorumDecision::Stalled
        );
    }
}
