use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cloud::{ListenerRule, LoadBalancerApi, ParamStoreApi};
use crate::deploy::DeployLock;
use crate::environment::Environment;
use crate::error::{CloudError, DeployError, FleetError};
use crate::types::RuleState;

/// Path pattern that can never match a real request; parking the primary
/// rule on it makes traffic fall through to the instance fallback rule
/// within seconds.
pub const SENTINEL: &str = "/__disabled__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatus {
    pub environment: String,
    pub state: RuleState,
}

/// Classify a primary rule's current path patterns
pub fn classify(patterns: &[String]) -> RuleState {
    if patterns.iter().any(|p| p == SENTINEL) {
        RuleState::KillswitchActive
    } else {
        RuleState::Enabled
    }
}

/// Locate the environment's primary (queue-path) rule by the router
/// target group it forwards to; the path patterns cannot identify it
/// because the kill-switch rewrites them.
async fn find_primary_rule(
    lb: &dyn LoadBalancerApi,
    listener_arn: &str,
    env: Environment,
) -> Result<Option<ListenerRule>, CloudError> {
    let router_tg = match lb.target_group_arn(&env.router_target_group_name()).await {
        Ok(arn) => arn,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    let rules = lb.describe_rules(listener_arn).await?;
    Ok(rules
        .into_iter()
        .find(|r| r.target_group_arn.as_deref() == Some(router_tg.as_str())))
}

/// The kill-switch and the blue/green controller share the traffic
/// surface, so mutation is refused while a deploy lease is live.
async fn refuse_during_deploy(
    params: &dyn ParamStoreApi,
    env: Environment,
) -> Result<(), FleetError> {
    if let Some(lease) = DeployLock::current(params, env).await? {
        if !lease.is_expired_at(Utc::now()) {
            return Err(DeployError::LockHeld {
                owner: lease.owner,
                expires_at: lease.expires_at.to_rfc3339(),
            }
            .into());
        }
    }
    Ok(())
}

/// Park the primary rule on the sentinel, cutting the queue path off
pub async fn disable(
    lb: &dyn LoadBalancerApi,
    params: &dyn ParamStoreApi,
    listener_arn: &str,
    env: Environment,
) -> Result<RouterStatus, FleetError> {
    refuse_during_deploy(params, env).await?;

    let rule = find_primary_rule(lb, listener_arn, env)
        .await?
        .ok_or_else(|| {
            CloudError::not_found(
                "elb.describe_rules",
                format!("no primary router rule for {env} on {listener_arn}"),
            )
        })?;

    lb.set_rule_patterns(&rule.rule_arn, &[SENTINEL.to_string()])
        .await?;
    info!("🛑 {} queue routing disabled; traffic falls back to instances", env);
    Ok(RouterStatus {
        environment: env.name().to_string(),
        state: RuleState::KillswitchActive,
    })
}

/// Restore the primary rule's patterns from the environment template
pub async fn enable(
    lb: &dyn LoadBalancerApi,
    params: &dyn ParamStoreApi,
    listener_arn: &str,
    env: Environment,
) -> Result<RouterStatus, FleetError> {
    refuse_during_deploy(params, env).await?;

    let rule = find_primary_rule(lb, listener_arn, env)
        .await?
        .ok_or_else(|| {
            CloudError::not_found(
                "elb.describe_rules",
                format!("no primary router rule for {env} on {listener_arn}"),
            )
        })?;

    lb.set_rule_patterns(&rule.rule_arn, &env.router_path_patterns())
        .await?;
    info!("✅ {} queue routing restored", env);
    Ok(RouterStatus {
        environment: env.name().to_string(),
        state: RuleState::Enabled,
    })
}

/// Report the kill-switch state for the given environments
pub async fn status(
    lb: &dyn LoadBalancerApi,
    listener_arn: &str,
    environments: &[Environment],
) -> Result<Vec<RouterStatus>, FleetError> {
    let mut out = Vec::with_capacity(environments.len());
    for env in environments {
        let state = match find_primary_rule(lb, listener_arn, *env).await? {
            Some(rule) => classify(&rule.path_patterns),
            None => RuleState::NotFound,
        };
        out.push(RouterStatus {
            environment: env.name().to_string(),
            state,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_patterns_classify_as_killswitched() {
        assert_eq!(
            classify(&[SENTINEL.to_string()]),
            RuleState::KillswitchActive
        );
        assert_eq!(
            classify(&Environment::Beta.router_path_patterns()),
            RuleState::Enabled
        );
    }
}
