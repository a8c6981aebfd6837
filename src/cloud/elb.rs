use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, PathPatternConfig, RuleCondition, TargetDescription,
};

use super::{build_err, classify_sdk, with_retry, ListenerRule, LoadBalancerApi};
use crate::error::CloudError;
use crate::types::TargetHealth;

/// Adapter over the application load balancer service
#[derive(Debug, Clone)]
pub struct LoadBalancerAdapter {
    client: aws_sdk_elasticloadbalancingv2::Client,
}

impl LoadBalancerAdapter {
    pub fn new(sdk: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_elasticloadbalancingv2::Client::new(sdk),
        }
    }
}

#[async_trait]
impl LoadBalancerApi for LoadBalancerAdapter {
    async fn target_group_arn(&self, name: &str) -> Result<String, CloudError> {
        const OP: &str = "elb.describe_target_groups";
        let client = self.client.clone();
        let name = name.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            async move {
                client
                    .describe_target_groups()
                    .names(&name)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        resp.target_groups()
            .first()
            .and_then(|tg| tg.target_group_arn())
            .map(|arn| arn.to_string())
            .ok_or_else(|| CloudError::not_found(OP, format!("no target group named {name}")))
    }

    async fn target_health(
        &self,
        tg_arn: &str,
    ) -> Result<Vec<(String, TargetHealth)>, CloudError> {
        const OP: &str = "elb.describe_target_health";
        let client = self.client.clone();
        let tg_arn = tg_arn.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let tg_arn = tg_arn.clone();
            async move {
                client
                    .describe_target_health()
                    .target_group_arn(&tg_arn)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        let states = resp
            .target_health_descriptions()
            .iter()
            .filter_map(|desc| {
                let id = desc.target().map(|t| t.id())?;
                let state = desc
                    .target_health()
                    .and_then(|h| h.state())
                    .map(|s| TargetHealth::from_state(s.as_str()))
                    .unwrap_or(TargetHealth::Unused);
                Some((id.to_string(), state))
            })
            .collect();
        Ok(states)
    }

    async fn register(&self, tg_arn: &str, instance_id: &str) -> Result<(), CloudError> {
        const OP: &str = "elb.register_targets";
        let target = TargetDescription::builder()
            .id(instance_id)
            .build()
            .map_err(build_err(OP))?;
        let client = self.client.clone();
        let tg_arn = tg_arn.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let tg_arn = tg_arn.clone();
            let target = target.clone();
            async move {
                client
                    .register_targets()
                    .target_group_arn(&tg_arn)
                    .targets(target)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn deregister(&self, tg_arn: &str, instance_id: &str) -> Result<(), CloudError> {
        const OP: &str = "elb.deregister_targets";
        let target = TargetDescription::builder()
            .id(instance_id)
            .build()
            .map_err(build_err(OP))?;
        let client = self.client.clone();
        let tg_arn = tg_arn.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let tg_arn = tg_arn.clone();
            let target = target.clone();
            async move {
                client
                    .deregister_targets()
                    .target_group_arn(&tg_arn)
                    .targets(target)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<ListenerRule>, CloudError> {
        const OP: &str = "elb.describe_rules";
        let client = self.client.clone();
        let listener_arn = listener_arn.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let listener_arn = listener_arn.clone();
            async move {
                client
                    .describe_rules()
                    .listener_arn(&listener_arn)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        let rules = resp
            .rules()
            .iter()
            .map(|rule| {
                let path_patterns = rule
                    .conditions()
                    .iter()
                    .filter(|c| c.field() == Some("path-pattern"))
                    .flat_map(|c| {
                        c.path_pattern_config()
                            .map(|p| p.values().to_vec())
                            .unwrap_or_default()
                    })
                    .collect();
                let target_group_arn = rule.actions().iter().rev().find_map(|action| {
                    action
                        .target_group_arn()
                        .map(|s| s.to_string())
                        .or_else(|| {
                            action.forward_config().and_then(|f| {
                                f.target_groups()
                                    .first()
                                    .and_then(|tg| tg.target_group_arn())
                                    .map(|s| s.to_string())
                            })
                        })
                });
                ListenerRule {
                    rule_arn: rule.rule_arn().unwrap_or_default().to_string(),
                    priority: rule.priority().unwrap_or_default().to_string(),
                    is_default: rule.is_default().unwrap_or(false),
                    path_patterns,
                    target_group_arn,
                }
            })
            .collect();
        Ok(rules)
    }

    async fn set_rule_forward(&self, rule_arn: &str, tg_arn: &str) -> Result<(), CloudError> {
        const OP: &str = "elb.modify_rule_forward";
        let action = Action::builder()
            .r#type(ActionTypeEnum::Forward)
            .target_group_arn(tg_arn)
            .build()
            .map_err(build_err(OP))?;
        let client = self.client.clone();
        let rule_arn = rule_arn.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let rule_arn = rule_arn.clone();
            let action = action.clone();
            async move {
                client
                    .modify_rule()
                    .rule_arn(&rule_arn)
                    .actions(action)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn set_rule_patterns(
        &self,
        rule_arn: &str,
        patterns: &[String],
    ) -> Result<(), CloudError> {
        const OP: &str = "elb.modify_rule_patterns";
        let condition = RuleCondition::builder()
            .field("path-pattern")
            .path_pattern_config(
                PathPatternConfig::builder()
                    .set_values(Some(patterns.to_vec()))
                    .build(),
            )
            .build();
        let client = self.client.clone();
        let rule_arn = rule_arn.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let rule_arn = rule_arn.clone();
            let condition = condition.clone();
            async move {
                client
                    .modify_rule()
                    .rule_arn(&rule_arn)
                    .conditions(condition)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }
}
