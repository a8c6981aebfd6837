use async_trait::async_trait;
use aws_sdk_autoscaling::types::RefreshPreferences;

use super::{classify_sdk, with_retry, AsgApi, AsgDetail, AsgInstance, RefreshState};
use crate::error::CloudError;

/// Adapter over the auto-scaling service
#[derive(Debug, Clone)]
pub struct AsgAdapter {
    client: aws_sdk_autoscaling::Client,
}

impl AsgAdapter {
    pub fn new(sdk: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_autoscaling::Client::new(sdk),
        }
    }
}

#[async_trait]
impl AsgApi for AsgAdapter {
    async fn describe(&self, name: &str) -> Result<AsgDetail, CloudError> {
        const OP: &str = "asg.describe";
        let client = self.client.clone();
        let name = name.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            async move {
                client
                    .describe_auto_scaling_groups()
                    .auto_scaling_group_names(&name)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        let group = resp
            .auto_scaling_groups()
            .first()
            .ok_or_else(|| CloudError::not_found(OP, format!("no such ASG: {name}")))?;

        let instances = group
            .instances()
            .iter()
            .map(|i| AsgInstance {
                instance_id: i.instance_id().to_string(),
                lifecycle_state: i.lifecycle_state().as_str().to_string(),
                protected_from_scale_in: i.protected_from_scale_in(),
            })
            .collect();

        Ok(AsgDetail {
            name: group.auto_scaling_group_name().to_string(),
            desired_capacity: group.desired_capacity().max(0) as u32,
            min_size: group.min_size().max(0) as u32,
            max_size: group.max_size().max(0) as u32,
            instances,
        })
    }

    async fn set_desired_capacity(&self, name: &str, desired: u32) -> Result<(), CloudError> {
        const OP: &str = "asg.set_desired_capacity";
        let client = self.client.clone();
        let name = name.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            async move {
                client
                    .set_desired_capacity()
                    .auto_scaling_group_name(&name)
                    .desired_capacity(desired as i32)
                    .honor_cooldown(false)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn set_min_size(&self, name: &str, min: u32) -> Result<(), CloudError> {
        const OP: &str = "asg.set_min_size";
        let client = self.client.clone();
        let name = name.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            async move {
                client
                    .update_auto_scaling_group()
                    .auto_scaling_group_name(&name)
                    .min_size(min as i32)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn enter_standby(&self, name: &str, instance_id: &str) -> Result<(), CloudError> {
        const OP: &str = "asg.enter_standby";
        let client = self.client.clone();
        let name = name.to_string();
        let instance_id = instance_id.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            let instance_id = instance_id.clone();
            async move {
                client
                    .enter_standby()
                    .auto_scaling_group_name(&name)
                    .instance_ids(&instance_id)
                    .should_decrement_desired_capacity(true)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn exit_standby(&self, name: &str, instance_id: &str) -> Result<(), CloudError> {
        const OP: &str = "asg.exit_standby";
        let client = self.client.clone();
        let name = name.to_string();
        let instance_id = instance_id.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            let instance_id = instance_id.clone();
            async move {
                client
                    .exit_standby()
                    .auto_scaling_group_name(&name)
                    .instance_ids(&instance_id)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn set_scale_in_protection(
        &self,
        name: &str,
        instance_ids: &[String],
        protected: bool,
    ) -> Result<(), CloudError> {
        const OP: &str = "asg.set_instance_protection";
        if instance_ids.is_empty() {
            return Ok(());
        }
        let client = self.client.clone();
        let name = name.to_string();
        let ids = instance_ids.to_vec();
        with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            let ids = ids.clone();
            async move {
                client
                    .set_instance_protection()
                    .auto_scaling_group_name(&name)
                    .set_instance_ids(Some(ids))
                    .protected_from_scale_in(protected)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn start_refresh(
        &self,
        name: &str,
        min_healthy_percent: u32,
    ) -> Result<String, CloudError> {
        const OP: &str = "asg.start_instance_refresh";
        let client = self.client.clone();
        let name = name.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            async move {
                client
                    .start_instance_refresh()
                    .auto_scaling_group_name(&name)
                    .preferences(
                        RefreshPreferences::builder()
                            .min_healthy_percentage(min_healthy_percent as i32)
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        resp.instance_refresh_id()
            .map(|s| s.to_string())
            .ok_or_else(|| CloudError::invalid(OP, "refresh started without an id"))
    }

    async fn refresh_status(
        &self,
        name: &str,
        refresh_id: &str,
    ) -> Result<RefreshState, CloudError> {
        const OP: &str = "asg.describe_instance_refreshes";
        let client = self.client.clone();
        let name = name.to_string();
        let refresh_id = refresh_id.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            let refresh_id = refresh_id.clone();
            async move {
                client
                    .describe_instance_refreshes()
                    .auto_scaling_group_name(&name)
                    .instance_refresh_ids(&refresh_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        let refresh = resp
            .instance_refreshes()
            .first()
            .ok_or_else(|| CloudError::not_found(OP, format!("no refresh {refresh_id}")))?;

        let state = match refresh.status().map(|s| s.as_str()) {
            Some("Pending") => RefreshState::Pending,
            Some("InProgress") | Some("RollbackInProgress") | Some("Cancelling") => {
                RefreshState::InProgress {
                    percent: refresh.percentage_complete().map(|p| p.max(0) as u32),
                }
            }
            Some("Successful") => RefreshState::Successful,
            Some("Cancelled") | Some("RollbackSuccessful") => RefreshState::Cancelled,
            _ => RefreshState::Failed {
                reason: refresh.status_reason().map(|s| s.to_string()),
            },
        };
        Ok(state)
    }
}
