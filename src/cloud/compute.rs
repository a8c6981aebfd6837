use async_trait::async_trait;
use aws_sdk_ec2::types::{AttributeBooleanValue, InstanceAttributeName, Tag};

use super::{classify_sdk, with_retry, ComputeApi, ComputeInstance, InstanceProtection};
use crate::error::CloudError;

/// Adapter over the EC2 compute service
#[derive(Debug, Clone)]
pub struct ComputeAdapter {
    client: aws_sdk_ec2::Client,
}

impl ComputeAdapter {
    pub fn new(sdk: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(sdk),
        }
    }
}

#[async_trait]
impl ComputeApi for ComputeAdapter {
    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<ComputeInstance>, CloudError> {
        const OP: &str = "ec2.describe_instances";
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client.clone();
        let ids = ids.to_vec();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let ids = ids.clone();
            async move {
                client
                    .describe_instances()
                    .set_instance_ids(Some(ids))
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        let mut out = Vec::new();
        for reservation in resp.reservations() {
            for instance in reservation.instances() {
                let tags = instance
                    .tags()
                    .iter()
                    .filter_map(|t| match (t.key(), t.value()) {
                        (Some(k), Some(v)) => Some((k.to_string(), v.to_string())),
                        _ => None,
                    })
                    .collect();
                out.push(ComputeInstance {
                    instance_id: instance.instance_id().unwrap_or_default().to_string(),
                    private_ip: instance.private_ip_address().map(|s| s.to_string()),
                    tags,
                    state: instance
                        .state()
                        .and_then(|s| s.name())
                        .map(|n| n.as_str().to_string())
                        .unwrap_or_default(),
                });
            }
        }
        Ok(out)
    }

    async fn protection(&self, id: &str) -> Result<InstanceProtection, CloudError> {
        const OP: &str = "ec2.describe_instance_attribute";
        let client = self.client.clone();
        let id = id.to_string();

        let stop = with_retry(OP, || {
            let client = client.clone();
            let id = id.clone();
            async move {
                client
                    .describe_instance_attribute()
                    .instance_id(&id)
                    .attribute(InstanceAttributeName::DisableApiStop)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        let terminate = with_retry(OP, || {
            let client = client.clone();
            let id = id.clone();
            async move {
                client
                    .describe_instance_attribute()
                    .instance_id(&id)
                    .attribute(InstanceAttributeName::DisableApiTermination)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        Ok(InstanceProtection {
            stop_protected: stop
                .disable_api_stop()
                .and_then(|v| v.value())
                .unwrap_or(false),
            termination_protected: terminate
                .disable_api_termination()
                .and_then(|v| v.value())
                .unwrap_or(false),
        })
    }

    async fn set_stop_protection(&self, id: &str, protected: bool) -> Result<(), CloudError> {
        const OP: &str = "ec2.set_stop_protection";
        let client = self.client.clone();
        let id = id.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let id = id.clone();
            async move {
                client
                    .modify_instance_attribute()
                    .instance_id(&id)
                    .disable_api_stop(AttributeBooleanValue::builder().value(protected).build())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn set_termination_protection(
        &self,
        id: &str,
        protected: bool,
    ) -> Result<(), CloudError> {
        const OP: &str = "ec2.set_termination_protection";
        let client = self.client.clone();
        let id = id.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let id = id.clone();
            async move {
                client
                    .modify_instance_attribute()
                    .instance_id(&id)
                    .disable_api_termination(
                        AttributeBooleanValue::builder().value(protected).build(),
                    )
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn terminate(&self, id: &str) -> Result<(), CloudError> {
        const OP: &str = "ec2.terminate_instances";
        let client = self.client.clone();
        let id = id.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let id = id.clone();
            async move {
                client
                    .terminate_instances()
                    .instance_ids(&id)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn tag_instance(&self, id: &str, key: &str, value: &str) -> Result<(), CloudError> {
        const OP: &str = "ec2.create_tags";
        let client = self.client.clone();
        let id = id.to_string();
        let key = key.to_string();
        let value = value.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let id = id.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                client
                    .create_tags()
                    .resources(&id)
                    .tags(Tag::builder().key(&key).value(&value).build())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }
}
