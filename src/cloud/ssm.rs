use async_trait::async_trait;
use aws_sdk_ssm::types::ParameterType;
use aws_smithy_runtime_api::client::result::SdkError;

use super::{classify_sdk, with_retry, CommandApi, CommandStatus, ParamStoreApi};
use crate::error::CloudError;

/// Adapter over the parameter store and in-instance command execution,
/// both fronted by the same systems-manager service
#[derive(Debug, Clone)]
pub struct SsmAdapter {
    client: aws_sdk_ssm::Client,
}

impl SsmAdapter {
    pub fn new(sdk: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_ssm::Client::new(sdk),
        }
    }
}

#[async_trait]
impl ParamStoreApi for SsmAdapter {
    async fn get(&self, name: &str) -> Result<Option<String>, CloudError> {
        const OP: &str = "ssm.get_parameter";
        let result = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await;

        match result {
            Ok(resp) => Ok(resp
                .parameter()
                .and_then(|p| p.value())
                .map(|v| v.to_string())),
            Err(err) => {
                // An absent key is a normal answer, not a failure
                if let SdkError::ServiceError(ctx) = &err {
                    if ctx.err().is_parameter_not_found() {
                        return Ok(None);
                    }
                }
                Err(classify_sdk(OP, err))
            }
        }
    }

    async fn put(&self, name: &str, value: &str, secure: bool) -> Result<(), CloudError> {
        const OP: &str = "ssm.put_parameter";
        let client = self.client.clone();
        let name = name.to_string();
        let value = value.to_string();
        let kind = if secure {
            ParameterType::SecureString
        } else {
            ParameterType::String
        };
        with_retry(OP, || {
            let client = client.clone();
            let name = name.clone();
            let value = value.clone();
            let kind = kind.clone();
            async move {
                client
                    .put_parameter()
                    .name(&name)
                    .value(&value)
                    .r#type(kind)
                    .overwrite(true)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<(), CloudError> {
        const OP: &str = "ssm.delete_parameter";
        let result = self.client.delete_parameter().name(name).send().await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if let SdkError::ServiceError(ctx) = &err {
                    if ctx.err().is_parameter_not_found() {
                        return Ok(());
                    }
                }
                Err(classify_sdk(OP, err))
            }
        }
    }
}

#[async_trait]
impl CommandApi for SsmAdapter {
    async fn run_command(
        &self,
        instance_id: &str,
        document: &str,
        commands: &[String],
    ) -> Result<String, CloudError> {
        const OP: &str = "ssm.send_command";
        let client = self.client.clone();
        let instance_id = instance_id.to_string();
        let document = document.to_string();
        let commands = commands.to_vec();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let instance_id = instance_id.clone();
            let document = document.clone();
            let commands = commands.clone();
            async move {
                client
                    .send_command()
                    .instance_ids(&instance_id)
                    .document_name(&document)
                    .parameters("commands", commands)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        resp.command()
            .and_then(|c| c.command_id())
            .map(|id| id.to_string())
            .ok_or_else(|| CloudError::invalid(OP, "command accepted without an id"))
    }

    async fn command_status(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<CommandStatus, CloudError> {
        const OP: &str = "ssm.get_command_invocation";
        let result = self
            .client
            .get_command_invocation()
            .command_id(command_id)
            .instance_id(instance_id)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                // The invocation record lags the send by a moment
                if let SdkError::ServiceError(ctx) = &err {
                    if ctx.err().is_invocation_does_not_exist() {
                        return Ok(CommandStatus::InProgress);
                    }
                }
                return Err(classify_sdk(OP, err));
            }
        };

        let status = match resp.status().map(|s| s.as_str()) {
            Some("Pending") | Some("InProgress") | Some("Delayed") | None => {
                CommandStatus::InProgress
            }
            Some("Success") => CommandStatus::Success,
            Some(other) => {
                let detail = resp
                    .standard_error_content()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(other);
                CommandStatus::Failed(detail.to_string())
            }
        };
        Ok(status)
    }
}
