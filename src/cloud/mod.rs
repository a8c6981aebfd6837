use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{CloudError, CloudErrorKind};
use crate::routing::RoutingEntry;
use crate::types::TargetHealth;

pub mod asg;
pub mod cdn;
pub mod compute;
pub mod dynamo;
pub mod elb;
pub mod ssm;

pub use asg::AsgAdapter;
pub use cdn::CdnAdapter;
pub use compute::ComputeAdapter;
pub use dynamo::RoutingTableAdapter;
pub use elb::LoadBalancerAdapter;
pub use ssm::SsmAdapter;

/// Auto-scaling group detail as the controllers consume it
#[derive(Debug, Clone)]
pub struct AsgDetail {
    pub name: String,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub instances: Vec<AsgInstance>,
}

#[derive(Debug, Clone)]
pub struct AsgInstance {
    pub instance_id: String,
    pub lifecycle_state: String,
    pub protected_from_scale_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshState {
    Pending,
    InProgress { percent: Option<u32> },
    Successful,
    Failed { reason: Option<String> },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ComputeInstance {
    pub instance_id: String,
    pub private_ip: Option<String>,
    pub tags: std::collections::HashMap<String, String>,
    pub state: String,
}

/// Stop/termination protection attributes of one instance; these live on
/// a separate attribute API, not on the instance description
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceProtection {
    pub stop_protected: bool,
    pub termination_protected: bool,
}

#[derive(Debug, Clone)]
pub struct ListenerRule {
    pub rule_arn: String,
    pub priority: String,
    pub is_default: bool,
    pub path_patterns: Vec<String>,
    pub target_group_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    InProgress,
    Success,
    Failed(String),
}

/// Per-item outcome of a routing-table batch write
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub failed_keys: Vec<String>,
}

#[async_trait]
pub trait AsgApi: Send + Sync {
    async fn describe(&self, name: &str) -> Result<AsgDetail, CloudError>;
    async fn set_desired_capacity(&self, name: &str, desired: u32) -> Result<(), CloudError>;
    async fn set_min_size(&self, name: &str, min: u32) -> Result<(), CloudError>;
    async fn enter_standby(&self, name: &str, instance_id: &str) -> Result<(), CloudError>;
    async fn exit_standby(&self, name: &str, instance_id: &str) -> Result<(), CloudError>;
    async fn set_scale_in_protection(
        &self,
        name: &str,
        instance_ids: &[String],
        protected: bool,
    ) -> Result<(), CloudError>;
    async fn start_refresh(&self, name: &str, min_healthy_percent: u32)
        -> Result<String, CloudError>;
    async fn refresh_status(&self, name: &str, refresh_id: &str)
        -> Result<RefreshState, CloudError>;

    async fn list_instances(&self, name: &str) -> Result<Vec<AsgInstance>, CloudError> {
        Ok(self.describe(name).await?.instances)
    }
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<ComputeInstance>, CloudError>;
    async fn protection(&self, id: &str) -> Result<InstanceProtection, CloudError>;
    async fn set_stop_protection(&self, id: &str, protected: bool) -> Result<(), CloudError>;
    async fn set_termination_protection(&self, id: &str, protected: bool)
        -> Result<(), CloudError>;
    async fn terminate(&self, id: &str) -> Result<(), CloudError>;
    async fn tag_instance(&self, id: &str, key: &str, value: &str) -> Result<(), CloudError>;
}

#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn target_group_arn(&self, name: &str) -> Result<String, CloudError>;
    async fn target_health(&self, tg_arn: &str)
        -> Result<Vec<(String, TargetHealth)>, CloudError>;
    async fn register(&self, tg_arn: &str, instance_id: &str) -> Result<(), CloudError>;
    async fn deregister(&self, tg_arn: &str, instance_id: &str) -> Result<(), CloudError>;
    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<ListenerRule>, CloudError>;
    async fn set_rule_forward(&self, rule_arn: &str, tg_arn: &str) -> Result<(), CloudError>;
    async fn set_rule_patterns(&self, rule_arn: &str, patterns: &[String])
        -> Result<(), CloudError>;
}

#[async_trait]
pub trait ParamStoreApi: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>, CloudError>;
    async fn put(&self, name: &str, value: &str, secure: bool) -> Result<(), CloudError>;
    async fn delete(&self, name: &str) -> Result<(), CloudError>;
}

/// In-instance command execution, used to restart the worker service
#[async_trait]
pub trait CommandApi: Send + Sync {
    async fn run_command(
        &self,
        instance_id: &str,
        document: &str,
        commands: &[String],
    ) -> Result<String, CloudError>;
    async fn command_status(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<CommandStatus, CloudError>;
}

#[async_trait]
pub trait RoutingTableApi: Send + Sync {
    async fn get(&self, table: &str, key: &str) -> Result<Option<RoutingEntry>, CloudError>;
    async fn put(&self, table: &str, entry: &RoutingEntry) -> Result<(), CloudError>;
    async fn delete(&self, table: &str, key: &str) -> Result<(), CloudError>;
    async fn scan_environment(
        &self,
        table: &str,
        environment: &str,
    ) -> Result<Vec<RoutingEntry>, CloudError>;
    async fn batch_write(
        &self,
        table: &str,
        puts: &[RoutingEntry],
        delete_keys: &[String],
    ) -> Result<BatchOutcome, CloudError>;
}

#[async_trait]
pub trait CdnApi: Send + Sync {
    async fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
    ) -> Result<String, CloudError>;
}

/// Process-scoped registry of cloud adapters.
///
/// Each adapter is constructed on first use so status-only invocations do
/// not pay for clients they never touch. The registry is threaded
/// explicitly through command handlers.
pub struct Gateway {
    region: Option<String>,
    sdk: OnceCell<aws_config::SdkConfig>,
    asg: OnceCell<AsgAdapter>,
    compute: OnceCell<ComputeAdapter>,
    lb: OnceCell<LoadBalancerAdapter>,
    ssm: OnceCell<SsmAdapter>,
    routing: OnceCell<RoutingTableAdapter>,
    cdn: OnceCell<CdnAdapter>,
}

impl Gateway {
    pub fn new(region: Option<String>) -> Self {
        Self {
            region,
            sdk: OnceCell::new(),
            asg: OnceCell::new(),
            compute: OnceCell::new(),
            lb: OnceCell::new(),
            ssm: OnceCell::new(),
            routing: OnceCell::new(),
            cdn: OnceCell::new(),
        }
    }

    async fn sdk(&self) -> &aws_config::SdkConfig {
        self.sdk
            .get_or_init(|| async move {
                let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
                if let Some(region) = self.region.clone() {
                    loader = loader.region(aws_config::Region::new(region));
                }
                loader.load().await
            })
            .await
    }

    pub async fn asg(&self) -> &AsgAdapter {
        let sdk = self.sdk().await;
        self.asg.get_or_init(|| async move { AsgAdapter::new(sdk) }).await
    }

    pub async fn compute(&self) -> &ComputeAdapter {
        let sdk = self.sdk().await;
        self.compute
            .get_or_init(|| async move { ComputeAdapter::new(sdk) })
            .await
    }

    pub async fn load_balancer(&self) -> &LoadBalancerAdapter {
        let sdk = self.sdk().await;
        self.lb
            .get_or_init(|| async move { LoadBalancerAdapter::new(sdk) })
            .await
    }

    pub async fn ssm(&self) -> &SsmAdapter {
        let sdk = self.sdk().await;
        self.ssm.get_or_init(|| async move { SsmAdapter::new(sdk) }).await
    }

    pub async fn routing_table(&self) -> &RoutingTableAdapter {
        let sdk = self.sdk().await;
        self.routing
            .get_or_init(|| async move { RoutingTableAdapter::new(sdk) })
            .await
    }

    pub async fn cdn(&self) -> &CdnAdapter {
        let sdk = self.sdk().await;
        self.cdn.get_or_init(|| async move { CdnAdapter::new(sdk) }).await
    }
}

/// Translate a native SDK failure into the fleet-wide taxonomy
pub(crate) fn classify_sdk<E>(operation: &'static str, err: SdkError<E>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            CloudErrorKind::Transient
        }
        SdkError::ServiceError(ctx) => kind_from_code(ctx.err().code()),
        _ => CloudErrorKind::Unknown,
    };
    let message = DisplayErrorContext(&err).to_string();
    CloudError::new(kind, operation, message)
}

fn kind_from_code(code: Option<&str>) -> CloudErrorKind {
    let Some(code) = code else {
        return CloudErrorKind::Unknown;
    };
    if code.contains("NotFound") || code == "NoSuchEntity" {
        return CloudErrorKind::NotFound;
    }
    match code {
        "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
        | "TooManyRequestsException" | "ProvisionedThroughputExceededException" => {
            CloudErrorKind::Throttled
        }
        "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" => {
            CloudErrorKind::PermissionDenied
        }
        "ValidationError" | "ValidationException" => CloudErrorKind::InvalidArgument,
        "InternalFailure" | "InternalError" | "ServiceUnavailable" => CloudErrorKind::Transient,
        c if c.starts_with("InvalidParameter") => CloudErrorKind::InvalidArgument,
        _ => CloudErrorKind::Unknown,
    }
}

pub(crate) fn build_err(operation: &'static str) -> impl FnOnce(aws_smithy_types::error::operation::BuildError) -> CloudError {
    move |e| CloudError::invalid(operation, e.to_string())
}

const RETRY_ATTEMPTS: u32 = 3;

/// Bounded backoff retry for transient and throttled failures. Everything
/// else propagates on the first attempt.
pub(crate) async fn with_retry<T, F, Fut>(operation: &'static str, mut call: F) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let mut delay = Duration::from_millis(200);
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < RETRY_ATTEMPTS => {
                attempt += 1;
                debug!(
                    operation,
                    attempt, "transient cloud error, retrying: {}", err
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(2));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_codes_are_throttled() {
        assert_eq!(
            kind_from_code(Some("ThrottlingException")),
            CloudErrorKind::Throttled
        );
        assert_eq!(
            kind_from_code(Some("RequestLimitExceeded")),
            CloudErrorKind::Throttled
        );
    }

    #[test]
    fn not_found_wins_over_invalid_parameter() {
        // EC2 reports a missing instance as InvalidInstanceID.NotFound
        assert_eq!(
            kind_from_code(Some("InvalidInstanceID.NotFound")),
            CloudErrorKind::NotFound
        );
        assert_eq!(
            kind_from_code(Some("InvalidParameterValue")),
            CloudErrorKind::InvalidArgument
        );
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_errors_immediately() {
        let mut calls = 0u32;
        let result: Result<(), CloudError> = with_retry("test.op", || {
            calls += 1;
            async { Err(CloudError::not_found("test.op", "gone")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_retries_transient_errors() {
        let mut calls = 0u32;
        let result: Result<u32, CloudError> = with_retry("test.op", || {
            calls += 1;
            let ok = calls > 2;
            async move {
                if ok {
                    Ok(7)
                } else {
                    Err(CloudError::new(
                        CloudErrorKind::Transient,
                        "test.op",
                        "flaky",
                    ))
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }
}
