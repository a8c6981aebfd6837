use thiserror::Error;

/// Fleet-wide error type aggregating every subsystem failure
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Routing sync error: {0}")]
    RoutingSync(#[from] RoutingSyncError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown environment: {name}")]
    UnknownEnvironment { name: String },

    #[error("invalid color value: {value}")]
    InvalidColor { value: String },

    #[error("missing required setting: {name}")]
    MissingSetting { name: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Classified failure from a cloud-provider API call.
///
/// Every adapter translates native SDK errors into one of these kinds so the
/// rest of the tool can decide between retry, precondition and escalation
/// without knowing which SDK produced the failure.
#[derive(Error, Debug)]
#[error("{operation} failed ({kind}): {message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    Transient,
    NotFound,
    PermissionDenied,
    Throttled,
    InvalidArgument,
    Unknown,
}

impl std::fmt::Display for CloudErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloudErrorKind::Transient => "transient",
            CloudErrorKind::NotFound => "not found",
            CloudErrorKind::PermissionDenied => "permission denied",
            CloudErrorKind::Throttled => "throttled",
            CloudErrorKind::InvalidArgument => "invalid argument",
            CloudErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    pub fn not_found(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::NotFound, operation, message)
    }

    pub fn invalid(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::InvalidArgument, operation, message)
    }

    /// Retriable with backoff inside the owning operation
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::Transient | CloudErrorKind::Throttled
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == CloudErrorKind::NotFound
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("deploy-lock held by {owner} until {expires_at}")]
    LockHeld { owner: String, expires_at: String },

    #[error("deadline exceeded during {stage}")]
    Timeout { stage: &'static str },

    #[error("no health progress during {stage}; deployment rolled back")]
    Stalled { stage: &'static str },

    #[error("state drift detected: {0}; operator intervention required")]
    InvariantViolation(String),

    #[error("cloud failure during {stage}: {source}")]
    Cloud {
        stage: &'static str,
        #[source]
        source: CloudError,
    },
}

impl DeployError {
    pub(crate) fn cloud(stage: &'static str) -> impl FnOnce(CloudError) -> DeployError {
        move |source| DeployError::Cloud { stage, source }
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("instance {instance} not found")]
    NotFound { instance: String },

    #[error("precondition failed for {instance}: {reason}")]
    Precondition { instance: String, reason: String },

    #[error("drain of {instance} timed out during {stage}")]
    DrainTimeout {
        instance: String,
        stage: &'static str,
    },

    #[error("{instance} did not become healthy during {stage}")]
    HealthTimeout {
        instance: String,
        stage: &'static str,
    },

    #[error("minimum healthy capacity would be violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("cloud failure during {stage} for {instance}: {source}")]
    Cloud {
        instance: String,
        stage: &'static str,
        #[source]
        source: CloudError,
    },
}

#[derive(Error, Debug)]
pub enum RoutingSyncError {
    #[error("fetching live compiler inventory from {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("cloud failure during {operation}: {source}")]
    Cloud {
        operation: &'static str,
        #[source]
        source: CloudError,
    },

    #[error("{failed} of {total} routing writes failed")]
    Partial {
        total: usize,
        failed: usize,
        failures: Vec<String>,
    },

    #[error("routing entry not found for {key}")]
    NotFound { key: String },
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("issue tracker request failed ({context}): {reason}")]
    Http { context: String, reason: String },

    #[error("issue tracker returned {status} for {context}")]
    Api { status: u16, context: String },
}

/// Convenience type alias for fleetctl results
pub type Result<T, E = FleetError> = std::result::Result<T, E>;
