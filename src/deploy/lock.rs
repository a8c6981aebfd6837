use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cloud::ParamStoreApi;
use crate::environment::Environment;
use crate::error::{CloudError, DeployError};

/// Lease body persisted under the environment's deploy-lock key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Time-bounded mutual exclusion for deployments of one environment.
///
/// The lease is a plain parameter-store value with owner and expiry; a
/// valid lease blocks other deployments, an expired one may be broken by
/// the next owner. The TTL is slightly longer than the deploy deadline so
/// a crashed run cannot wedge the environment for long.
pub struct DeployLock {
    env: Environment,
    key: String,
    pub owner: String,
}

impl DeployLock {
    fn owner_id() -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        format!("{host}:{}", &nonce[..8])
    }

    /// Read the current lease for an environment, if any
    pub async fn current(
        params: &dyn ParamStoreApi,
        env: Environment,
    ) -> Result<Option<LeaseRecord>, CloudError> {
        let raw = match params.get(&env.deploy_lock_key()).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    /// Take the lease, failing with a precondition error while another
    /// valid lease exists. Stale leases are broken with a warning.
    pub async fn acquire(
        params: &dyn ParamStoreApi,
        env: Environment,
        ttl_secs: i64,
    ) -> Result<DeployLock, DeployError> {
        const STAGE: &str = "plan";
        let key = env.deploy_lock_key();

        if let Some(raw) = params.get(&key).await.map_err(DeployError::cloud(STAGE))? {
            match serde_json::from_str::<LeaseRecord>(&raw) {
                Ok(lease) if !lease.is_expired_at(Utc::now()) => {
                    return Err(DeployError::LockHeld {
                        owner: lease.owner,
                        expires_at: lease.expires_at.to_rfc3339(),
                    });
                }
                Ok(lease) => {
                    warn!(
                        "breaking stale deploy lock for {} held by {} (expired {})",
                        env, lease.owner, lease.expires_at
                    );
                }
                Err(_) => {
                    warn!("breaking unparseable deploy lock for {}: {raw:?}", env);
                }
            }
        }

        let owner = Self::owner_id();
        let lease = LeaseRecord {
            owner: owner.clone(),
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        };
        let body = serde_json::to_string(&lease)
            .map_err(|e| DeployError::InvariantViolation(format!("lease encoding failed: {e}")))?;
        params
            .put(&key, &body, false)
            .await
            .map_err(DeployError::cloud(STAGE))?;

        Ok(DeployLock { env, key, owner })
    }

    /// Drop the lease. A failure here only delays the next deploy until
    /// the TTL runs out, so callers may treat it as a warning.
    pub async fn release(self, params: &dyn ParamStoreApi) -> Result<(), CloudError> {
        params.delete(&self.key).await
    }

    pub fn environment(&self) -> Environment {
        self.env
    }
}
