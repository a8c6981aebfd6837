use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cloud::RoutingTableApi;
use crate::config::RoutingTunables;
use crate::environment::{Environment, RoutingMode};
use crate::error::RoutingSyncError;

/// DynamoDB enforces this ceiling on one batch write
const MAX_BATCH: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingType {
    Queue,
    Url,
}

impl RoutingType {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingType::Queue => "queue",
            RoutingType::Url => "url",
        }
    }
}

/// One row of the routing table: where requests for a compiler go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// Composite `environment#compiler` key; bare legacy ids still occur
    /// on rows written before the key migration
    pub compiler_id: String,
    pub environment: String,
    pub routing_type: RoutingType,
    /// Queue name for queue routing, absolute URL for url routing
    pub target: String,
    pub last_updated: DateTime<Utc>,
}

pub fn composite_key(env: Environment, compiler: &str) -> String {
    format!("{}#{}", env.name(), compiler)
}

/// Bare compiler id of a stored key, tolerating legacy un-prefixed rows
fn bare_id<'a>(stored_key: &'a str, env: Environment) -> &'a str {
    stored_key
        .strip_prefix(&format!("{}#", env.name()))
        .unwrap_or(stored_key)
}

fn desired_entry(env: Environment, compiler: &str, now: DateTime<Utc>) -> RoutingEntry {
    let (routing_type, target) = match env.routing_mode() {
        RoutingMode::Queue => (RoutingType::Queue, env.queue_name()),
        RoutingMode::DirectUrl => (RoutingType::Url, env.compile_url(compiler)),
    };
    RoutingEntry {
        compiler_id: composite_key(env, compiler),
        environment: env.name().to_string(),
        routing_type,
        target,
        last_updated: now,
    }
}

/// Minimal set of writes reconciling the table slice with live inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub environment: String,
    pub adds: Vec<RoutingEntry>,
    pub updates: Vec<RoutingEntry>,
    pub deletes: Vec<String>,
}

impl RoutingPlan {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} adds, {} updates, {} deletes",
            self.adds.len(),
            self.updates.len(),
            self.deletes.len()
        )
    }
}

/// Diff the live compiler set against the stored slice.
///
/// An entry needs an update only when its routing type or target differ
/// from the desired pair; `lastUpdated` never forces a write, which is
/// what makes back-to-back runs converge to an empty plan.
pub fn compute_plan(
    env: Environment,
    live: &BTreeSet<String>,
    current: &[RoutingEntry],
    now: DateTime<Utc>,
) -> RoutingPlan {
    let stored: BTreeMap<&str, &RoutingEntry> = current
        .iter()
        .map(|entry| (bare_id(&entry.compiler_id, env), entry))
        .collect();

    let mut plan = RoutingPlan {
        environment: env.name().to_string(),
        ..Default::default()
    };

    for compiler in live {
        let desired = desired_entry(env, compiler, now);
        match stored.get(compiler.as_str()) {
            None => plan.adds.push(desired),
            Some(existing) => {
                let matches = existing.routing_type == desired.routing_type
                    && existing.target == desired.target;
                if !matches {
                    // Writes always use the composite key; a stale legacy
                    // row migrates by being replaced and removed.
                    if existing.compiler_id != desired.compiler_id {
                        plan.deletes.push(existing.compiler_id.clone());
                    }
                    plan.updates.push(desired);
                }
            }
        }
    }

    for (compiler, entry) in &stored {
        if !live.contains(*compiler) {
            plan.deletes.push(entry.compiler_id.clone());
        }
    }

    plan
}

#[derive(Debug, Deserialize)]
struct CompilerRecord {
    id: String,
}

/// Fetch the live compiler inventory from a running environment's API.
/// One attempt only; the operator re-runs on failure.
pub async fn fetch_live_inventory(
    env: Environment,
    tunables: &RoutingTunables,
) -> Result<BTreeSet<String>, RoutingSyncError> {
    let url = env.compilers_url();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(tunables.fetch_timeout_secs))
        .build()
        .map_err(|e| RoutingSyncError::FetchFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let response = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| RoutingSyncError::FetchFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let records: Vec<CompilerRecord> =
        response
            .json()
            .await
            .map_err(|e| RoutingSyncError::FetchFailed {
                url: url.clone(),
                reason: format!("invalid inventory payload: {e}"),
            })?;

    Ok(records.into_iter().map(|r| r.id).collect())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub environment: String,
    pub live_compilers: usize,
    pub plan: RoutingPlan,
    pub applied: bool,
}

/// Reconciles one environment's routing-table slice with live inventory
pub struct RoutingSynchronizer<'a> {
    table: &'a dyn RoutingTableApi,
    table_name: &'a str,
}

impl<'a> RoutingSynchronizer<'a> {
    pub fn new(table: &'a dyn RoutingTableApi, table_name: &'a str) -> Self {
        Self { table, table_name }
    }

    /// Full update flow: fetch, diff, apply (unless dry-run)
    pub async fn sync(
        &self,
        env: Environment,
        tunables: &RoutingTunables,
        dry_run: bool,
    ) -> Result<SyncReport, RoutingSyncError> {
        let live = fetch_live_inventory(env, tunables).await?;
        info!("🌐 {} reports {} live compilers", env, live.len());

        let current = self
            .table
            .scan_environment(self.table_name, env.name())
            .await
            .map_err(|source| RoutingSyncError::Cloud {
                operation: "dynamo.scan",
                source,
            })?;

        let plan = compute_plan(env, &live, &current, Utc::now());
        info!("📋 routing plan for {}: {}", env, plan.summary());

        if dry_run || plan.is_empty() {
            return Ok(SyncReport {
                environment: env.name().to_string(),
                live_compilers: live.len(),
                plan,
                applied: false,
            });
        }

        self.apply(&plan).await?;
        Ok(SyncReport {
            environment: env.name().to_string(),
            live_compilers: live.len(),
            plan,
            applied: true,
        })
    }

    /// Apply a computed plan in batches of at most 25 writes, surfacing
    /// per-item failures instead of retrying them.
    pub async fn apply(&self, plan: &RoutingPlan) -> Result<(), RoutingSyncError> {
        let mut failures = Vec::new();
        let mut total = 0usize;

        for batch in plan.adds.chunks(MAX_BATCH) {
            total += batch.len();
            self.write_batch(batch, &[], &mut failures).await?;
        }
        for batch in plan.updates.chunks(MAX_BATCH) {
            total += batch.len();
            self.write_batch(batch, &[], &mut failures).await?;
        }
        for batch in plan.deletes.chunks(MAX_BATCH) {
            total += batch.len();
            self.write_batch(&[], batch, &mut failures).await?;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RoutingSyncError::Partial {
                total,
                failed: failures.len(),
                failures,
            })
        }
    }

    async fn write_batch(
        &self,
        puts: &[RoutingEntry],
        deletes: &[String],
        failures: &mut Vec<String>,
    ) -> Result<(), RoutingSyncError> {
        let outcome = self
            .table
            .batch_write(self.table_name, puts, deletes)
            .await
            .map_err(|source| RoutingSyncError::Cloud {
                operation: "dynamo.batch_write_item",
                source,
            })?;
        if !outcome.failed_keys.is_empty() {
            warn!("{} routing writes were not processed", outcome.failed_keys.len());
            failures.extend(outcome.failed_keys);
        }
        Ok(())
    }

    /// Point read with the legacy bare-id fallback
    pub async fn lookup(
        &self,
        env: Environment,
        compiler: &str,
    ) -> Result<RoutingEntry, RoutingSyncError> {
        let composite = composite_key(env, compiler);
        let fetch = |key: String| async move {
            self.table
                .get(self.table_name, &key)
                .await
                .map_err(|source| RoutingSyncError::Cloud {
                    operation: "dynamo.get_item",
                    source,
                })
        };

        if let Some(entry) = fetch(composite.clone()).await? {
            return Ok(entry);
        }
        if let Some(entry) = fetch(compiler.to_string()).await? {
            return Ok(entry);
        }
        Err(RoutingSyncError::NotFound { key: composite })
    }

    /// Remove every routing entry for an environment
    pub async fn clear(&self, env: Environment) -> Result<usize, RoutingSyncError> {
        let current = self
            .table
            .scan_environment(self.table_name, env.name())
            .await
            .map_err(|source| RoutingSyncError::Cloud {
                operation: "dynamo.scan",
                source,
            })?;
        let keys: Vec<String> = current.into_iter().map(|e| e.compiler_id).collect();

        let mut failures = Vec::new();
        for batch in keys.chunks(MAX_BATCH) {
            self.write_batch(&[], batch, &mut failures).await?;
        }
        if failures.is_empty() {
            Ok(keys.len())
        } else {
            Err(RoutingSyncError::Partial {
                total: keys.len(),
                failed: failures.len(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, env: &str, routing_type: RoutingType, target: &str) -> RoutingEntry {
        RoutingEntry {
            compiler_id: key.to_string(),
            environment: env.to_string(),
            routing_type,
            target: target.to_string(),
            last_updated: Utc::now(),
        }
    }

    fn live(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plan_covers_add_update_delete() {
        let env = Environment::Prod;
        let current = vec![
            // Stale: points at a URL although prod routes by queue
            entry(
                "prod#gcc-13",
                "prod",
                RoutingType::Url,
                "https://godbolt.org/api/compiler/gcc-13/compile",
            ),
            entry(
                "prod#gcc-12",
                "prod",
                RoutingType::Queue,
                "prod-compilation-queue",
            ),
        ];

        let plan = compute_plan(env, &live(&["gcc-13", "clang-17"]), &current, Utc::now());

        assert_eq!(plan.adds.len(), 1);
        assert_eq!(plan.adds[0].compiler_id, "prod#clang-17");
        assert_eq!(plan.adds[0].target, "prod-compilation-queue");
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].compiler_id, "prod#gcc-13");
        assert_eq!(plan.updates[0].routing_type, RoutingType::Queue);
        assert_eq!(plan.deletes, vec!["prod#gcc-12".to_string()]);
    }

    #[test]
    fn plan_is_a_fixpoint() {
        let env = Environment::Prod;
        let inventory = live(&["gcc-13", "clang-17"]);
        let plan = compute_plan(env, &inventory, &[], Utc::now());
        assert_eq!(plan.adds.len(), 2);

        // Feed the applied state back in; the second plan must be empty
        let applied: Vec<RoutingEntry> = plan.adds.clone();
        let second = compute_plan(env, &inventory, &applied, Utc::now());
        assert!(second.is_empty(), "second plan: {}", second.summary());
    }

    #[test]
    fn last_updated_alone_never_forces_a_write() {
        let env = Environment::Prod;
        let mut stored = desired_stored(env, "gcc-13");
        stored.last_updated = Utc::now() - chrono::Duration::days(400);
        let plan = compute_plan(env, &live(&["gcc-13"]), &[stored], Utc::now());
        assert!(plan.is_empty());
    }

    fn desired_stored(env: Environment, compiler: &str) -> RoutingEntry {
        entry(
            &composite_key(env, compiler),
            env.name(),
            RoutingType::Queue,
            &env.queue_name(),
        )
    }

    #[test]
    fn url_environments_route_to_compile_urls() {
        let env = Environment::WinProd;
        let plan = compute_plan(env, &live(&["msvc-19"]), &[], Utc::now());
        assert_eq!(plan.adds.len(), 1);
        assert_eq!(plan.adds[0].routing_type, RoutingType::Url);
        assert_eq!(
            plan.adds[0].target,
            "https://godbolt.org/winprod/api/compiler/msvc-19/compile"
        );
    }

    #[test]
    fn legacy_row_migrates_to_composite_key() {
        let env = Environment::Prod;
        // Legacy bare id with a stale target
        let current = vec![entry(
            "gcc-13",
            "prod",
            RoutingType::Url,
            "https://old.example.com/gcc-13",
        )];
        let plan = compute_plan(env, &live(&["gcc-13"]), &current, Utc::now());

        assert!(plan.adds.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].compiler_id, "prod#gcc-13");
        // The bare row is removed as part of the migration
        assert_eq!(plan.deletes, vec!["gcc-13".to_string()]);
    }

    #[test]
    fn plan_rows_never_leave_the_environment() {
        let env = Environment::Beta;
        let plan = compute_plan(env, &live(&["gcc-13", "clang-17"]), &[], Utc::now());
        for entry in plan.adds.iter().chain(plan.updates.iter()) {
            assert_eq!(entry.environment, "beta");
            assert!(entry.compiler_id.starts_with("beta#"));
        }
    }
}
