mod common;

use std::collections::BTreeSet;

use chrono::Utc;
use common::FakeCloud;
use fleetctl::error::RoutingSyncError;
use fleetctl::routing::{compute_plan, RoutingSynchronizer};
use fleetctl::Environment;

const TABLE: &str = "CompilerRouting";

fn live(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn slice(cloud: &FakeCloud, env: Environment) -> Vec<fleetctl::routing::RoutingEntry> {
    use fleetctl::cloud::RoutingTableApi;
    cloud.scan_environment(TABLE, env.name()).await.unwrap()
}

#[tokio::test]
async fn apply_then_replan_reaches_a_fixpoint() {
    let env = Environment::Prod;
    let cloud = FakeCloud::new();
    let sync = RoutingSynchronizer::new(&cloud, TABLE);

    let inventory = live(&["gcc-13", "clang-17", "rustc-1-75"]);
    let plan = compute_plan(env, &inventory, &[], Utc::now());
    assert_eq!(plan.adds.len(), 3);
    sync.apply(&plan).await.unwrap();

    let stored = slice(&cloud, env).await;
    assert_eq!(stored.len(), 3);

    let second = compute_plan(env, &inventory, &stored, Utc::now());
    assert!(second.is_empty());
    // A second apply writes nothing
    let writes_before = cloud.log.lock().unwrap().len();
    sync.apply(&second).await.unwrap();
    assert_eq!(cloud.log.lock().unwrap().len(), writes_before);
}

#[tokio::test]
async fn batches_never_exceed_twenty_five_writes() {
    let env = Environment::Prod;
    let cloud = FakeCloud::new();
    let sync = RoutingSynchronizer::new(&cloud, TABLE);

    let many: Vec<String> = (0..60).map(|i| format!("gcc-{i}")).collect();
    let inventory: BTreeSet<String> = many.into_iter().collect();
    let plan = compute_plan(env, &inventory, &[], Utc::now());
    sync.apply(&plan).await.unwrap();

    let sizes = cloud.batch_sizes.lock().unwrap();
    assert!(!sizes.is_empty());
    assert!(sizes.iter().all(|&s| s <= 25));
    assert_eq!(sizes.iter().sum::<usize>(), 60);
    drop(sizes);
    assert_eq!(slice(&cloud, env).await.len(), 60);
}

#[tokio::test]
async fn partial_write_failures_are_surfaced_per_item() {
    let env = Environment::Prod;
    let cloud = FakeCloud::new();
    cloud
        .fail_batch_keys
        .lock()
        .unwrap()
        .push("prod#clang-17".to_string());
    let sync = RoutingSynchronizer::new(&cloud, TABLE);

    let plan = compute_plan(env, &live(&["gcc-13", "clang-17"]), &[], Utc::now());
    let err = sync.apply(&plan).await.unwrap_err();
    match err {
        RoutingSyncError::Partial {
            total,
            failed,
            failures,
        } => {
            assert_eq!(total, 2);
            assert_eq!(failed, 1);
            assert_eq!(failures, vec!["prod#clang-17".to_string()]);
        }
        other => panic!("expected Partial, got {other}"),
    }
    // The other item still landed
    assert_eq!(slice(&cloud, env).await.len(), 1);
}

#[tokio::test]
async fn updates_only_touch_their_own_environment() {
    let beta = Environment::Beta;
    let prod = Environment::Prod;
    let cloud = FakeCloud::new();
    let sync = RoutingSynchronizer::new(&cloud, TABLE);

    // Seed a prod slice first
    let prod_plan = compute_plan(prod, &live(&["gcc-13"]), &[], Utc::now());
    sync.apply(&prod_plan).await.unwrap();

    // Reconcile beta with a disjoint inventory
    let beta_plan = compute_plan(beta, &live(&["clang-17"]), &slice(&cloud, beta).await, Utc::now());
    sync.apply(&beta_plan).await.unwrap();

    let table = cloud.table.lock().unwrap();
    assert!(table.contains_key("prod#gcc-13"));
    assert!(table.contains_key("beta#clang-17"));
    for (key, entry) in table.iter() {
        if key.starts_with("beta#") {
            assert_eq!(entry.environment, "beta");
        }
    }
    drop(table);

    // Emptying beta deletes its rows and leaves prod untouched
    let teardown = compute_plan(beta, &BTreeSet::new(), &slice(&cloud, beta).await, Utc::now());
    sync.apply(&teardown).await.unwrap();
    let table = cloud.table.lock().unwrap();
    assert!(table.contains_key("prod#gcc-13"));
    assert!(!table.keys().any(|k| k.starts_with("beta#")));
}

#[tokio::test]
async fn lookup_falls_back_to_legacy_bare_ids() {
    let env = Environment::Prod;
    let cloud = FakeCloud::new();
    let sync = RoutingSynchronizer::new(&cloud, TABLE);

    // A pre-migration row keyed by the bare compiler id
    cloud.table.lock().unwrap().insert(
        "gcc-12".to_string(),
        fleetctl::routing::RoutingEntry {
            compiler_id: "gcc-12".to_string(),
            environment: "prod".to_string(),
            routing_type: fleetctl::routing::RoutingType::Queue,
            target: "prod-compilation-queue".to_string(),
            last_updated: Utc::now(),
        },
    );

    let entry = sync.lookup(env, "gcc-12").await.unwrap();
    assert_eq!(entry.compiler_id, "gcc-12");

    let err = sync.lookup(env, "gcc-99").await.unwrap_err();
    assert!(matches!(err, RoutingSyncError::NotFound { .. }));
}

#[tokio::test]
async fn clear_empties_exactly_one_environment() {
    let cloud = FakeCloud::new();
    let sync = RoutingSynchronizer::new(&cloud, TABLE);

    let prod_plan = compute_plan(Environment::Prod, &live(&["gcc-13"]), &[], Utc::now());
    sync.apply(&prod_plan).await.unwrap();
    let beta_plan = compute_plan(Environment::Beta, &live(&["gcc-13", "clang-17"]), &[], Utc::now());
    sync.apply(&beta_plan).await.unwrap();

    let removed = sync.clear(Environment::Beta).await.unwrap();
    assert_eq!(removed, 2);
    let table = cloud.table.lock().unwrap();
    assert_eq!(table.len(), 1);
    assert!(table.contains_key("prod#gcc-13"));
}
