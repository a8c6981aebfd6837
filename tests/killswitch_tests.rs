mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{FakeCloud, LISTENER_ARN};
use fleetctl::error::FleetError;
use fleetctl::killswitch::{self, SENTINEL};
use fleetctl::types::RuleState;
use fleetctl::{Color, Environment};
use serde_json::json;

#[tokio::test]
async fn disable_then_enable_restores_the_patterns_exactly() {
    let env = Environment::Beta;
    let cloud = FakeCloud::new();
    cloud.seed_environment(env, Color::Blue, 2, "v100");
    cloud.seed_router(env);
    let rule_arn = "arn:rule/beta-router";
    let original = cloud.rule_patterns(rule_arn);

    let status = killswitch::disable(&cloud, &cloud, LISTENER_ARN, env)
        .await
        .unwrap();
    assert_eq!(status.state, RuleState::KillswitchActive);
    assert_eq!(cloud.rule_patterns(rule_arn), vec![SENTINEL.to_string()]);

    let statuses = killswitch::status(&cloud, LISTENER_ARN, &[env]).await.unwrap();
    assert_eq!(statuses[0].state, RuleState::KillswitchActive);

    let status = killswitch::enable(&cloud, &cloud, LISTENER_ARN, env)
        .await
        .unwrap();
    assert_eq!(status.state, RuleState::Enabled);
    // Byte-for-byte reversibility of the pattern list
    assert_eq!(cloud.rule_patterns(rule_arn), original);
    assert_eq!(
        original,
        vec![
            "/beta/api/compiler/*/compile".to_string(),
            "/beta/api/compiler/*/cmake".to_string()
        ]
    );
}

#[tokio::test]
async fn status_covers_missing_router_rules() {
    let cloud = FakeCloud::new();
    cloud.seed_environment(Environment::Beta, Color::Blue, 1, "v100");
    cloud.seed_router(Environment::Beta);

    let statuses = killswitch::status(
        &cloud,
        LISTENER_ARN,
        &[Environment::Beta, Environment::Staging],
    )
    .await
    .unwrap();
    assert_eq!(statuses[0].state, RuleState::Enabled);
    assert_eq!(statuses[1].state, RuleState::NotFound);
}

#[tokio::test]
async fn killswitch_refuses_while_a_deploy_lease_is_live() {
    let env = Environment::Beta;
    let cloud = FakeCloud::new();
    cloud.seed_environment(env, Color::Blue, 2, "v100");
    cloud.seed_router(env);

    let expires = Utc::now() + ChronoDuration::minutes(20);
    cloud.set_param(
        &env.deploy_lock_key(),
        &json!({ "owner": "deployer:7", "expires_at": expires }).to_string(),
    );

    let err = killswitch::disable(&cloud, &cloud, LISTENER_ARN, env)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Deploy(_)));
    // The rule was left alone
    assert_eq!(
        cloud.rule_patterns("arn:rule/beta-router"),
        env.router_path_patterns()
    );
}

#[tokio::test]
async fn expired_lease_does_not_block_the_killswitch() {
    let env = Environment::Beta;
    let cloud = FakeCloud::new();
    cloud.seed_environment(env, Color::Blue, 2, "v100");
    cloud.seed_router(env);

    let expires = Utc::now() - ChronoDuration::minutes(1);
    cloud.set_param(
        &env.deploy_lock_key(),
        &json!({ "owner": "deployer:7", "expires_at": expires }).to_string(),
    );

    let status = killswitch::disable(&cloud, &cloud, LISTENER_ARN, env)
        .await
        .unwrap();
    assert_eq!(status.state, RuleState::KillswitchActive);
}
