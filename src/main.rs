mod cli;

use std::io::Write;

use clap::Parser;
use cli::{
    BlueGreenCommands, Cli, Commands, EnvironmentCommands, InstanceCommands, RouterCommands,
    RoutingCommands,
};
use fleetctl::cloud::Gateway;
use fleetctl::deploy::{self, BlueGreenDeploy, DeployOptions};
use fleetctl::instances::Registry;
use fleetctl::killswitch;
use fleetctl::lifecycle::LifecycleManager;
use anyhow::Result;
use fleetctl::notify::{Dispatcher, GithubClient, NotifyMode};
use fleetctl::routing::{RoutingSynchronizer, SyncReport};
use fleetctl::types::{Color, InstanceSnapshot};
use fleetctl::{Environment, FleetConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli).await {
        print_failure(&err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = FleetConfig::load(cli.config.as_deref())?;
    config.verbose = cli.verbose;
    config.dry_run = cli.dry_run;
    config.skip_confirmation = cli.skip_confirmation;

    let gateway = Gateway::new(config.region.clone());

    match cli.command {
        Commands::BlueGreen { command } => match command {
            BlueGreenCommands::Deploy {
                env,
                version,
                capacity,
                notify,
            } => {
                let env = Environment::by_name(&env)?;
                let listener = config.listener_arn()?.to_string();
                if !confirmed(
                    &config,
                    &format!("Deploy {version} to {env}, switching traffic on success."),
                )? {
                    info!("deploy aborted by operator");
                    return Ok(());
                }

                let asg = gateway.asg().await;
                let compute = gateway.compute().await;
                let lb = gateway.load_balancer().await;
                let ssm = gateway.ssm().await;

                let mut controller = BlueGreenDeploy::new(
                    env,
                    &config.deploy,
                    asg,
                    compute,
                    lb,
                    ssm,
                    listener,
                );
                if let Some(distribution) = config.cdn_distribution(env.name()) {
                    controller =
                        controller.with_cdn(gateway.cdn().await, distribution.to_string());
                }

                let opts = DeployOptions {
                    version: version.clone(),
                    capacity,
                    notify,
                    dry_run: config.dry_run,
                };
                let report = match controller.run(&opts).await {
                    Ok(report) => report,
                    Err(e) => return Err(e.into()),
                };

                if report.dry_run {
                    controller.finish().await;
                    println!(
                        "dry-run: would deploy {} to {} {} at capacity {}",
                        report.version, report.environment, report.to_color, report.capacity
                    );
                    return Ok(());
                }

                // Routing sync and notification are warn-only follow-ups of
                // a switched deploy; the lock stays held until both ran.
                let table = gateway.routing_table().await;
                let sync = RoutingSynchronizer::new(table, &config.routing.table);
                match sync.sync(env, &config.routing, false).await {
                    Ok(outcome) => print_sync_report(&outcome),
                    Err(e) => warn!("routing sync after deploy failed: {e}"),
                }

                if notify != NotifyMode::Off && env.is_production() {
                    match &report.previous_version {
                        Some(previous) if previous != &report.version => {
                            match GithubClient::new(&config.notify.repo, config.notify.timeout_secs)
                            {
                                Ok(gh) => {
                                    let dispatcher = Dispatcher::new(&gh, env, notify);
                                    match dispatcher.dispatch(previous, &report.version).await {
                                        Ok(outcomes) => {
                                            for outcome in outcomes {
                                                println!(
                                                    "  #{}: {}{}",
                                                    outcome.number,
                                                    outcome.action,
                                                    outcome
                                                        .detail
                                                        .map(|d| format!(" ({d})"))
                                                        .unwrap_or_default()
                                                );
                                            }
                                        }
                                        Err(e) => warn!("notification failed: {e}"),
                                    }
                                }
                                Err(e) => warn!("notification client unavailable: {e}"),
                            }
                        }
                        _ => info!("no previous version recorded; skipping notification"),
                    }
                }

                controller.finish().await;
                println!(
                    "{}: {} -> {} now serving {} at capacity {}",
                    report.environment, report.from_color, report.to_color, report.version,
                    report.capacity
                );
            }

            BlueGreenCommands::Rollback { env } => {
                let env = Environment::by_name(&env)?;
                let listener = config.listener_arn()?.to_string();
                if !confirmed(
                    &config,
                    &format!("Switch {env} traffic back to the standby color."),
                )? {
                    info!("rollback aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }

                let asg = gateway.asg().await;
                let compute = gateway.compute().await;
                let lb = gateway.load_balancer().await;
                let ssm = gateway.ssm().await;
                let report =
                    deploy::switch_back(env, asg, compute, lb, ssm, &listener).await?;
                println!(
                    "{}: traffic switched back from {} to {} ({})",
                    report.environment, report.from_color, report.to_color, report.version
                );
            }

            BlueGreenCommands::Status { env } => {
                let env = Environment::by_name(&env)?;
                let asg = gateway.asg().await;
                let compute = gateway.compute().await;
                let lb = gateway.load_balancer().await;
                let ssm = gateway.ssm().await;
                let status = deploy::status(
                    env,
                    asg,
                    compute,
                    lb,
                    ssm,
                    config.listener_arn.as_deref(),
                )
                .await?;

                println!("Environment: {}", status.environment);
                println!("Active color: {}", status.active_color);
                println!(
                    "  blue:  version {:<14} serving {}/{}",
                    status.blue_version.as_deref().unwrap_or("-"),
                    status.blue_serving,
                    status.blue_desired
                );
                println!(
                    "  green: version {:<14} serving {}/{}",
                    status.green_version.as_deref().unwrap_or("-"),
                    status.green_serving,
                    status.green_desired
                );
                if let Some(drift) = &status.drift {
                    warn!("⚠️  {drift}");
                }
            }
        },

        Commands::Instances { command } => match command {
            InstanceCommands::Status { env } => {
                let env = Environment::by_name(&env)?;
                let asg = gateway.asg().await;
                let compute = gateway.compute().await;
                let lb = gateway.load_balancer().await;
                let ssm = gateway.ssm().await;
                let registry = Registry::new(asg, compute, lb, ssm);
                let snapshot = registry.snapshot(env).await?;
                print_snapshot(&snapshot);
            }

            InstanceCommands::Isolate { env, instance } => {
                let env = Environment::by_name(&env)?;
                if !confirmed(
                    &config,
                    &format!(
                        "Isolate {} in {env}: protect, move to standby, deregister.",
                        instance.as_deref().unwrap_or("the first active instance")
                    ),
                )? {
                    info!("isolate aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let manager = lifecycle_manager(&gateway, env, &config).await;
                let id = manager.isolate(instance.as_deref()).await?;
                println!("isolated {id}");
            }

            InstanceCommands::Restore { env, instance } => {
                let env = Environment::by_name(&env)?;
                if !confirmed(&config, &format!("Restore {instance} to service in {env}."))? {
                    info!("restore aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let manager = lifecycle_manager(&gateway, env, &config).await;
                manager.restore(&instance).await?;
                println!("restored {instance}");
            }

            InstanceCommands::TerminateIsolated { env, instance } => {
                let env = Environment::by_name(&env)?;
                if !confirmed(&config, &format!("Terminate isolated instance {instance}."))? {
                    info!("terminate aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let manager = lifecycle_manager(&gateway, env, &config).await;
                manager.terminate_isolated(&instance).await?;
                println!("terminated {instance}");
            }

            InstanceCommands::Restart { env, concurrency } => {
                let env = Environment::by_name(&env)?;
                if !confirmed(
                    &config,
                    &format!("Rolling restart of the active {env} fleet."),
                )? {
                    info!("restart aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let manager = lifecycle_manager(&gateway, env, &config).await;
                let report = manager.restart(concurrency).await?;
                println!(
                    "restarted {} instances in {}",
                    report.restarted.len(),
                    report.environment
                );
            }

            InstanceCommands::Refresh { env } => {
                let env = Environment::by_name(&env)?;
                if !confirmed(
                    &config,
                    &format!("Replace every {env} instance via ASG instance refresh."),
                )? {
                    info!("refresh aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let manager = lifecycle_manager(&gateway, env, &config).await;
                manager.refresh().await?;
                println!("instance refresh completed for {env}");
            }
        },

        Commands::CompilerRouting { command } => match command {
            RoutingCommands::Update { env } => {
                let env = Environment::by_name(&env)?;
                if !confirmed(
                    &config,
                    &format!("Reconcile the routing table slice for {env}."),
                )? {
                    info!("routing update aborted by operator");
                    return Ok(());
                }
                let table = gateway.routing_table().await;
                let sync = RoutingSynchronizer::new(table, &config.routing.table);
                let report = sync.sync(env, &config.routing, config.dry_run).await?;
                print_sync_report(&report);
            }

            RoutingCommands::Validate { env } => {
                let env = Environment::by_name(&env)?;
                let table = gateway.routing_table().await;
                let sync = RoutingSynchronizer::new(table, &config.routing.table);
                let report = sync.sync(env, &config.routing, true).await?;
                print_sync_report(&report);
            }

            RoutingCommands::Lookup { compiler, env } => {
                let env = Environment::by_name(&env)?;
                let table = gateway.routing_table().await;
                let sync = RoutingSynchronizer::new(table, &config.routing.table);
                let entry = sync.lookup(env, &compiler).await?;
                println!(
                    "{}: {} -> {} (updated {})",
                    entry.compiler_id,
                    entry.routing_type.as_str(),
                    entry.target,
                    entry.last_updated
                );
            }

            RoutingCommands::Clear { env } => {
                let env = Environment::by_name(&env)?;
                if !confirmed(
                    &config,
                    &format!("Delete EVERY routing entry for {env}."),
                )? {
                    info!("routing clear aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let table = gateway.routing_table().await;
                let sync = RoutingSynchronizer::new(table, &config.routing.table);
                let removed = sync.clear(env).await?;
                println!("removed {removed} routing entries for {env}");
            }
        },

        Commands::CeRouter { command } => match command {
            RouterCommands::Disable { env } => {
                let env = Environment::by_name(&env)?;
                let listener = config.listener_arn()?.to_string();
                if !confirmed(
                    &config,
                    &format!("Disable queue routing for {env}; traffic falls back to instances."),
                )? {
                    info!("kill-switch aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let lb = gateway.load_balancer().await;
                let ssm = gateway.ssm().await;
                let status = killswitch::disable(lb, ssm, &listener, env).await?;
                println!("{}: {}", status.environment, status.state.as_str());
            }

            RouterCommands::Enable { env } => {
                let env = Environment::by_name(&env)?;
                let listener = config.listener_arn()?.to_string();
                if !confirmed(&config, &format!("Restore queue routing for {env}."))? {
                    info!("kill-switch aborted by operator");
                    return Ok(());
                }
                if config.dry_run {
                    println!("dry-run: no changes made");
                    return Ok(());
                }
                let lb = gateway.load_balancer().await;
                let ssm = gateway.ssm().await;
                let status = killswitch::enable(lb, ssm, &listener, env).await?;
                println!("{}: {}", status.environment, status.state.as_str());
            }

            RouterCommands::Status { env } => {
                let listener = config.listener_arn()?.to_string();
                let environments: Vec<Environment> = match env {
                    Some(name) => vec![Environment::by_name(&name)?],
                    None => Environment::ALL.to_vec(),
                };
                let lb = gateway.load_balancer().await;
                let statuses = killswitch::status(lb, &listener, &environments).await?;
                for status in statuses {
                    println!("{:<16} {}", status.environment, status.state.as_str());
                }
            }
        },

        Commands::Environments { command } => match command {
            EnvironmentCommands::List => {
                println!(
                    "{:<16} {:<6} {:<9} {:<9} {:<8} {:<6} {}",
                    "NAME", "PROD", "OS", "ARCH", "ROUTING", "KEEP", "HOSTNAME"
                );
                println!("{}", "─".repeat(80));
                for env in Environment::ALL {
                    println!(
                        "{:<16} {:<6} {:<9} {:<9} {:<8} {:<6} {}",
                        env.name(),
                        if env.is_production() { "yes" } else { "no" },
                        format!("{:?}", env.os_family()).to_lowercase(),
                        format!("{:?}", env.architecture()).to_lowercase(),
                        match env.routing_mode() {
                            fleetctl::environment::RoutingMode::Queue => "queue",
                            fleetctl::environment::RoutingMode::DirectUrl => "url",
                        },
                        env.keep_builds(),
                        env.external_hostname()
                    );
                }
            }
        },
    }

    Ok(())
}

async fn lifecycle_manager<'a>(
    gateway: &'a Gateway,
    env: Environment,
    config: &'a FleetConfig,
) -> LifecycleManager<'a> {
    let asg = gateway.asg().await;
    let compute = gateway.compute().await;
    let lb = gateway.load_balancer().await;
    let ssm = gateway.ssm().await;
    LifecycleManager::new(env, &config.lifecycle, asg, compute, lb, ssm, ssm)
}

/// Destructive commands print their plan and require an interactive
/// `yes`; `--skip-confirmation` and dry runs go straight through.
fn confirmed(config: &FleetConfig, plan: &str) -> std::io::Result<bool> {
    println!("{plan}");
    if config.skip_confirmation || config.dry_run {
        return Ok(true);
    }
    print!("Type 'yes' to continue: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim() == "yes")
}

fn print_sync_report(report: &SyncReport) {
    println!(
        "{}: {} live compilers, plan: {}{}",
        report.environment,
        report.live_compilers,
        report.plan.summary(),
        if report.applied { " (applied)" } else { "" }
    );
    for entry in &report.plan.adds {
        println!("  + {} -> {}", entry.compiler_id, entry.target);
    }
    for entry in &report.plan.updates {
        println!("  ~ {} -> {}", entry.compiler_id, entry.target);
    }
    for key in &report.plan.deletes {
        println!("  - {key}");
    }
}

fn print_snapshot(snapshot: &InstanceSnapshot) {
    println!(
        "Environment: {} (active: {}, taken {})",
        snapshot.environment, snapshot.active_color, snapshot.taken_at
    );
    println!(
        "{:<20} {:<7} {:<12} {:<10} {:<16} {}",
        "INSTANCE ID", "COLOR", "LIFECYCLE", "HEALTH", "IP", "FLAGS"
    );
    println!("{}", "─".repeat(80));
    for instance in &snapshot.instances {
        let mut flags = Vec::new();
        if instance.isolated {
            flags.push("isolated");
        }
        if instance.scale_in_protected {
            flags.push("scale-in-protect");
        }
        if instance.stop_protected {
            flags.push("stop-protect");
        }
        if instance.termination_protected {
            flags.push("term-protect");
        }
        println!(
            "{:<20} {:<7} {:<12} {:<10} {:<16} {}",
            instance.instance_id,
            instance.color.as_str(),
            instance.lifecycle.as_str(),
            instance.health.as_str(),
            instance.private_ip.as_deref().unwrap_or("-"),
            flags.join(",")
        );
    }

    let isolated: Vec<&str> = snapshot
        .isolated()
        .map(|i| i.instance_id.as_str())
        .collect();
    if !isolated.is_empty() {
        println!();
        println!("isolated: {}", isolated.join(", "));
    }
    for color in [Color::Blue, Color::Green] {
        let total = snapshot.by_color(color).count();
        if total > 0 {
            println!(
                "{}: {}/{} serving",
                color,
                snapshot.serving_count(color),
                total
            );
        }
    }
}

fn print_failure(err: &anyhow::Error) {
    error!("{err}");
    eprintln!("fleetctl failed: {err}");
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}
