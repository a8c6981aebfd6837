use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fleetctl::notify::NotifyMode;

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Operator tool for the Compiler Explorer fleet")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print what would change without touching the cloud
    #[arg(long)]
    pub dry_run: bool,

    /// Skip interactive confirmation of destructive commands
    #[arg(long)]
    pub skip_confirmation: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Blue/green deployments and traffic switching
    BlueGreen {
        #[command(subcommand)]
        command: BlueGreenCommands,
    },

    /// Instance lifecycle: status, isolation, restarts
    Instances {
        #[command(subcommand)]
        command: InstanceCommands,
    },

    /// Compiler-to-queue routing table maintenance
    CompilerRouting {
        #[command(subcommand)]
        command: RoutingCommands,
    },

    /// Emergency kill-switch for the queue-based router
    CeRouter {
        #[command(subcommand)]
        command: RouterCommands,
    },

    /// Known deployment environments
    Environments {
        #[command(subcommand)]
        command: EnvironmentCommands,
    },
}

#[derive(Subcommand)]
pub enum BlueGreenCommands {
    /// Deploy a version to the inactive color and switch traffic to it
    Deploy {
        /// Target environment
        env: String,

        /// Build identifier to deploy
        version: String,

        /// Fleet size to launch; required when the environment is drained
        #[arg(long)]
        capacity: Option<u32>,

        /// Notification policy for newly-live changes
        #[arg(long, default_value = "off")]
        notify: NotifyMode,
    },

    /// Switch traffic back to the standby color
    Rollback {
        /// Target environment
        env: String,
    },

    /// Report active color, versions and capacities
    Status {
        /// Target environment
        env: String,
    },
}

#[derive(Subcommand)]
pub enum InstanceCommands {
    /// Show every instance with color, lifecycle and health
    Status {
        /// Target environment
        env: String,
    },

    /// Pull an instance out of service, protected, for debugging
    Isolate {
        /// Target environment
        env: String,

        /// Instance to isolate; defaults to the first active instance
        #[arg(long)]
        instance: Option<String>,
    },

    /// Return an isolated instance to service
    Restore {
        /// Target environment
        env: String,

        /// Instance to restore
        #[arg(long)]
        instance: String,
    },

    /// Terminate a previously isolated instance
    TerminateIsolated {
        /// Target environment
        env: String,

        /// Instance to terminate
        #[arg(long)]
        instance: String,
    },

    /// Rolling restart of the active color
    Restart {
        /// Target environment
        env: String,

        /// Instances restarted at once
        #[arg(long)]
        concurrency: Option<u32>,
    },

    /// Replace the fleet via the ASG's native instance refresh
    Refresh {
        /// Target environment
        env: String,
    },
}

#[derive(Subcommand)]
pub enum RoutingCommands {
    /// Reconcile the routing table with the live compiler inventory
    Update {
        /// Target environment
        #[arg(long)]
        env: String,
    },

    /// Compute and print the plan without applying it
    Validate {
        /// Target environment
        #[arg(long)]
        env: String,
    },

    /// Look up the routing entry for one compiler
    Lookup {
        /// Compiler id
        compiler: String,

        /// Environment slice to look in
        #[arg(long, default_value = "prod")]
        env: String,
    },

    /// Delete every routing entry for an environment
    Clear {
        /// Target environment
        #[arg(long)]
        env: String,
    },
}

#[derive(Subcommand)]
pub enum RouterCommands {
    /// Kill-switch: stop routing compilations through the queue path
    Disable {
        /// Target environment
        env: String,
    },

    /// Restore queue routing from the environment template
    Enable {
        /// Target environment
        env: String,
    },

    /// Classify the router rules for one or all environments
    Status {
        /// Target environment; all when omitted
        env: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum EnvironmentCommands {
    /// Print the environment table
    List,
}
