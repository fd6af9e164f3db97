//! eksplan CLI library

pub mod commands;
pub mod compose;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand, ValueEnum};

use eksplan_common::telemetry::{LogConfig, LogFormat};

/// eksplan - desired-state plans for EKS, Karpenter and BuildKit
#[derive(Parser, Debug)]
#[command(name = "eksplan")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogStyle::Pretty, env = "EKSPLAN_LOG_FORMAT")]
    pub log_format: LogStyle,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log line format on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogStyle {
    /// Human-readable lines
    Pretty,
    /// JSON lines
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compose every component and print the ordered plan
    Plan(commands::plan::PlanArgs),
    /// Compose every component and check the resource graph
    Validate(commands::validate::ValidateArgs),
    /// Print the kubeconfig of an existing cluster
    Kubeconfig(commands::kubeconfig::KubeconfigArgs),
    /// Print the JSON schema of the deployment file
    Schema(commands::schema::SchemaArgs),
}

impl Cli {
    /// Logging settings for this invocation
    pub fn log_config(&self) -> LogConfig {
        let format = match self.log_format {
            LogStyle::Pretty => LogFormat::Pretty,
            LogStyle::Json => LogFormat::Json,
        };
        LogConfig {
            format,
            ..Default::default()
        }
    }

    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Plan(args) => commands::plan::run(args),
            Commands::Validate(args) => commands::validate::run(args),
            Commands::Kubeconfig(args) => commands::kubeconfig::run(args),
            Commands::Schema(args) => commands::schema::run(args),
        }
    }
}
