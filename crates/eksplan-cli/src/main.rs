//! eksplan CLI
//!
//! Plans EKS clusters, Karpenter and BuildKit from a deployment file.

use clap::Parser;

use eksplan_cli::{Cli, Result};
use eksplan_common::telemetry::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_config())?;
    cli.run()
}
