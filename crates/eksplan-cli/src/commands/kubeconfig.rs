//! Kubeconfig command

use clap::Args;
use serde_json::Value;

use eksplan_cluster::compose_kubeconfig;

use super::{DeploymentFile, OutputFormat};
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct KubeconfigArgs {
    #[command(flatten)]
    pub deployment: DeploymentFile,

    /// Existing cluster to connect to
    #[arg(short, long)]
    pub cluster: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

pub fn run(args: KubeconfigArgs) -> Result<()> {
    print!("{}", render(&args)?);
    Ok(())
}

fn render(args: &KubeconfigArgs) -> Result<String> {
    let config = args.deployment.load()?;
    let plan = compose_kubeconfig(
        &format!("{}-kubeconfig", args.cluster),
        &args.cluster,
        &config.environment,
    )?;
    if plan.kubeconfig.is_pending() {
        return Err(Error::validation(format!(
            "cluster {} has no provisioned values yet",
            args.cluster
        )));
    }
    let kubeconfig: Value = serde_json::from_str(plan.kubeconfig.as_str())?;
    args.output.render(&kubeconfig)
}
