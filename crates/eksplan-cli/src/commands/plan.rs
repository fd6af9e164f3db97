//! Plan command

use std::collections::BTreeMap;

use clap::Args;
use serde::Serialize;
use serde_json::Value;

use eksplan_common::{Deployment, Resource};

use super::{DeploymentFile, OutputFormat};
use crate::compose::compose;
use crate::Result;

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub deployment: DeploymentFile,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

/// The provisioning plan handed to the executor
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDocument<'a> {
    /// Resources in provisioning order
    pub resources: Vec<&'a Resource>,
    /// Exported values keyed by component name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<&'a str, &'a BTreeMap<String, Value>>,
}

impl<'a> PlanDocument<'a> {
    pub fn from_deployment(deployment: &'a Deployment) -> Result<Self> {
        let resources = deployment.provisioning_order()?;
        let outputs = deployment
            .components
            .iter()
            .filter(|c| !c.outputs.is_empty())
            .map(|c| (c.name.as_str(), &c.outputs))
            .collect();
        Ok(Self { resources, outputs })
    }
}

pub fn run(args: PlanArgs) -> Result<()> {
    print!("{}", render(&args)?);
    Ok(())
}

fn render(args: &PlanArgs) -> Result<String> {
    let config = args.deployment.load()?;
    let deployment = compose(&config)?;
    let document = PlanDocument::from_deployment(&deployment)?;
    args.output.render(&document)
}
