//! Schema command

use clap::Args;
use schemars::schema_for;

use crate::config::DeploymentConfig;
use crate::Result;

#[derive(Args, Debug)]
pub struct SchemaArgs {}

pub fn run(_args: SchemaArgs) -> Result<()> {
    println!("{}", render()?);
    Ok(())
}

fn render() -> Result<String> {
    let schema = schema_for!(DeploymentConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}
