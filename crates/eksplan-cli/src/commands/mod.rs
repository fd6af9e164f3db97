//! CLI commands

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use serde::Serialize;

use crate::config::DeploymentConfig;
use crate::Result;

pub mod kubeconfig;
pub mod plan;
pub mod schema;
pub mod validate;

/// Where the deployment file lives
#[derive(Args, Debug, Clone)]
pub struct DeploymentFile {
    /// Deployment file (YAML)
    #[arg(short, long, env = "EKSPLAN_FILE")]
    pub file: PathBuf,
}

impl DeploymentFile {
    /// Read and parse the deployment file
    pub fn load(&self) -> Result<DeploymentConfig> {
        DeploymentConfig::load(&self.file)
    }
}

/// Document format on stdout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// YAML document
    #[default]
    Yaml,
    /// Pretty-printed JSON
    Json,
}

impl OutputFormat {
    /// Render a document in this format
    pub fn render<T: Serialize>(&self, document: &T) -> Result<String> {
        match self {
            OutputFormat::Yaml => Ok(serde_yaml::to_string(document)?),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(document)?),
        }
    }
}
