//! Validate command

use clap::Args;
use tracing::info;

use super::DeploymentFile;
use crate::compose::compose;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub deployment: DeploymentFile,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    println!("{}", check(&args)?);
    Ok(())
}

fn check(args: &ValidateArgs) -> Result<String> {
    let config = args.deployment.load()?;
    if config.component_names().is_empty() {
        return Err(Error::validation(format!(
            "{}: no components configured",
            args.deployment.file.display()
        )));
    }

    let deployment = compose(&config)?;
    let ordered = deployment.provisioning_order()?.len();
    info!(file = %args.deployment.file.display(), resources = ordered, "deployment is valid");
    Ok(format!(
        "{} valid: {} components, {} resources",
        args.deployment.file.display(),
        deployment.components.len(),
        ordered
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::config::tests::DEPLOYMENT;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let args = ValidateArgs {
            deployment: DeploymentFile {
                file: file.path().to_path_buf(),
            },
        };
        (file, args)
    }

    #[test]
    fn full_deployment_is_valid() {
        let (_file, args) = args_for(DEPLOYMENT);
        let summary = check(&args).unwrap();
        assert!(summary.contains("5 components"));
    }

    #[test]
    fn environment_without_components_is_rejected() {
        let (_file, args) = args_for(
            "environment:\n  region: us-west-2\n  accountId: \"123456789012\"\n  callerArn: arn:aws:iam::123456789012:user/ci\n  defaultKubernetesVersion: \"1.32\"\n",
        );
        assert!(matches!(check(&args), Err(Error::Validation { .. })));
    }

    #[test]
    fn composition_errors_surface_as_plan_errors() {
        let broken = DEPLOYMENT.replace("subnetIds: [subnet-a, subnet-b]", "subnetIds: []");
        let (_file, args) = args_for(&broken);
        match check(&args) {
            Err(Error::Plan(err)) => assert!(err.is_configuration()),
            other => panic!("expected a plan error, got {other:?}"),
        }
    }
}
