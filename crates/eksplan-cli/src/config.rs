//! Deployment file
//!
//! One YAML document describes the cloud snapshot composition runs against
//! and the components to plan.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use eksplan_buildkit::{BuildkitBuilderArgs, BuildkitCertsArgs};
use eksplan_cluster::{ClusterArgs, IrsaRoleArgs};
use eksplan_common::StaticLookup;
use eksplan_karpenter::KarpenterArgs;

use crate::Result;

/// A named component and its arguments
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[schemars(bound = "T: JsonSchema + Default")]
pub struct ComponentConfig<T> {
    /// Component name, used as the prefix of its resource ids
    pub name: String,
    /// Component arguments
    #[serde(default)]
    pub args: T,
}

/// Everything one plan is composed from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Cloud snapshot answering the lookups
    pub environment: StaticLookup,

    /// EKS cluster to create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ComponentConfig<ClusterArgs>>,

    /// Karpenter installation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub karpenter: Option<ComponentConfig<KarpenterArgs>>,

    /// IAM roles for service accounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub irsa_roles: Vec<ComponentConfig<IrsaRoleArgs>>,

    /// BuildKit TLS material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildkit_certs: Option<ComponentConfig<BuildkitCertsArgs>>,

    /// BuildKit daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildkit_builder: Option<ComponentConfig<BuildkitBuilderArgs>>,
}

impl DeploymentConfig {
    /// Parse a deployment document
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a deployment file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        debug!(path = %path.display(), "loaded deployment file");
        Ok(config)
    }

    /// Names of every configured component, in composition order
    pub fn component_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        names.extend(self.cluster.as_ref().map(|c| c.name.as_str()));
        names.extend(self.karpenter.as_ref().map(|c| c.name.as_str()));
        names.extend(self.irsa_roles.iter().map(|c| c.name.as_str()));
        names.extend(self.buildkit_certs.as_ref().map(|c| c.name.as_str()));
        names.extend(self.buildkit_builder.as_ref().map(|c| c.name.as_str()));
        names
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const DEPLOYMENT: &str = r#"
environment:
  partition: aws
  region: us-west-2
  accountId: "123456789012"
  callerArn: arn:aws:sts::123456789012:assumed-role/Deployer/ci
  defaultKubernetesVersion: "1.32"
  clusters:
    - name: legacy
      arn: arn:aws:eks:us-west-2:123456789012:cluster/legacy
      endpoint: https://LEGACY.gr7.us-west-2.eks.amazonaws.com
      certificateAuthorityData: LS0tLS1CRUdJTg==
      version: "1.31"
      identities:
        - oidcs:
            - issuer: https://oidc.eks.us-west-2.amazonaws.com/id/LEGACY
cluster:
  name: prod
  args:
    name: prod
    vpcConfig:
      subnetIds: [subnet-a, subnet-b]
karpenter:
  name: karpenter
  args:
    version: 1.3.3
irsaRoles:
  - name: legacy-apps
    args:
      clusterName: legacy
      serviceAccounts:
        - namespace: apps
          serviceAccount: worker
buildkitCerts:
  name: bk
  args:
    keyAlgorithm: ECDSA
    serverDNSNames: [bk-service.default.svc]
buildkitBuilder:
  name: bk
  args:
    bottlerocket: true
"#;

    #[test]
    fn parses_every_section() {
        let config = DeploymentConfig::from_yaml(DEPLOYMENT).unwrap();
        assert_eq!(config.environment.environment.region, "us-west-2");
        assert_eq!(config.environment.clusters.len(), 1);
        assert_eq!(config.karpenter.as_ref().unwrap().args.version, "1.3.3");
        assert_eq!(config.irsa_roles[0].args.cluster_name, "legacy");
        assert_eq!(
            config.component_names(),
            vec!["prod", "karpenter", "legacy-apps", "bk", "bk"]
        );
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEPLOYMENT.as_bytes()).unwrap();
        let config = DeploymentConfig::load(file.path()).unwrap();
        assert!(config.cluster.is_some());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeploymentConfig::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn environment_is_required() {
        let err = DeploymentConfig::from_yaml("cluster:\n  name: prod\n").unwrap_err();
        assert!(matches!(err, crate::Error::Yaml(_)));
    }
}
