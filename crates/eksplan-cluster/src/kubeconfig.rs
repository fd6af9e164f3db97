//! Kubeconfig derivation
//!
//! A single-cluster, single-context kubeconfig whose user runs
//! `aws eks get-token`. Everything is keyed by the cluster ARN, which is
//! also the current context. The rendered JSON is handed to the Kubernetes
//! provider as an opaque string.

use serde::{Deserialize, Serialize};
use tracing::debug;

use eksplan_common::{CloudLookup, Component, Output, Result};

use crate::handle::ClusterHandle;

/// Component type token
pub const KUBECONFIG_COMPONENT_TYPE: &str = "eksplan:index:KubeConfig";

/// Client authentication API served by `aws eks get-token`
pub const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

/// A kubeconfig document, serialized with kubectl's key names
///
/// Cluster, context and user entries all share the cluster ARN as their name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    current_context: String,
    users: Vec<NamedUser>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEndpoint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEndpoint {
    server: String,
    /// Base64 PEM bundle, as EKS reports it
    certificate_authority_data: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextBinding,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ContextBinding {
    cluster: String,
    user: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct NamedUser {
    name: String,
    user: ExecUser,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ExecUser {
    exec: AwsCliCredential,
}

/// `aws eks get-token` as a client-go credential plugin
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwsCliCredential {
    api_version: String,
    command: String,
    args: Vec<String>,
}

impl Kubeconfig {
    /// Kubeconfig for one EKS cluster
    pub fn for_cluster(
        cluster_arn: &str,
        cluster_name: &str,
        endpoint: &str,
        certificate_authority: &str,
        region: &str,
    ) -> Self {
        let args = [
            "--region",
            region,
            "eks",
            "get-token",
            "--cluster-name",
            cluster_name,
            "--output",
            "json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: cluster_arn.to_string(),
                cluster: ClusterEndpoint {
                    server: endpoint.to_string(),
                    certificate_authority_data: certificate_authority.to_string(),
                },
            }],
            contexts: vec![NamedContext {
                name: cluster_arn.to_string(),
                context: ContextBinding {
                    cluster: cluster_arn.to_string(),
                    user: cluster_arn.to_string(),
                },
            }],
            current_context: cluster_arn.to_string(),
            users: vec![NamedUser {
                name: cluster_arn.to_string(),
                user: ExecUser {
                    exec: AwsCliCredential {
                        api_version: EXEC_API_VERSION.to_string(),
                        command: "aws".to_string(),
                        args,
                    },
                },
            }],
        }
    }

    /// Name of the current context
    pub fn current_context(&self) -> &str {
        &self.current_context
    }
}

/// Rendered kubeconfig for a cluster, depending on whatever the cluster
/// values depend on
pub fn build_kubeconfig(cluster: &ClusterHandle, region: &str) -> Result<Output<String>> {
    cluster
        .arn
        .clone()
        .zip(cluster.name.clone())
        .zip(cluster.endpoint.clone().zip(cluster.certificate_authority.clone()))
        .try_map(|((arn, name), (endpoint, ca))| {
            let config = Kubeconfig::for_cluster(&arn, &name, &endpoint, &ca, region);
            Ok(serde_json::to_string(&config)?)
        })
}

/// A kubeconfig for an existing cluster, as its own component
#[derive(Clone, Debug)]
pub struct KubeconfigPlan {
    /// The component, which holds no resources
    pub component: Component,
    /// Rendered kubeconfig
    pub kubeconfig: Output<String>,
}

/// Kubeconfig for an existing cluster by name
pub fn compose_kubeconfig(
    name: &str,
    cluster_name: &str,
    lookup: &dyn CloudLookup,
) -> Result<KubeconfigPlan> {
    let handle = ClusterHandle::lookup(cluster_name, lookup)?;
    let env = lookup.environment()?;
    let kubeconfig = build_kubeconfig(&handle, &env.region)?;
    debug!(cluster = cluster_name, region = %env.region, "derived kubeconfig");

    let mut component = Component::new(KUBECONFIG_COMPONENT_TYPE, name);
    component.export("kubeconfig", kubeconfig.as_str());
    Ok(KubeconfigPlan {
        component,
        kubeconfig,
    })
}
