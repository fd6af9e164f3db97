//! External descriptive queries
//!
//! Composition needs a handful of facts about the present state of the cloud
//! account: partition, region, caller identity, existing clusters and the
//! addon version catalogue. [`CloudLookup`] is the seam for those queries.
//! [`StaticLookup`] answers them from a configuration snapshot.

use std::cmp::Ordering;
use std::collections::BTreeMap;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// IP family of a cluster's service network
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4 service addresses
    #[default]
    Ipv4,
    /// IPv6 service addresses
    Ipv6,
}

impl IpFamily {
    /// Wire value used by the EKS API
    pub fn as_str(&self) -> &'static str {
        match self {
            IpFamily::Ipv4 => "ipv4",
            IpFamily::Ipv6 => "ipv6",
        }
    }
}

/// Partition, region and account the composition targets
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsEnvironment {
    /// Partition (e.g., "aws", "aws-cn", "aws-us-gov")
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Region (e.g., "us-west-2")
    pub region: String,
    /// Account id of the caller
    pub account_id: String,
    /// DNS suffix of the partition; derived from the partition when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_suffix: Option<String>,
}

fn default_partition() -> String {
    "aws".to_string()
}

impl AwsEnvironment {
    /// Environment in the given partition with the partition's DNS suffix
    pub fn new(
        partition: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            region: region.into(),
            account_id: account_id.into(),
            dns_suffix: None,
        }
    }

    /// DNS suffix used to build service principals (e.g., "ec2.amazonaws.com")
    pub fn dns_suffix(&self) -> &str {
        self.dns_suffix
            .as_deref()
            .unwrap_or_else(|| dns_suffix_for(&self.partition))
    }

    /// Service principal for a service in this partition
    pub fn service_principal(&self, service: &str) -> String {
        format!("{service}.{}", self.dns_suffix())
    }
}

/// DNS suffix for a partition
pub fn dns_suffix_for(partition: &str) -> &'static str {
    match partition {
        "aws-cn" => "amazonaws.com.cn",
        "aws-iso" => "c2s.ic.gov",
        "aws-iso-b" => "sc2s.sgov.gov",
        "aws-iso-e" => "cloud.adc-e.uk",
        "aws-iso-f" => "csp.hci.ic.gov",
        _ => "amazonaws.com",
    }
}

/// Identity the composition runs as
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    /// Account id
    pub account_id: String,
    /// Caller ARN; an STS assumed-role ARN for most CI callers
    pub arn: String,
}

/// OIDC provider attached to a cluster identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcIdentity {
    /// Issuer URL
    pub issuer: String,
}

/// Identity providers of a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIdentity {
    /// OIDC providers
    #[serde(default)]
    pub oidcs: Vec<OidcIdentity>,
}

/// Present state of an existing EKS cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDescription {
    /// Cluster name
    pub name: String,
    /// Cluster ARN
    pub arn: String,
    /// API server endpoint
    pub endpoint: String,
    /// Base64 CA bundle of the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    /// Kubernetes version
    pub version: String,
    /// Identity providers; empty when the cluster has none
    #[serde(default)]
    pub identities: Vec<ClusterIdentity>,
    /// IP family of the service network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_family: Option<IpFamily>,
}

impl ClusterDescription {
    /// Issuer URL of the cluster's first OIDC provider
    pub fn oidc_issuer(&self) -> Result<&str> {
        let resource = format!("cluster/{}", self.name);
        let identity = self
            .identities
            .first()
            .ok_or_else(|| Error::lookup(&resource, "no identities found"))?;
        identity
            .oidcs
            .first()
            .map(|oidc| oidc.issuer.as_str())
            .ok_or_else(|| Error::lookup(&resource, "no OIDC issuers found"))
    }

    /// CA bundle of the API server
    pub fn certificate_authority(&self) -> Result<&str> {
        self.certificate_authority_data
            .as_deref()
            .filter(|data| !data.is_empty())
            .ok_or_else(|| {
                Error::lookup(
                    format!("cluster/{}", self.name),
                    "no certificate authority data",
                )
            })
    }

    /// True when the service network is IPv6
    pub fn is_ipv6(&self) -> bool {
        self.ip_family == Some(IpFamily::Ipv6)
    }
}

/// Read-only queries against the present state of the cloud account
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait CloudLookup {
    /// Partition, region, account and DNS suffix
    fn environment(&self) -> Result<AwsEnvironment>;

    /// Identity of the caller
    fn caller_identity(&self) -> Result<CallerIdentity>;

    /// Describe an existing cluster by name
    fn describe_cluster(&self, name: &str) -> Result<ClusterDescription>;

    /// Kubernetes version new clusters get when none is pinned
    fn default_kubernetes_version(&self) -> Result<String>;

    /// Addon version for a Kubernetes version
    ///
    /// `most_recent` selects the newest compatible version instead of the
    /// default one.
    fn addon_version(&self, addon: &str, kubernetes_version: &str, most_recent: bool)
        -> Result<String>;
}

/// One published version of an addon
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonVersion {
    /// Version string (e.g., "v1.19.2-eksbuild.1")
    pub version: String,
    /// Kubernetes versions the addon version supports
    pub kubernetes_versions: Vec<String>,
    /// Default version for those Kubernetes versions
    #[serde(default)]
    pub default: bool,
}

/// [`CloudLookup`] backed by a configuration snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticLookup {
    /// Target environment
    #[serde(flatten)]
    pub environment: AwsEnvironment,
    /// Caller ARN
    pub caller_arn: String,
    /// Existing clusters
    #[serde(default)]
    pub clusters: Vec<ClusterDescription>,
    /// Kubernetes version for clusters that do not pin one
    pub default_kubernetes_version: String,
    /// Addon version catalogue keyed by addon name
    #[serde(default)]
    pub addons: BTreeMap<String, Vec<AddonVersion>>,
}

impl StaticLookup {
    /// Snapshot with no clusters and no addons
    pub fn new(
        environment: AwsEnvironment,
        caller_arn: impl Into<String>,
        default_kubernetes_version: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            caller_arn: caller_arn.into(),
            clusters: Vec::new(),
            default_kubernetes_version: default_kubernetes_version.into(),
            addons: BTreeMap::new(),
        }
    }

    /// Add an existing cluster
    pub fn with_cluster(mut self, cluster: ClusterDescription) -> Self {
        self.clusters.push(cluster);
        self
    }

    /// Add a published addon version
    pub fn with_addon_version(mut self, addon: &str, version: AddonVersion) -> Self {
        self.addons.entry(addon.to_string()).or_default().push(version);
        self
    }
}

impl CloudLookup for StaticLookup {
    fn environment(&self) -> Result<AwsEnvironment> {
        Ok(self.environment.clone())
    }

    fn caller_identity(&self) -> Result<CallerIdentity> {
        Ok(CallerIdentity {
            account_id: self.environment.account_id.clone(),
            arn: self.caller_arn.clone(),
        })
    }

    fn describe_cluster(&self, name: &str) -> Result<ClusterDescription> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| Error::lookup(format!("cluster/{name}"), "cluster not found"))
    }

    fn default_kubernetes_version(&self) -> Result<String> {
        Ok(self.default_kubernetes_version.clone())
    }

    fn addon_version(
        &self,
        addon: &str,
        kubernetes_version: &str,
        most_recent: bool,
    ) -> Result<String> {
        let resource = format!("addon/{addon}");
        let compatible: Vec<&AddonVersion> = self
            .addons
            .get(addon)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|v| v.kubernetes_versions.iter().any(|k| k == kubernetes_version))
                    .collect()
            })
            .unwrap_or_default();

        let chosen = if most_recent {
            compatible
                .into_iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version))
        } else {
            compatible.into_iter().find(|v| v.default)
        };

        let version = chosen.map(|v| v.version.clone()).ok_or_else(|| {
            Error::lookup(
                resource,
                format!("no version found for Kubernetes {kubernetes_version}"),
            )
        })?;
        debug!(addon, kubernetes_version, most_recent, version = %version, "resolved addon version");
        Ok(version)
    }
}

/// Order version strings by their numeric components
///
/// `v1.19.2-eksbuild.1` compares as `[1, 19, 2, 1]`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    numeric_parts(a).cmp(&numeric_parts(b))
}

fn numeric_parts(version: &str) -> Vec<u64> {
    version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}
