//! Cluster configuration types

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use eksplan_common::lookup::IpFamily;
use eksplan_common::{Error, Result, Tags};

use crate::network::validate_service_cidr;

const COMPONENT: &str = "cluster";

/// API server endpoint exposure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EndpointExposure {
    /// Reachable from the internet
    Public,
    /// Reachable from inside the VPC
    Private,
}

/// Kubernetes version support tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SupportType {
    /// Standard support window
    Standard,
    /// Extended support window
    Extended,
}

impl SupportType {
    /// EKS API value
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportType::Standard => "STANDARD",
            SupportType::Extended => "EXTENDED",
        }
    }
}

/// How EKS resolves field conflicts when managing an addon
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResolveConflicts {
    /// Fail on conflicts
    None,
    /// Overwrite conflicting fields
    Overwrite,
    /// Keep conflicting fields; only valid on update
    Preserve,
}

impl ResolveConflicts {
    /// EKS API value
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveConflicts::None => "NONE",
            ResolveConflicts::Overwrite => "OVERWRITE",
            ResolveConflicts::Preserve => "PRESERVE",
        }
    }
}

/// VPC placement of the control plane
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    /// Subnets for the control plane network interfaces
    pub subnet_ids: Vec<String>,

    /// Extra security groups for the control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_security_group_ids: Vec<String>,

    /// Endpoint exposure; public only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_endpoints: Option<Vec<EndpointExposure>>,
}

impl VpcConfig {
    /// Public endpoint is on unless exposure is listed without it
    pub fn public_access(&self) -> bool {
        self.api_server_endpoints
            .as_ref()
            .map_or(true, |e| e.contains(&EndpointExposure::Public))
    }

    /// Private endpoint is on only when listed
    pub fn private_access(&self) -> bool {
        self.api_server_endpoints
            .as_ref()
            .is_some_and(|e| e.contains(&EndpointExposure::Private))
    }
}

/// Zonal shift settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZonalShiftConfig {
    /// Enable zonal shift
    pub enabled: bool,
}

/// Service network settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// IP family of services
    pub ip_family: IpFamily,

    /// CIDR for service addresses; must match the IP family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cidr: Option<String>,
}

/// Auto mode settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoModeConfig {
    /// Enable auto mode; on when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Built-in node pools; `general-purpose` and `system` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_pools: Option<Vec<String>>,

    /// Existing node role for auto mode nodes; one is created when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role_arn: Option<String>,
}

/// Pod identity association installed with an addon
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonPodIdentityAssociation {
    /// Role assumed by the service account
    pub role_arn: String,
    /// Service account of the addon
    pub service_account: String,
}

/// Settings for one EKS addon
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonConfiguration {
    /// Pinned version; resolved from the cluster's Kubernetes version when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addon_version: Option<String>,

    /// Use the newest compatible version instead of the default one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_recent: Option<bool>,

    /// Addon configuration, sent to EKS as a JSON string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_values: Option<Value>,

    /// Pod identity associations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_identity_associations: Vec<AddonPodIdentityAssociation>,

    /// Keep addon resources when the addon is removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve: Option<bool>,

    /// Conflict resolution on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_conflicts_on_create: Option<ResolveConflicts>,

    /// Conflict resolution on update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_conflicts_on_update: Option<ResolveConflicts>,

    /// IRSA role for the addon's service account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_role_arn: Option<String>,

    /// Addon tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

/// Inputs of the cluster component
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterArgs {
    /// Cluster name; generated by the executor when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Existing cluster role; one is created when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,

    /// VPC placement (required)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_config: Option<VpcConfig>,

    /// Kubernetes version; the current default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Zonal shift settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zonal_shift_config: Option<ZonalShiftConfig>,

    /// Support tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_type: Option<SupportType>,

    /// Service network settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_config: Option<NetworkConfig>,

    /// Existing KMS key for secrets encryption; one is created when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_arn: Option<String>,

    /// Addons keyed by addon name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub addons: BTreeMap<String, AddonConfiguration>,

    /// Auto mode settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_mode: Option<AutoModeConfig>,

    /// Tags for every resource of the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl ClusterArgs {
    /// VPC settings, which every cluster needs
    pub fn vpc(&self) -> Result<&VpcConfig> {
        self.vpc_config.as_ref().ok_or_else(|| {
            Error::configuration_for_field(COMPONENT, "vpcConfig", "missing vpcConfig")
        })
    }

    /// Auto mode is on unless explicitly disabled
    pub fn auto_mode_enabled(&self) -> bool {
        self.auto_mode
            .as_ref()
            .and_then(|a| a.enabled)
            .unwrap_or(true)
    }

    /// Check the inputs before anything is planned
    pub fn validate(&self) -> Result<()> {
        let vpc = self.vpc()?;
        if vpc.subnet_ids.is_empty() {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "vpcConfig.subnetIds",
                "at least one subnet is required",
            ));
        }
        if vpc
            .api_server_endpoints
            .as_ref()
            .is_some_and(|e| e.is_empty())
        {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "vpcConfig.apiServerEndpoints",
                "at least one endpoint exposure is required when the list is given",
            ));
        }

        if let Some(network) = &self.network_config {
            if let Some(cidr) = &network.service_cidr {
                validate_service_cidr(network.ip_family, cidr)?;
            }
        }

        for (addon, config) in &self.addons {
            if config.resolve_conflicts_on_create == Some(ResolveConflicts::Preserve) {
                return Err(Error::configuration_for_field(
                    COMPONENT,
                    format!("addons.{addon}.resolveConflictsOnCreate"),
                    "PRESERVE is only valid on update",
                ));
            }
        }
        Ok(())
    }
}
