//! Karpenter configuration types

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use eksplan_common::{Error, Result, Tags};
use eksplan_iam::RoleArgs;

pub(crate) const COMPONENT: &str = "karpenter";

/// Service account the controller runs as unless configured otherwise
pub const DEFAULT_SERVICE_ACCOUNT: &str = "karpenter";

/// Shortest KMS data key reuse period, in seconds
pub const MIN_KMS_REUSE_PERIOD: u32 = 60;

/// Longest KMS data key reuse period, in seconds
pub const MAX_KMS_REUSE_PERIOD: u32 = 86_400;

/// Settings of the interruption queue
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueArgs {
    /// Queue name; generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Encrypt with SQS-owned keys; conflicts with the KMS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_sse_enabled: Option<bool>,

    /// Customer KMS key for queue encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_master_key_id: Option<String>,

    /// How long SQS may reuse a data key, in seconds (60 to 86400)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_data_key_reuse_period_seconds: Option<u32>,

    /// Queue tags; override component tags with the same key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl QueueArgs {
    fn has_kms_settings(&self) -> bool {
        self.kms_master_key_id.as_deref().is_some_and(|k| !k.is_empty())
            || self.kms_data_key_reuse_period_seconds.is_some()
    }

    /// Check the encryption settings are consistent
    pub fn validate(&self) -> Result<()> {
        if self.managed_sse_enabled == Some(true) && self.has_kms_settings() {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "queue.managedSseEnabled",
                "kmsMasterKeyId and kmsDataKeyReusePeriodSeconds must not be set if managedSseEnabled is true",
            ));
        }
        if let Some(period) = self.kms_data_key_reuse_period_seconds {
            if !(MIN_KMS_REUSE_PERIOD..=MAX_KMS_REUSE_PERIOD).contains(&period) {
                return Err(Error::configuration_for_field(
                    COMPONENT,
                    "queue.kmsDataKeyReusePeriodSeconds",
                    format!(
                        "kmsDataKeyReusePeriodSeconds must be between {MIN_KMS_REUSE_PERIOD} and {MAX_KMS_REUSE_PERIOD}, got {period}"
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Inputs of the Karpenter component
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KarpenterArgs {
    /// Cluster Karpenter manages nodes for
    #[serde(default)]
    pub cluster_name: String,

    /// Interruption queue settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueArgs>,

    /// Existing controller role; one is created when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_role_arn: Option<String>,

    /// Settings for the created controller role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_role_args: Option<RoleArgs>,

    /// Existing node role; one is created when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role_arn: Option<String>,

    /// Settings for the created node role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role_args: Option<RoleArgs>,

    /// Controller service account; `karpenter` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Grant the node role an EC2_LINUX access entry; on when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_access_entry: Option<bool>,

    /// Kubeconfig for the Helm release; derived from the cluster when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    /// Karpenter chart version
    pub version: String,

    /// Extra chart values; `settings` and `controller` are merged with the
    /// generated ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_values: Option<Value>,

    /// Tags for every resource of the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl KarpenterArgs {
    /// Service account name
    pub fn service_account(&self) -> &str {
        self.service_account
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
    }

    /// Whether the node role gets an access entry
    pub fn create_access_entry(&self) -> bool {
        self.create_access_entry.unwrap_or(true)
    }

    /// Check the inputs before anything is planned
    pub fn validate(&self) -> Result<()> {
        if let Some(queue) = &self.queue {
            queue.validate()?;
        }
        if self.version.is_empty() {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "version",
                "a Karpenter chart version is required",
            ));
        }
        if self.service_account.as_deref().is_some_and(str::is_empty) {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "serviceAccount",
                "service account name must not be empty",
            ));
        }
        if let Some(values) = &self.helm_values {
            if !values.is_object() {
                return Err(Error::configuration_for_field(
                    COMPONENT,
                    "helmValues",
                    "helm values must be a mapping",
                ));
            }
        }
        if self.controller_role_arn.is_none() {
            if let Some(role) = &self.controller_role_args {
                role.validate(COMPONENT, "controllerRoleArgs")?;
            }
        }
        if self.node_role_arn.is_none() {
            if let Some(role) = &self.node_role_args {
                role.validate(COMPONENT, "nodeRoleArgs")?;
            }
        }
        Ok(())
    }
}
