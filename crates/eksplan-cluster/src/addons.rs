//! EKS addon planning

use serde_json::{json, Value};
use tracing::{debug, info};

use eksplan_common::tags;
use eksplan_common::{CloudLookup, Output, Resource, Result};

use crate::args::AddonConfiguration;

/// Type token of EKS addons
pub const ADDON_TYPE: &str = "aws:eks/addon:Addon";

/// Version to install: the pinned one, else the catalogue's pick for the
/// Kubernetes version
pub fn resolve_addon_version(
    addon: &str,
    config: &AddonConfiguration,
    kubernetes_version: &str,
    lookup: &dyn CloudLookup,
) -> Result<String> {
    if let Some(version) = &config.addon_version {
        debug!(addon, version = %version, "using pinned addon version");
        return Ok(version.clone());
    }
    let most_recent = config.most_recent.unwrap_or(false);
    let version = lookup.addon_version(addon, kubernetes_version, most_recent)?;
    info!(addon, kubernetes_version, most_recent, version = %version, "resolved addon version");
    Ok(version)
}

/// Addon resource for a cluster
pub fn addon_resource(
    id: &str,
    addon: &str,
    config: &AddonConfiguration,
    version: &str,
    cluster_name: Output<String>,
) -> Result<Resource> {
    let configuration_values = config
        .configuration_values
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let pod_identity: Vec<Value> = config
        .pod_identity_associations
        .iter()
        .map(|p| json!({ "roleArn": p.role_arn, "serviceAccount": p.service_account }))
        .collect();

    let resource = Resource::new(ADDON_TYPE, id)
        .set_output("clusterName", cluster_name)
        .set("addonName", addon)
        .set("addonVersion", version)
        .set_opt("configurationValues", configuration_values)
        .set_opt("preserve", config.preserve)
        .set_opt(
            "resolveConflictsOnCreate",
            config.resolve_conflicts_on_create.map(|r| r.as_str()),
        )
        .set_opt(
            "resolveConflictsOnUpdate",
            config.resolve_conflicts_on_update.map(|r| r.as_str()),
        )
        .set_opt("serviceAccountRoleArn", config.service_account_role_arn.clone())
        .set_opt("tags", config.tags.as_ref().map(tags::to_map_value));

    Ok(if pod_identity.is_empty() {
        resource
    } else {
        resource.set("podIdentityAssociations", pod_identity)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eksplan_common::lookup::{AddonVersion, AwsEnvironment};
    use eksplan_common::{ResourceId, StaticLookup};

    fn lookup() -> StaticLookup {
        StaticLookup::new(
            AwsEnvironment::new("aws", "us-west-2", "123456789012"),
            "arn:aws:iam::123456789012:user/ci",
            "1.32",
        )
        .with_addon_version(
            "vpc-cni",
            AddonVersion {
                version: "v1.19.2-eksbuild.1".to_string(),
                kubernetes_versions: vec!["1.32".to_string()],
                default: true,
            },
        )
    }

    #[test]
    fn pinned_version_skips_lookup() {
        let config = AddonConfiguration {
            addon_version: Some("v1.0.0".to_string()),
            ..Default::default()
        };
        let version = resolve_addon_version("unknown-addon", &config, "1.32", &lookup()).unwrap();
        assert_eq!(version, "v1.0.0");
    }

    #[test]
    fn unpinned_version_comes_from_catalogue() {
        let version =
            resolve_addon_version("vpc-cni", &AddonConfiguration::default(), "1.32", &lookup())
                .unwrap();
        assert_eq!(version, "v1.19.2-eksbuild.1");
    }

    #[test]
    fn missing_catalogue_entry_is_a_lookup_error() {
        let err =
            resolve_addon_version("coredns", &AddonConfiguration::default(), "1.32", &lookup())
                .unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn configuration_values_are_stringified() {
        let config = AddonConfiguration {
            configuration_values: Some(json!({ "autoScaling": { "enabled": true } })),
            ..Default::default()
        };
        let cluster = Output::attribute(&ResourceId::new("prod"), "name");
        let resource = addon_resource("prod-coredns", "coredns", &config, "v1", cluster).unwrap();

        assert_eq!(
            resource.property("configurationValues"),
            Some(&json!(r#"{"autoScaling":{"enabled":true}}"#))
        );
        assert_eq!(resource.property("clusterName"), Some(&json!("${prod.name}")));
        assert!(resource.depends_on.contains(&ResourceId::new("prod")));
        assert!(resource.property("podIdentityAssociations").is_none());
    }
}
