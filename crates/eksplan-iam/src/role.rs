//! Role descriptors and borrowed-or-managed role resolution

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use eksplan_common::tags::{self, Tags};
use eksplan_common::{Component, Error, Output, Resource, ResourceId, Result};

use crate::document::PolicyDocument;

/// Type token of CloudControl IAM roles
pub const NATIVE_ROLE_TYPE: &str = "aws-native:iam:Role";

/// Type token of classic IAM roles
pub const ROLE_TYPE: &str = "aws:iam/role:Role";

/// Shortest allowed maximum session duration, in seconds
pub const MIN_SESSION_DURATION: u32 = 3600;

/// Longest allowed maximum session duration, in seconds
pub const MAX_SESSION_DURATION: u32 = 43200;

/// Caller-supplied settings for a role this system creates
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleArgs {
    /// Role name; generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Role description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Role path; defaults to "/"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Maximum session duration in seconds (3600 to 43200)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_session_duration: Option<u32>,

    /// ARN of the permissions boundary policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_boundary: Option<String>,

    /// Managed policies attached in addition to the generated ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_managed_policy_arns: Vec<String>,

    /// Role tags; override component tags with the same key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl RoleArgs {
    /// Check the arguments, reporting problems under `field`
    pub fn validate(&self, component: &str, field: &str) -> Result<()> {
        if let Some(duration) = self.max_session_duration {
            if !(MIN_SESSION_DURATION..=MAX_SESSION_DURATION).contains(&duration) {
                return Err(Error::configuration_for_field(
                    component,
                    format!("{field}.maxSessionDuration"),
                    format!(
                        "maxSessionDuration must be between {MIN_SESSION_DURATION} and {MAX_SESSION_DURATION} seconds, got {duration}"
                    ),
                ));
            }
        }
        if let Some(path) = &self.path {
            if !path.starts_with('/') || !path.ends_with('/') {
                return Err(Error::configuration_for_field(
                    component,
                    format!("{field}.path"),
                    format!("path must begin and end with '/', got '{path}'"),
                ));
            }
        }
        if self.additional_managed_policy_arns.iter().any(String::is_empty) {
            return Err(Error::configuration_for_field(
                component,
                format!("{field}.additionalManagedPolicyArns"),
                "policy ARNs must not be empty",
            ));
        }
        Ok(())
    }
}

/// A named inline policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlinePolicy {
    /// Policy name, unique per role
    pub name: String,
    /// Policy document
    pub document: PolicyDocument,
}

/// Everything needed to create one role
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleDescriptor {
    /// Role name
    pub name: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Path
    pub path: Option<String>,
    /// Maximum session duration in seconds
    pub max_session_duration: Option<u32>,
    /// Permissions boundary ARN
    pub permissions_boundary: Option<String>,
    /// Who may assume the role
    pub trust_document: PolicyDocument,
    /// Attached managed policies
    pub managed_policy_arns: Vec<String>,
    /// Inline policies
    pub inline_policies: Vec<InlinePolicy>,
    /// Tags
    pub tags: Option<Tags>,
    /// Resources the role's inputs come from
    pub depends_on: BTreeSet<ResourceId>,
}

impl RoleDescriptor {
    /// Role with only a trust document
    pub fn new(trust_document: PolicyDocument) -> Self {
        Self {
            name: None,
            description: None,
            path: None,
            max_session_duration: None,
            permissions_boundary: None,
            trust_document,
            managed_policy_arns: Vec::new(),
            inline_policies: Vec::new(),
            tags: None,
            depends_on: BTreeSet::new(),
        }
    }

    /// Role from caller arguments
    ///
    /// Additional managed policies come first. Role tags are laid over the
    /// component tags.
    pub fn from_args(
        args: &RoleArgs,
        trust_document: PolicyDocument,
        component_tags: Option<&Tags>,
    ) -> Self {
        Self {
            name: args.name.clone(),
            description: args.description.clone(),
            path: args.path.clone(),
            max_session_duration: args.max_session_duration,
            permissions_boundary: args.permissions_boundary.clone(),
            managed_policy_arns: args.additional_managed_policy_arns.clone(),
            tags: tags::merge(component_tags, args.tags.as_ref()),
            ..Self::new(trust_document)
        }
    }

    /// Use a computed name when the caller did not pick one
    pub fn default_name(mut self, name: Output<String>) -> Self {
        if self.name.is_none() {
            let (name, deps) = name.into_parts();
            self.name = Some(name);
            self.depends_on.extend(deps);
        }
        self
    }

    /// Attach a managed policy
    pub fn managed_policy(mut self, arn: impl Into<Output<String>>) -> Self {
        let (arn, deps) = arn.into().into_parts();
        self.managed_policy_arns.push(arn);
        self.depends_on.extend(deps);
        self
    }

    /// Attach several managed policies that depend on nothing
    pub fn managed_policies(mut self, arns: impl IntoIterator<Item = String>) -> Self {
        self.managed_policy_arns.extend(arns);
        self
    }

    /// Add an inline policy
    pub fn inline_policy(mut self, name: impl Into<String>, document: Output<PolicyDocument>) -> Self {
        let (document, deps) = document.into_parts();
        self.inline_policies.push(InlinePolicy {
            name: name.into(),
            document,
        });
        self.depends_on.extend(deps);
        self
    }

    fn with_dependencies(&self, mut resource: Resource) -> Resource {
        for dep in &self.depends_on {
            resource = resource.depends_on(dep);
        }
        resource
    }

    /// CloudControl role resource
    pub fn to_native_resource(&self, id: &str) -> Resource {
        let policies: Vec<Value> = self
            .inline_policies
            .iter()
            .map(|p| json!({ "policyName": p.name, "policyDocument": p.document.to_value() }))
            .collect();

        let resource = Resource::new(NATIVE_ROLE_TYPE, id)
            .set_opt("roleName", self.name.clone())
            .set_opt("description", self.description.clone())
            .set_opt("path", self.path.clone())
            .set_opt("maxSessionDuration", self.max_session_duration)
            .set_opt("permissionsBoundary", self.permissions_boundary.clone())
            .set("assumeRolePolicyDocument", self.trust_document.to_value())
            .set("managedPolicyArns", self.managed_policy_arns.clone())
            .set_opt("tags", self.tags.as_ref().map(tags::to_native_tags));

        let resource = if policies.is_empty() {
            resource
        } else {
            resource.set("policies", policies)
        };
        self.with_dependencies(resource)
    }

    /// Classic IAM role resource, with the trust document as a JSON string
    pub fn to_classic_resource(&self, id: &str) -> Result<Resource> {
        let inline: Vec<Value> = self
            .inline_policies
            .iter()
            .map(|p| Ok(json!({ "name": p.name, "policy": p.document.to_json()? })))
            .collect::<Result<_>>()?;

        let resource = Resource::new(ROLE_TYPE, id)
            .set_opt("name", self.name.clone())
            .set_opt("description", self.description.clone())
            .set_opt("path", self.path.clone())
            .set_opt("maxSessionDuration", self.max_session_duration)
            .set_opt("permissionsBoundary", self.permissions_boundary.clone())
            .set("assumeRolePolicy", self.trust_document.to_json()?)
            .set_opt("tags", self.tags.as_ref().map(tags::to_map_value));

        let resource = if self.managed_policy_arns.is_empty() {
            resource
        } else {
            resource.set("managedPolicyArns", self.managed_policy_arns.clone())
        };
        let resource = if inline.is_empty() {
            resource
        } else {
            resource.set("inlinePolicies", inline)
        };
        Ok(self.with_dependencies(resource))
    }
}

/// ARN of a role that is either borrowed or planned here
///
/// A caller-supplied ARN is passed through untouched and nothing is added to
/// the component. Otherwise `plan` builds the role resource, which is added
/// to the component, and the ARN refers to its `arn` attribute.
pub fn resolve_role(
    component: &mut Component,
    existing_arn: Option<&str>,
    plan: impl FnOnce() -> Result<Resource>,
) -> Result<Output<String>> {
    match existing_arn {
        Some(arn) => {
            info!(component = %component.name, arn, "using existing role");
            Ok(Output::known(arn.to_string()))
        }
        None => {
            let resource = plan()?;
            debug!(component = %component.name, role = %resource.id, "planning managed role");
            let arn = resource.output("arn");
            component.add(resource);
            Ok(arn)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::service_trust_policy;
    use rstest::rstest;

    fn trust() -> PolicyDocument {
        service_trust_policy("ec2.amazonaws.com").unwrap()
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case::too_short(3599)]
    #[case::too_long(43201)]
    fn session_duration_out_of_range_is_rejected(#[case] duration: u32) {
        let args = RoleArgs {
            max_session_duration: Some(duration),
            ..Default::default()
        };
        let err = args.validate("karpenter", "nodeRoleArgs").unwrap_err();
        assert_eq!(err.field(), Some("nodeRoleArgs.maxSessionDuration"));
    }

    #[rstest]
    #[case::min(3600)]
    #[case::max(43200)]
    fn session_duration_bounds_are_inclusive(#[case] duration: u32) {
        let args = RoleArgs {
            max_session_duration: Some(duration),
            ..Default::default()
        };
        assert!(args.validate("karpenter", "nodeRoleArgs").is_ok());
    }

    #[test]
    fn path_must_be_slash_delimited() {
        let args = RoleArgs {
            path: Some("/platform".to_string()),
            ..Default::default()
        };
        assert!(args.validate("cluster", "role").unwrap_err().is_configuration());
    }

    #[test]
    fn role_tags_override_component_tags() {
        let args = RoleArgs {
            tags: Some(tags(&[("env", "dev")])),
            ..Default::default()
        };
        let component_tags = tags(&[("env", "prod"), ("team", "platform")]);
        let role = RoleDescriptor::from_args(&args, trust(), Some(&component_tags));
        let merged = role.tags.unwrap();
        assert_eq!(merged["env"], "dev");
        assert_eq!(merged["team"], "platform");
    }

    #[test]
    fn default_name_only_applies_when_unset() {
        let args = RoleArgs {
            name: Some("custom".to_string()),
            ..Default::default()
        };
        let role = RoleDescriptor::from_args(&args, trust(), None)
            .default_name(Output::known("Karpenter-prod".to_string()));
        assert_eq!(role.name.as_deref(), Some("custom"));

        let role = RoleDescriptor::new(trust())
            .default_name(Output::attribute(&ResourceId::new("cluster"), "name"));
        assert_eq!(role.name.as_deref(), Some("${cluster.name}"));
        assert!(role.depends_on.contains(&ResourceId::new("cluster")));
    }

    #[test]
    fn native_resource_carries_policies_and_edges() {
        let policy_arn = Output::attribute(&ResourceId::new("controller-policy"), "arn");
        let role = RoleDescriptor::new(trust())
            .managed_policies(["arn:aws:iam::aws:policy/Extra".to_string()])
            .managed_policy(policy_arn);
        let resource = role.to_native_resource("controller-role");

        assert_eq!(resource.type_token, NATIVE_ROLE_TYPE);
        assert_eq!(
            resource.property("managedPolicyArns"),
            Some(&json!(["arn:aws:iam::aws:policy/Extra", "${controller-policy.arn}"]))
        );
        assert!(resource.property("policies").is_none());
        assert!(resource.depends_on.contains(&ResourceId::new("controller-policy")));
    }

    #[test]
    fn classic_resource_stringifies_trust() {
        let resource = RoleDescriptor::new(trust())
            .to_classic_resource("irsa")
            .unwrap();
        let trust = resource.property("assumeRolePolicy").unwrap();
        assert!(trust.as_str().unwrap().contains("sts:AssumeRole"));
        assert!(resource.property("managedPolicyArns").is_none());
    }

    #[test]
    fn existing_role_is_borrowed_without_resources() {
        let mut component = Component::new("test:index:Component", "test");
        let arn = resolve_role(
            &mut component,
            Some("arn:aws:iam::123456789012:role/existing"),
            || panic!("must not plan a role"),
        )
        .unwrap();
        assert_eq!(arn.as_str(), "arn:aws:iam::123456789012:role/existing");
        assert!(arn.dependencies().is_empty());
        assert!(component.resources.is_empty());
    }

    #[test]
    fn missing_role_is_planned() {
        let mut component = Component::new("test:index:Component", "test");
        let arn = resolve_role(&mut component, None, || {
            Ok(RoleDescriptor::new(trust()).to_native_resource("test-node-role"))
        })
        .unwrap();
        assert_eq!(arn.as_str(), "${test-node-role.arn}");
        assert_eq!(component.resources.len(), 1);
    }
}
