//! IAM roles for service accounts

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use eksplan_common::lookup::AwsEnvironment;
use eksplan_common::tags::Tags;
use eksplan_common::{CloudLookup, Component, Error, Output, Result};
use eksplan_iam::trust::irsa_trust_policy;
use eksplan_iam::{RoleArgs, RoleDescriptor, ServiceAccountRef};

use crate::handle::ClusterHandle;

/// Component type token
pub const IRSA_COMPONENT_TYPE: &str = "eksplan:index:IrsaRole";

/// An inline policy given as a raw policy document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawInlinePolicy {
    /// Policy name
    pub name: String,
    /// Policy document, either as JSON text or as an object
    pub policy: Value,
}

/// Arguments for an IRSA role
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IrsaRoleArgs {
    /// Cluster whose OIDC provider the role trusts
    pub cluster_name: String,

    /// Service accounts allowed to assume the role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccountRef>,

    /// Role name; conflicts with `namePrefix`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Prefix for a generated role name; conflicts with `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,

    /// Role description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Role path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Maximum session duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_session_duration: Option<u32>,

    /// Permissions boundary ARN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_boundary: Option<String>,

    /// Managed policies to attach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<String>,

    /// Inline policies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_policies: Vec<RawInlinePolicy>,

    /// Detach policies before destroying the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_detach_policies: Option<bool>,

    /// Role tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl IrsaRoleArgs {
    fn role_args(&self) -> RoleArgs {
        RoleArgs {
            name: self.name.clone(),
            description: self.description.clone(),
            path: self.path.clone(),
            max_session_duration: self.max_session_duration,
            permissions_boundary: self.permissions_boundary.clone(),
            additional_managed_policy_arns: self.managed_policy_arns.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Check the arguments
    pub fn validate(&self) -> Result<()> {
        if self.name.is_some() && self.name_prefix.is_some() {
            return Err(Error::configuration_for_field(
                "irsaRole",
                "namePrefix",
                "name and namePrefix are mutually exclusive",
            ));
        }
        if self.inline_policies.iter().any(|p| p.name.is_empty()) {
            return Err(Error::configuration_for_field(
                "irsaRole",
                "inlinePolicies",
                "inline policies must be named",
            ));
        }
        self.role_args().validate("irsaRole", "role")
    }
}

/// A planned IRSA role
#[derive(Clone, Debug)]
pub struct IrsaRolePlan {
    /// The component holding the role
    pub component: Component,
    /// Role ARN
    pub role_arn: Output<String>,
    /// Role name
    pub role_name: Output<String>,
}

/// Plan an IRSA role for an existing cluster
pub fn compose_irsa_role(
    name: &str,
    args: &IrsaRoleArgs,
    lookup: &dyn CloudLookup,
) -> Result<IrsaRolePlan> {
    args.validate()?;
    let cluster = ClusterHandle::lookup(&args.cluster_name, lookup)?;
    let env = lookup.environment()?;
    compose_irsa_role_for(name, args, &cluster, &env)
}

/// Plan an IRSA role for a known cluster handle
pub fn compose_irsa_role_for(
    name: &str,
    args: &IrsaRoleArgs,
    cluster: &ClusterHandle,
    env: &AwsEnvironment,
) -> Result<IrsaRolePlan> {
    args.validate()?;
    let trust = cluster.oidc_provider()?.try_map(|provider| {
        irsa_trust_policy(&env.partition, &env.account_id, &provider, &args.service_accounts)
    })?;
    let (trust, trust_deps) = trust.into_parts();

    let mut role = RoleDescriptor::from_args(&args.role_args(), trust, None);
    role.depends_on.extend(trust_deps);

    let inline: Vec<Value> = args
        .inline_policies
        .iter()
        .map(|p| {
            let policy = match &p.policy {
                Value::String(text) => text.clone(),
                other => serde_json::to_string(other)?,
            };
            Ok(json!({ "name": p.name, "policy": policy }))
        })
        .collect::<Result<_>>()?;

    let resource = role
        .to_classic_resource(name)?
        .set_opt("namePrefix", args.name_prefix.clone())
        .set_opt("forceDetachPolicies", args.force_detach_policies);
    let resource = if inline.is_empty() {
        resource
    } else {
        resource.set("inlinePolicies", inline)
    };

    let role_arn = resource.output("arn");
    let role_name = resource.output("name");

    let mut component = Component::new(IRSA_COMPONENT_TYPE, name);
    component.add(resource);
    component.export("roleArn", role_arn.as_str());
    component.export("roleName", role_name.as_str());

    info!(
        role = name,
        service_accounts = args.service_accounts.len(),
        "composed IRSA role"
    );
    Ok(IrsaRolePlan {
        component,
        role_arn,
        role_name,
    })
}
