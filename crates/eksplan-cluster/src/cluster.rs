//! EKS cluster component
//!
//! Plans the cluster together with what it needs to exist: a secrets
//! encryption key, the cluster role, the auto mode node role, addons and an
//! admin access entry for whoever creates the cluster. Caller-supplied key
//! and role ARNs are borrowed as is.

use serde_json::{json, Value};
use tracing::{info, warn};

use eksplan_common::arn::{eks_access_policy, Arn};
use eksplan_common::lookup::AwsEnvironment;
use eksplan_common::tags;
use eksplan_common::{CloudLookup, Component, Output, Resource, ResourceId, Result};
use eksplan_iam::access::cluster_encryption_policy;
use eksplan_iam::managed::{
    managed_policy_arns, AUTO_MODE_NODE_POLICIES, CLUSTER_ADMIN_ACCESS_POLICY,
    EKS_CLUSTER_ROLE_POLICIES,
};
use eksplan_iam::trust::service_trust_policy;
use eksplan_iam::{resolve_role, RoleDescriptor};

use crate::addons::{addon_resource, resolve_addon_version};
use crate::args::ClusterArgs;
use crate::handle::ClusterHandle;
use crate::network::KubernetesNetworkConfig;

/// Component type token
pub const CLUSTER_COMPONENT_TYPE: &str = "eksplan:index:Cluster";
/// Type token of EKS clusters
pub const CLUSTER_TYPE: &str = "aws:eks/cluster:Cluster";
/// Type token of KMS keys
pub const KMS_KEY_TYPE: &str = "aws:kms/key:Key";
/// Type token of EKS access entries
pub const ACCESS_ENTRY_TYPE: &str = "aws:eks/accessEntry:AccessEntry";
/// Type token of EKS access policy associations
pub const ACCESS_POLICY_ASSOCIATION_TYPE: &str =
    "aws:eks/accessPolicyAssociation:AccessPolicyAssociation";

/// Node pools auto mode runs when none are listed
pub const DEFAULT_NODE_POOLS: [&str; 2] = ["general-purpose", "system"];

/// Name of the cluster role's inline encryption policy
pub const ENCRYPTION_POLICY_NAME: &str = "EKSClusterEncryptionPolicy";

/// A planned cluster and the values it exports
#[derive(Clone, Debug)]
pub struct ClusterPlan {
    /// Every resource of the component
    pub component: Component,
    /// The cluster resource
    pub cluster: ResourceId,
    /// Handle for components that build on the cluster
    pub handle: ClusterHandle,
    /// Secrets encryption key
    pub encryption_key_arn: Output<String>,
    /// Cluster role
    pub cluster_role_arn: Output<String>,
    /// Auto mode node role, when auto mode is on
    pub auto_mode_role_arn: Option<Output<String>>,
    /// Security group EKS creates for the cluster
    pub cluster_security_group_id: Output<String>,
    /// Kubernetes version addon versions were resolved against
    pub kubernetes_version: String,
    /// Installed addon names
    pub installed_addons: Vec<String>,
    /// Principals granted cluster admin
    pub cluster_admins: Vec<Output<String>>,
}

/// Plan a cluster
pub fn compose_cluster(
    name: &str,
    args: &ClusterArgs,
    lookup: &dyn CloudLookup,
) -> Result<ClusterPlan> {
    args.validate()?;
    let env = lookup.environment()?;
    let mut component = Component::new(CLUSTER_COMPONENT_TYPE, name);
    let component_tags = args.tags.as_ref();
    let display_name = args.name.as_deref().unwrap_or(name);

    let encryption_key_arn = encryption_key(&mut component, name, display_name, args)?;
    let cluster_role_arn = cluster_role(&mut component, name, args, &env, &encryption_key_arn)?;

    let auto_mode = args.auto_mode_enabled();
    let auto_mode_role_arn = if auto_mode {
        Some(auto_mode_role(&mut component, name, args, &env)?)
    } else {
        None
    };

    let cluster = cluster_resource(
        name,
        args,
        auto_mode,
        &cluster_role_arn,
        &encryption_key_arn,
        auto_mode_role_arn.as_ref(),
    )?;
    let cluster_id = component.add(cluster);
    let cluster_name = Output::attribute(&cluster_id, "name");

    let creator = cluster_creator(lookup)?;
    let admin = cluster_admin(
        &mut component,
        &format!("{name}-cluster-creator-admin"),
        &cluster_id,
        &creator,
        &env.partition,
        component_tags,
    );

    let kubernetes_version = match &args.version {
        Some(version) => version.clone(),
        None => lookup.default_kubernetes_version()?,
    };
    let mut installed_addons = Vec::with_capacity(args.addons.len());
    for (addon, config) in &args.addons {
        let version = resolve_addon_version(addon, config, &kubernetes_version, lookup)?;
        component.add(addon_resource(
            &format!("{name}-{addon}"),
            addon,
            config,
            &version,
            cluster_name.clone(),
        )?);
        installed_addons.push(addon.clone());
    }

    let handle = ClusterHandle::planned(
        cluster_name.clone(),
        Output::attribute(&cluster_id, "arn"),
        Output::attribute(&cluster_id, "endpoint"),
        Output::attribute(&cluster_id, "certificateAuthority.data"),
        Output::attribute_without_prefix(
            &cluster_id,
            "identities[0].oidcs[0].issuer",
            "https://",
        ),
        args.network_config
            .as_ref()
            .map(|n| n.ip_family)
            .unwrap_or_default(),
    );
    let cluster_security_group_id =
        Output::attribute(&cluster_id, "vpcConfig.clusterSecurityGroupId");

    component.export("clusterName", cluster_name.as_str());
    component.export("clusterArn", handle.arn.as_str());
    component.export("clusterSecurityGroupId", cluster_security_group_id.as_str());
    component.export("encryptionKeyArn", encryption_key_arn.as_str());
    component.export("clusterRoleArn", cluster_role_arn.as_str());
    component.export("installedAddons", installed_addons.clone());
    component.export("clusterAdmins", vec![admin.as_str().to_string()]);

    info!(
        cluster = name,
        auto_mode,
        addons = installed_addons.len(),
        resources = component.resources.len(),
        "composed cluster"
    );

    Ok(ClusterPlan {
        component,
        cluster: cluster_id,
        handle,
        encryption_key_arn,
        cluster_role_arn,
        auto_mode_role_arn,
        cluster_security_group_id,
        kubernetes_version,
        installed_addons,
        cluster_admins: vec![admin],
    })
}

fn encryption_key(
    component: &mut Component,
    name: &str,
    display_name: &str,
    args: &ClusterArgs,
) -> Result<Output<String>> {
    if let Some(arn) = &args.encryption_key_arn {
        info!(cluster = name, arn = %arn, "using existing encryption key");
        return Ok(Output::known(arn.clone()));
    }
    let key = Resource::new(KMS_KEY_TYPE, format!("{name}-encryption-key"))
        .set(
            "description",
            format!("Encryption key for EKS cluster {display_name}"),
        )
        .set("enableKeyRotation", true)
        .set_opt("tags", args.tags.as_ref().map(tags::to_map_value));
    let arn = key.output("arn");
    component.add(key);
    Ok(arn)
}

fn cluster_role(
    component: &mut Component,
    name: &str,
    args: &ClusterArgs,
    env: &AwsEnvironment,
    encryption_key_arn: &Output<String>,
) -> Result<Output<String>> {
    let id = format!("{name}-cluster-role");
    resolve_role(component, args.role_arn.as_deref(), || {
        let encryption = encryption_key_arn
            .clone()
            .try_map(|arn| cluster_encryption_policy(&arn))?;
        let role = RoleDescriptor::new(service_trust_policy(&env.service_principal("eks"))?)
            .managed_policies(managed_policy_arns(&env.partition, EKS_CLUSTER_ROLE_POLICIES))
            .inline_policy(ENCRYPTION_POLICY_NAME, encryption);
        let role = RoleDescriptor {
            tags: args.tags.clone(),
            ..role
        };
        Ok(role.to_native_resource(&id))
    })
}

fn auto_mode_role(
    component: &mut Component,
    name: &str,
    args: &ClusterArgs,
    env: &AwsEnvironment,
) -> Result<Output<String>> {
    let existing = args
        .auto_mode
        .as_ref()
        .and_then(|a| a.node_role_arn.as_deref());
    let id = format!("{name}-auto-mode-role");
    resolve_role(component, existing, || {
        let role = RoleDescriptor::new(service_trust_policy(&env.service_principal("ec2"))?)
            .managed_policies(managed_policy_arns(&env.partition, AUTO_MODE_NODE_POLICIES));
        let role = RoleDescriptor {
            tags: args.tags.clone(),
            ..role
        };
        Ok(role.to_native_resource(&id))
    })
}

fn cluster_resource(
    name: &str,
    args: &ClusterArgs,
    auto_mode: bool,
    role_arn: &Output<String>,
    encryption_key_arn: &Output<String>,
    auto_mode_role_arn: Option<&Output<String>>,
) -> Result<Resource> {
    let vpc = args.vpc()?;

    let mut vpc_config = json!({
        "subnetIds": vpc.subnet_ids,
        "endpointPrivateAccess": vpc.private_access(),
        "endpointPublicAccess": vpc.public_access(),
    });
    if !vpc.cluster_security_group_ids.is_empty() {
        vpc_config["securityGroupIds"] = json!(vpc.cluster_security_group_ids);
    }

    let network = KubernetesNetworkConfig::from_args(args.network_config.as_ref(), auto_mode);

    let encryption_config = encryption_key_arn.clone().map(|key_arn| {
        json!({
            "provider": { "keyArn": key_arn },
            "resources": ["secrets"],
        })
    });

    let compute_config: Output<Value> = if auto_mode {
        let node_pools: Vec<String> = args
            .auto_mode
            .as_ref()
            .and_then(|a| a.node_pools.clone())
            .unwrap_or_else(|| DEFAULT_NODE_POOLS.iter().map(|p| p.to_string()).collect());
        let node_role = auto_mode_role_arn
            .cloned()
            .unwrap_or_else(|| Output::known(String::new()));
        node_role.map(|arn| {
            json!({
                "enabled": true,
                "nodePools": node_pools,
                "nodeRoleArn": arn,
            })
        })
    } else {
        if args
            .auto_mode
            .as_ref()
            .is_some_and(|a| a.node_pools.is_some() || a.node_role_arn.is_some())
        {
            warn!(cluster = name, "auto mode is disabled; ignoring node pools and node role");
        }
        Output::known(json!({ "enabled": false }))
    };

    let resource = Resource::new(CLUSTER_TYPE, name)
        .set_opt("name", args.name.clone())
        .set_output("roleArn", role_arn.clone())
        .set_opt("version", args.version.clone())
        .set("vpcConfig", vpc_config)
        .set(
            "zonalShiftConfig",
            json!({
                "enabled": args.zonal_shift_config.as_ref().is_some_and(|z| z.enabled)
            }),
        )
        .set_opt(
            "upgradePolicy",
            args.support_type
                .map(|s| json!({ "supportType": s.as_str() })),
        )
        .set("kubernetesNetworkConfig", network.to_value())
        .set(
            "storageConfig",
            json!({ "blockStorage": { "enabled": auto_mode } }),
        )
        .set("bootstrapSelfManagedAddons", false)
        .set(
            "accessConfig",
            json!({
                "authenticationMode": "API",
                "bootstrapClusterCreatorAdminPermissions": false,
            }),
        )
        .set_output("encryptionConfig", encryption_config)
        .set_output("computeConfig", compute_config)
        .set_opt("tags", args.tags.as_ref().map(tags::to_map_value));

    Ok(resource)
}

/// IAM principal that creates the cluster
///
/// Assumed-role sessions resolve to their role so the access entry survives
/// the session.
pub fn cluster_creator(lookup: &dyn CloudLookup) -> Result<String> {
    let caller = lookup.caller_identity()?;
    let arn: Arn = caller.arn.parse()?;
    Ok(arn.session_issuer()?.to_string())
}

/// Access entry plus cluster-admin policy association for a principal
pub fn cluster_admin(
    component: &mut Component,
    id: &str,
    cluster: &ResourceId,
    principal_arn: &str,
    partition: &str,
    component_tags: Option<&eksplan_common::Tags>,
) -> Output<String> {
    let entry = Resource::new(ACCESS_ENTRY_TYPE, id)
        .set_output("clusterName", Output::attribute(cluster, "name"))
        .set("principalArn", principal_arn)
        .set("type", "STANDARD")
        .set_opt("tags", component_tags.map(tags::to_map_value));
    let entry_principal = entry.output("principalArn");
    let entry_id = component.add(entry);

    let association = Resource::new(ACCESS_POLICY_ASSOCIATION_TYPE, format!("{id}-policy"))
        .set_output("clusterName", Output::attribute(cluster, "name"))
        .set_output("principalArn", entry_principal)
        .set(
            "policyArn",
            eks_access_policy(partition, CLUSTER_ADMIN_ACCESS_POLICY),
        )
        .set("accessScope", json!({ "type": "cluster" }))
        .depends_on(&entry_id);
    let principal = association.output("principalArn");
    component.add(association);
    principal
}
