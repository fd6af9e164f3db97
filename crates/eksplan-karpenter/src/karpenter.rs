//! The Karpenter component
//!
//! Plans everything Karpenter needs around an EKS cluster. This covers the
//! interruption queue and its event rules, the node and controller roles, the
//! node access entry and the controller's pod identity association. It also
//! plans the chart release that installs the controller.

use tracing::{debug, info};

use eksplan_cluster::{build_kubeconfig, ClusterHandle};
use eksplan_common::arn::{account_policy, role_name_from_arn};
use eksplan_common::lookup::{AwsEnvironment, IpFamily};
use eksplan_common::tags::{self, Tags};
use eksplan_common::{
    CloudLookup, Component, Error, Output, Resource, ResourceId, Result, KUBE_SYSTEM_NAMESPACE,
};
use eksplan_iam::access::{karpenter_controller_policy, TemplateContext};
use eksplan_iam::managed::{managed_policy_arns, CNI_IPV6_POLICY, KARPENTER_NODE_POLICIES};
use eksplan_iam::trust::service_trust_policy;
use eksplan_iam::{resolve_role, RoleArgs, RoleDescriptor};

use crate::args::{KarpenterArgs, COMPONENT};
use crate::events::{plan_event_rules, PlannedRule};
use crate::helm::{karpenter_values, provider_resource, release_resource, ChartInputs};
use crate::queue::{plan_interruption_queue, InterruptionQueue, QueueDescriptor};

/// Component type token
pub const KARPENTER_COMPONENT_TYPE: &str = "eksplan:index:Karpenter";
/// Type token of managed IAM policies
pub const POLICY_TYPE: &str = "aws:iam/policy:Policy";
/// Type token of EKS access entries
pub const ACCESS_ENTRY_TYPE: &str = "aws:eks/accessEntry:AccessEntry";
/// Type token of EKS pod identity associations
pub const POD_IDENTITY_TYPE: &str = "aws:eks/podIdentityAssociation:PodIdentityAssociation";

/// A planned Karpenter installation
#[derive(Clone, Debug)]
pub struct KarpenterPlan {
    /// Every resource of the component
    pub component: Component,
    /// The interruption queue
    pub queue: InterruptionQueue,
    /// Event rules feeding the queue
    pub event_rules: Vec<PlannedRule>,
    /// Node role ARN
    pub node_role_arn: Output<String>,
    /// Node role name, available once the access entry exists
    pub node_role_name: Output<String>,
    /// Controller role ARN
    pub controller_role_arn: Output<String>,
    /// Controller role name
    pub controller_role_name: Output<String>,
    /// Helm release resource
    pub release: ResourceId,
}

/// Plan Karpenter for an existing cluster
pub fn compose_karpenter(
    name: &str,
    args: &KarpenterArgs,
    lookup: &dyn CloudLookup,
) -> Result<KarpenterPlan> {
    if args.cluster_name.is_empty() {
        return Err(Error::configuration_for_field(
            COMPONENT,
            "clusterName",
            "cluster name must not be empty",
        ));
    }
    args.validate()?;
    let cluster = ClusterHandle::lookup(&args.cluster_name, lookup)?;
    let env = lookup.environment()?;
    compose_karpenter_for(name, args, &cluster, &env)
}

/// Plan Karpenter for a cluster handle, existing or planned
///
/// `args.cluster_name` may be left empty; when set it must match a known
/// cluster name.
pub fn compose_karpenter_for(
    name: &str,
    args: &KarpenterArgs,
    cluster: &ClusterHandle,
    env: &AwsEnvironment,
) -> Result<KarpenterPlan> {
    args.validate()?;
    if !args.cluster_name.is_empty()
        && !cluster.name.is_pending()
        && cluster.name.as_str() != args.cluster_name
    {
        return Err(Error::configuration_for_field(
            COMPONENT,
            "clusterName",
            format!(
                "clusterName '{}' does not match cluster '{}'",
                args.cluster_name,
                cluster.name.as_str()
            ),
        ));
    }

    let mut component = Component::new(KARPENTER_COMPONENT_TYPE, name);
    let component_tags = args.tags.as_ref();
    let cluster_name = cluster.name.clone();

    let descriptor = QueueDescriptor::from_args(args.queue.as_ref(), component_tags)?;
    let queue = plan_interruption_queue(&mut component, name, &descriptor, env.dns_suffix())?;

    let node_role_id = format!("{name}-node-role");
    let node_role_arn = resolve_role(&mut component, args.node_role_arn.as_deref(), || {
        node_role(args, cluster, env).map(|role| role.to_native_resource(&node_role_id))
    })?;
    let mut node_role_name = role_name(&component, &node_role_id, &node_role_arn);

    if args.create_access_entry() {
        let entry = Resource::new(ACCESS_ENTRY_TYPE, format!("{name}-node-access-entry"))
            .set_output("clusterName", cluster_name.clone())
            .set_output("principalArn", node_role_arn.clone())
            .set("type", "EC2_LINUX")
            .set_opt("tags", component_tags.map(tags::to_map_value));
        let entry_id = component.add(entry);
        node_role_name = node_role_name.with_dependency(&entry_id);
    } else {
        debug!(component = name, "skipping node access entry");
    }

    let controller_role_id = format!("{name}-controller-role");
    let planned_controller = match &args.controller_role_arn {
        Some(_) => None,
        None => {
            let policy_arn = controller_policy(
                &mut component,
                name,
                args,
                env,
                &cluster_name,
                &queue.arn,
                &node_role_arn,
            )?;
            Some(controller_role(args, env, policy_arn)?)
        }
    };
    let controller_role_arn =
        resolve_role(&mut component, args.controller_role_arn.as_deref(), || {
            planned_controller
                .map(|role| role.to_native_resource(&controller_role_id))
                .ok_or_else(|| {
                    Error::configuration_for(COMPONENT, "controller role has neither ARN nor plan")
                })
        })?;
    let controller_role_name = role_name(&component, &controller_role_id, &controller_role_arn);

    let pod_identity = Resource::new(POD_IDENTITY_TYPE, format!("{name}-pod-identity"))
        .set_output("clusterName", cluster_name.clone())
        .set("namespace", KUBE_SYSTEM_NAMESPACE)
        .set("serviceAccount", args.service_account())
        .set_output("roleArn", controller_role_arn.clone());
    let pod_identity_id = component.add(pod_identity);

    let event_rules = plan_event_rules(&mut component, name, &queue.arn, component_tags)?;

    let kubeconfig = match &args.kubeconfig {
        Some(kubeconfig) => Output::known(kubeconfig.clone()),
        None => build_kubeconfig(cluster, &env.region)?,
    };
    let provider_id = component.add(provider_resource(&format!("{name}-k8s"), kubeconfig));

    let values = karpenter_values(
        ChartInputs {
            cluster_name: cluster_name.clone(),
            cluster_endpoint: cluster.endpoint.clone(),
            queue_name: queue.name.clone(),
            region: env.region.clone(),
            service_account: args.service_account().to_string(),
        },
        args.helm_values.as_ref(),
    );
    let release_id = component.add(release_resource(
        &format!("{name}-karpenter"),
        &args.version,
        values,
        &provider_id,
        &pod_identity_id,
    ));

    component.export("queueArn", queue.arn.as_str());
    component.export("controllerRoleName", controller_role_name.as_str());
    component.export("nodeRoleName", node_role_name.as_str());

    info!(
        component = name,
        cluster = %cluster_name.as_str(),
        resources = component.resources.len(),
        managed_sse = descriptor.managed_sse(),
        "composed karpenter"
    );

    Ok(KarpenterPlan {
        component,
        queue,
        event_rules,
        node_role_arn,
        node_role_name,
        controller_role_arn,
        controller_role_name,
        release: release_id,
    })
}

/// Role for Karpenter-launched nodes
///
/// Managed policies: caller extras, the account's IPv6 CNI policy on IPv6
/// clusters, then the node policies.
fn node_role(
    args: &KarpenterArgs,
    cluster: &ClusterHandle,
    env: &AwsEnvironment,
) -> Result<RoleDescriptor> {
    let role_args = args.node_role_args.clone().unwrap_or_default();
    let mut role = RoleDescriptor::from_args(
        &role_args,
        service_trust_policy(&env.service_principal("ec2"))?,
        args.tags.as_ref(),
    )
    .default_name(cluster.name.clone().map(|n| format!("Karpenter-{n}")));

    if cluster.ip_family == IpFamily::Ipv6 {
        role = role.managed_policy(account_policy(&env.partition, &env.account_id, CNI_IPV6_POLICY));
    }
    Ok(role.managed_policies(managed_policy_arns(&env.partition, KARPENTER_NODE_POLICIES)))
}

/// Controller policy resource, returning its ARN
fn controller_policy(
    component: &mut Component,
    name: &str,
    args: &KarpenterArgs,
    env: &AwsEnvironment,
    cluster_name: &Output<String>,
    queue_arn: &Output<String>,
    node_role_arn: &Output<String>,
) -> Result<Output<String>> {
    let document = cluster_name
        .clone()
        .zip(queue_arn.clone())
        .zip(node_role_arn.clone())
        .try_map(|((cluster, queue), node_role)| {
            let ctx = TemplateContext::for_partition(&env.partition, &env.region, env.dns_suffix())
                .with("cluster", cluster)
                .with("queue_arn", queue)
                .with("node_role_arn", node_role);
            karpenter_controller_policy(&ctx)?.to_json()
        })?;

    let policy_tags = controller_tags(args.tags.as_ref(), args.controller_role_args.as_ref());
    let policy = Resource::new(POLICY_TYPE, format!("{name}-controller-policy"))
        .set("description", "Policy for the Karpenter controller")
        .set_output("policy", document)
        .set_opt("tags", policy_tags.as_ref().map(tags::to_map_value));
    let arn = policy.output("arn");
    component.add(policy);
    Ok(arn)
}

fn controller_tags(component_tags: Option<&Tags>, role_args: Option<&RoleArgs>) -> Option<Tags> {
    tags::merge(component_tags, role_args.and_then(|r| r.tags.as_ref()))
}

/// Controller role, assumed through EKS Pod Identity
fn controller_role(
    args: &KarpenterArgs,
    env: &AwsEnvironment,
    policy_arn: Output<String>,
) -> Result<RoleDescriptor> {
    let role_args = args.controller_role_args.clone().unwrap_or_default();
    Ok(RoleDescriptor::from_args(
        &role_args,
        service_trust_policy(&env.service_principal("pods.eks"))?,
        args.tags.as_ref(),
    )
    .managed_policy(policy_arn))
}

/// Name of a role that is either borrowed or planned as `id`
fn role_name(component: &Component, id: &str, arn: &Output<String>) -> Output<String> {
    match component.resource(&ResourceId::new(id)) {
        Some(role) => role.output("roleName"),
        None => arn.clone().map(|arn| role_name_from_arn(&arn).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EVENT_RULE_TYPE, EVENT_TARGET_TYPE};
    use crate::helm::RELEASE_TYPE;
    use crate::queue::{QUEUE_POLICY_TYPE, QUEUE_TYPE};
    use eksplan_common::lookup::{ClusterIdentity, OidcIdentity};
    use eksplan_common::lookup::MockCloudLookup;
    use eksplan_common::{ClusterDescription, StaticLookup};
    use eksplan_iam::role::NATIVE_ROLE_TYPE;
    use serde_json::{json, Value};

    fn cluster(ip_family: IpFamily) -> ClusterDescription {
        ClusterDescription {
            name: "prod".to_string(),
            arn: "arn:aws:eks:us-west-2:123456789012:cluster/prod".to_string(),
            endpoint: "https://ABC.gr7.us-west-2.eks.amazonaws.com".to_string(),
            certificate_authority_data: Some("LS0t".to_string()),
            version: "1.32".to_string(),
            identities: vec![ClusterIdentity {
                oidcs: vec![OidcIdentity {
                    issuer: "https://oidc.eks.us-west-2.amazonaws.com/id/ABC".to_string(),
                }],
            }],
            ip_family: Some(ip_family),
        }
    }

    fn lookup(ip_family: IpFamily) -> StaticLookup {
        StaticLookup::new(
            AwsEnvironment::new("aws", "us-west-2", "123456789012"),
            "arn:aws:iam::123456789012:user/ci",
            "1.32",
        )
        .with_cluster(cluster(ip_family))
    }

    fn args() -> KarpenterArgs {
        KarpenterArgs {
            cluster_name: "prod".to_string(),
            version: "1.3.3".to_string(),
            ..Default::default()
        }
    }

    fn managed_policies(plan: &KarpenterPlan, id: &str) -> Vec<String> {
        let role = plan.component.resource(&ResourceId::new(id)).unwrap();
        serde_json::from_value(role.property("managedPolicyArns").unwrap().clone()).unwrap()
    }

    #[test]
    fn full_plan_contains_every_resource() {
        let plan = compose_karpenter("karpenter", &args(), &lookup(IpFamily::Ipv4)).unwrap();
        let c = &plan.component;
        assert_eq!(c.all_of_type(QUEUE_TYPE).count(), 1);
        assert_eq!(c.all_of_type(QUEUE_POLICY_TYPE).count(), 1);
        assert_eq!(c.all_of_type(NATIVE_ROLE_TYPE).count(), 2);
        assert_eq!(c.all_of_type(POLICY_TYPE).count(), 1);
        assert_eq!(c.all_of_type(ACCESS_ENTRY_TYPE).count(), 1);
        assert_eq!(c.all_of_type(POD_IDENTITY_TYPE).count(), 1);
        assert_eq!(c.all_of_type(EVENT_RULE_TYPE).count(), 4);
        assert_eq!(c.all_of_type(EVENT_TARGET_TYPE).count(), 4);
        assert_eq!(c.all_of_type(RELEASE_TYPE).count(), 1);
        assert!(c.external_dependencies().is_empty());
    }

    #[test]
    fn node_role_defaults() {
        let plan = compose_karpenter("karpenter", &args(), &lookup(IpFamily::Ipv4)).unwrap();
        let role = plan
            .component
            .resource(&ResourceId::new("karpenter-node-role"))
            .unwrap();
        assert_eq!(role.property("roleName"), Some(&json!("Karpenter-prod")));
        assert_eq!(
            role.property("assumeRolePolicyDocument").unwrap()["Statement"][0]["Principal"]
                ["Service"],
            json!("ec2.amazonaws.com")
        );
        assert_eq!(
            managed_policies(&plan, "karpenter-node-role"),
            vec![
                "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
                "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
                "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
            ]
        );
    }

    #[test]
    fn ipv6_cluster_node_role_gets_account_cni_policy_after_extras() {
        let mut args = args();
        args.node_role_args = Some(RoleArgs {
            additional_managed_policy_arns: vec!["arn:aws:iam::aws:policy/Extra".to_string()],
            ..Default::default()
        });
        let plan = compose_karpenter("karpenter", &args, &lookup(IpFamily::Ipv6)).unwrap();
        let policies = managed_policies(&plan, "karpenter-node-role");
        assert_eq!(policies[0], "arn:aws:iam::aws:policy/Extra");
        assert_eq!(
            policies[1],
            "arn:aws:iam::123456789012:policy/AmazonEKS_CNI_IPv6_Policy"
        );
        assert_eq!(policies.len(), 5);
    }

    #[test]
    fn controller_role_trusts_pod_identity_and_attaches_policy() {
        let plan = compose_karpenter("karpenter", &args(), &lookup(IpFamily::Ipv4)).unwrap();
        let role = plan
            .component
            .resource(&ResourceId::new("karpenter-controller-role"))
            .unwrap();
        let statement = &role.property("assumeRolePolicyDocument").unwrap()["Statement"][0];
        assert_eq!(statement["Principal"]["Service"], json!("pods.eks.amazonaws.com"));
        assert_eq!(statement["Action"], json!(["sts:AssumeRole", "sts:TagSession"]));
        assert_eq!(
            managed_policies(&plan, "karpenter-controller-role"),
            vec!["${karpenter-controller-policy.arn}"]
        );
        assert_eq!(
            plan.controller_role_name.as_str(),
            "${karpenter-controller-role.roleName}"
        );
    }

    #[test]
    fn controller_policy_scopes_queue_and_node_role() {
        let plan = compose_karpenter("karpenter", &args(), &lookup(IpFamily::Ipv4)).unwrap();
        let policy = plan.component.find_type(POLICY_TYPE).unwrap();
        let document: Value =
            serde_json::from_str(policy.property("policy").unwrap().as_str().unwrap()).unwrap();
        let statements = document["Statement"].as_array().unwrap();
        let by_sid = |sid: &str| {
            statements
                .iter()
                .find(|s| s["Sid"] == json!(sid))
                .unwrap()
                .clone()
        };
        assert_eq!(
            by_sid("AllowInterruptionQueueActions")["Resource"],
            json!("${karpenter-queue.arn}")
        );
        assert_eq!(
            by_sid("AllowPassingInstanceRole")["Resource"],
            json!("${karpenter-node-role.arn}")
        );
        assert!(policy.depends_on.contains(&ResourceId::new("karpenter-queue-policy")));
        assert!(policy.depends_on.contains(&ResourceId::new("karpenter-node-role")));
    }

    #[test]
    fn borrowed_roles_are_passed_through() {
        let mut args = args();
        args.node_role_arn = Some("arn:aws:iam::123456789012:role/nodes".to_string());
        args.controller_role_arn = Some("arn:aws:iam::123456789012:role/path/controller".to_string());
        let plan = compose_karpenter("karpenter", &args, &lookup(IpFamily::Ipv4)).unwrap();

        assert_eq!(plan.component.all_of_type(NATIVE_ROLE_TYPE).count(), 0);
        assert_eq!(plan.component.all_of_type(POLICY_TYPE).count(), 0);
        assert_eq!(plan.controller_role_name.as_str(), "controller");
        assert_eq!(plan.node_role_name.as_str(), "nodes");

        let association = plan.component.find_type(POD_IDENTITY_TYPE).unwrap();
        assert_eq!(
            association.property("roleArn"),
            Some(&json!("arn:aws:iam::123456789012:role/path/controller"))
        );
    }

    #[test]
    fn access_entry_can_be_skipped() {
        let mut args = args();
        args.create_access_entry = Some(false);
        let plan = compose_karpenter("karpenter", &args, &lookup(IpFamily::Ipv4)).unwrap();
        assert!(plan.component.find_type(ACCESS_ENTRY_TYPE).is_none());
        assert!(!plan
            .node_role_name
            .dependencies()
            .iter()
            .any(|d| d.as_str().ends_with("access-entry")));
    }

    #[test]
    fn node_role_name_waits_for_access_entry() {
        let plan = compose_karpenter("karpenter", &args(), &lookup(IpFamily::Ipv4)).unwrap();
        let entry = plan.component.find_type(ACCESS_ENTRY_TYPE).unwrap();
        assert_eq!(entry.property("type"), Some(&json!("EC2_LINUX")));
        assert!(plan.node_role_name.dependencies().contains(&entry.id));
    }

    #[test]
    fn pod_identity_binds_service_account_in_kube_system() {
        let mut args = args();
        args.service_account = Some("karpenter-controller".to_string());
        let plan = compose_karpenter("karpenter", &args, &lookup(IpFamily::Ipv4)).unwrap();
        let association = plan.component.find_type(POD_IDENTITY_TYPE).unwrap();
        assert_eq!(association.property("namespace"), Some(&json!("kube-system")));
        assert_eq!(
            association.property("serviceAccount"),
            Some(&json!("karpenter-controller"))
        );
        let release = plan.component.resource(&plan.release).unwrap();
        assert!(release.depends_on.contains(&association.id));
        assert_eq!(
            release.property("values").unwrap()["serviceAccount"]["name"],
            json!("karpenter-controller")
        );
    }

    #[test]
    fn kubeconfig_override_is_used_verbatim() {
        let mut args = args();
        args.kubeconfig = Some("apiVersion: v1".to_string());
        let plan = compose_karpenter("karpenter", &args, &lookup(IpFamily::Ipv4)).unwrap();
        let provider = plan
            .component
            .resource(&ResourceId::new("karpenter-k8s"))
            .unwrap();
        assert_eq!(provider.property("kubeconfig"), Some(&json!("apiVersion: v1")));
    }

    #[test]
    fn derived_kubeconfig_targets_the_cluster() {
        let plan = compose_karpenter("karpenter", &args(), &lookup(IpFamily::Ipv4)).unwrap();
        let provider = plan
            .component
            .resource(&ResourceId::new("karpenter-k8s"))
            .unwrap();
        let kubeconfig: Value =
            serde_json::from_str(provider.property("kubeconfig").unwrap().as_str().unwrap())
                .unwrap();
        assert_eq!(
            kubeconfig["current-context"],
            json!("arn:aws:eks:us-west-2:123456789012:cluster/prod")
        );
    }

    #[test]
    fn queue_arn_export_waits_for_policy() {
        let plan = compose_karpenter("karpenter", &args(), &lookup(IpFamily::Ipv4)).unwrap();
        assert!(plan.queue.arn.dependencies().contains(&plan.queue.policy));
        assert_eq!(
            plan.component.outputs["queueArn"],
            json!("${karpenter-queue.arn}")
        );
    }

    #[test]
    fn empty_cluster_name_is_rejected() {
        let mut args = args();
        args.cluster_name = String::new();
        let err = compose_karpenter("karpenter", &args, &lookup(IpFamily::Ipv4)).unwrap_err();
        assert_eq!(err.field(), Some("clusterName"));
    }

    #[test]
    fn mismatched_cluster_name_is_rejected() {
        let handle = ClusterHandle::lookup("prod", &lookup(IpFamily::Ipv4)).unwrap();
        let env = AwsEnvironment::new("aws", "us-west-2", "123456789012");
        let mut args = args();
        args.cluster_name = "staging".to_string();
        let err = compose_karpenter_for("karpenter", &args, &handle, &env).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn unknown_cluster_is_a_lookup_error() {
        let mut args = args();
        args.cluster_name = "staging".to_string();
        let err = compose_karpenter("karpenter", &args, &lookup(IpFamily::Ipv4)).unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn describe_failure_surfaces_as_lookup_error() {
        let mut lookup = MockCloudLookup::new();
        lookup
            .expect_describe_cluster()
            .withf(|name| name == "prod")
            .returning(|name| {
                Err(eksplan_common::Error::lookup(
                    format!("cluster/{name}"),
                    "cluster not found",
                ))
            });
        lookup.expect_environment().never();

        let err = compose_karpenter("karpenter", &args(), &lookup).unwrap_err();
        assert!(err.is_lookup());
        assert!(err.to_string().contains("cluster not found"));
    }
}
