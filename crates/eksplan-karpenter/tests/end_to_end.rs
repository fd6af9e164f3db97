//! End-to-end composition scenarios
//!
//! Each test plans whole components against an in-memory cloud snapshot
//! and checks the resulting desired state and provisioning order.

use serde_json::{json, Value};

use eksplan_cluster::args::{AutoModeConfig, NetworkConfig, VpcConfig};
use eksplan_cluster::{compose_cluster, compose_irsa_role_for, ClusterArgs, IrsaRoleArgs};
use eksplan_common::lookup::{AwsEnvironment, IpFamily};
use eksplan_common::output::substitute;
use eksplan_common::{CloudLookup, Deployment, ResourceId, StaticLookup};
use eksplan_iam::role::NATIVE_ROLE_TYPE;
use eksplan_iam::ServiceAccountRef;
use eksplan_karpenter::queue::QUEUE_POLICY_TYPE;
use eksplan_karpenter::{compose_karpenter_for, KarpenterArgs, QueueArgs, QueueEncryption};

fn lookup(partition: &str) -> StaticLookup {
    StaticLookup::new(
        AwsEnvironment::new(partition, "us-west-2", "123456789012"),
        format!("arn:{partition}:sts::123456789012:assumed-role/Deployer/session"),
        "1.32",
    )
}

fn cluster_args() -> ClusterArgs {
    ClusterArgs {
        name: Some("prod".to_string()),
        vpc_config: Some(VpcConfig {
            subnet_ids: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            ..Default::default()
        }),
        auto_mode: Some(AutoModeConfig {
            enabled: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn karpenter_args() -> KarpenterArgs {
    KarpenterArgs {
        version: "1.3.3".to_string(),
        ..Default::default()
    }
}

fn policy_document(value: &Value) -> Value {
    serde_json::from_str(value.as_str().expect("policy is JSON text")).expect("policy parses")
}

#[test]
fn auto_mode_cluster_gets_minimal_node_role() {
    for (partition, prefix) in [("aws", "arn:aws"), ("aws-cn", "arn:aws-cn")] {
        let plan = compose_cluster("prod", &cluster_args(), &lookup(partition)).unwrap();
        let role = plan
            .component
            .resource(&ResourceId::new("prod-auto-mode-role"))
            .expect("auto mode role is planned");
        assert_eq!(role.type_token, NATIVE_ROLE_TYPE);

        let policies: Vec<String> =
            serde_json::from_value(role.property("managedPolicyArns").unwrap().clone()).unwrap();
        assert!(policies.contains(&format!(
            "{prefix}:iam::aws:policy/AmazonEKSWorkerNodeMinimalPolicy"
        )));
        assert!(policies.contains(&format!(
            "{prefix}:iam::aws:policy/AmazonEC2ContainerRegistryPullOnly"
        )));
    }
}

#[test]
fn karpenter_without_queue_name_uses_managed_sse_and_two_senders() {
    let lookup = lookup("aws");
    let env = lookup.environment().unwrap();
    let cluster = compose_cluster("prod", &cluster_args(), &lookup).unwrap();

    let plan = compose_karpenter_for("karpenter", &karpenter_args(), &cluster.handle, &env).unwrap();

    let queue = plan
        .component
        .resource(&plan.queue.queue)
        .expect("queue is planned");
    assert!(queue.property("name").is_none());
    assert_eq!(queue.property("sqsManagedSseEnabled"), Some(&json!(true)));

    let policy = plan.component.find_type(QUEUE_POLICY_TYPE).unwrap();
    let document = policy_document(policy.property("policy").unwrap());
    let senders: Vec<&Value> = document["Statement"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["Effect"] == json!("Allow") && s["Action"] == json!("sqs:SendMessage"))
        .collect();
    assert_eq!(senders.len(), 1);
    assert_eq!(
        senders[0]["Principal"]["Service"].as_array().unwrap().len(),
        2
    );
}

#[test]
fn queue_policy_always_denies_insecure_transport() {
    let lookup = lookup("aws");
    let env = lookup.environment().unwrap();
    let cluster = compose_cluster("prod", &cluster_args(), &lookup).unwrap();

    let queues = [
        None,
        Some(QueueArgs {
            name: Some("interruptions".to_string()),
            kms_master_key_id: Some("alias/karpenter".to_string()),
            kms_data_key_reuse_period_seconds: Some(300),
            ..Default::default()
        }),
    ];
    for queue in queues {
        let args = KarpenterArgs {
            queue,
            ..karpenter_args()
        };
        let plan = compose_karpenter_for("karpenter", &args, &cluster.handle, &env).unwrap();
        let policy = plan.component.find_type(QUEUE_POLICY_TYPE).unwrap();
        let document = policy_document(policy.property("policy").unwrap());
        let deny = document["Statement"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["Effect"] == json!("Deny"))
            .expect("deny statement present");
        assert_eq!(deny["Principal"], json!("*"));
        assert_eq!(
            deny["Condition"]["StringEquals"]["aws:SecureTransport"],
            json!("false")
        );
    }
}

#[test]
fn conflicting_queue_encryption_fails_before_any_resource() {
    let lookup = lookup("aws");
    let env = lookup.environment().unwrap();
    let cluster = compose_cluster("prod", &cluster_args(), &lookup).unwrap();
    let args = KarpenterArgs {
        queue: Some(QueueArgs {
            managed_sse_enabled: Some(true),
            kms_master_key_id: Some("alias/karpenter".to_string()),
            ..Default::default()
        }),
        ..karpenter_args()
    };
    let err = compose_karpenter_for("karpenter", &args, &cluster.handle, &env).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.field(), Some("queue.managedSseEnabled"));
}

#[test]
fn controller_policy_statements_are_cluster_scoped() {
    let lookup = lookup("aws");
    let env = lookup.environment().unwrap();
    let cluster = compose_cluster("prod", &cluster_args(), &lookup).unwrap();
    let plan = compose_karpenter_for("karpenter", &karpenter_args(), &cluster.handle, &env).unwrap();

    let policy = plan
        .component
        .resource(&ResourceId::new("karpenter-controller-policy"))
        .unwrap();
    let document = policy_document(policy.property("policy").unwrap());
    let statements = document["Statement"].as_array().unwrap();

    let mut sids: Vec<&str> = statements.iter().map(|s| s["Sid"].as_str().unwrap()).collect();
    let count = sids.len();
    sids.sort_unstable();
    sids.dedup();
    assert_eq!(sids.len(), count, "sids are unique");

    let owned_key = "kubernetes.io/cluster/${prod.name}";
    for statement in statements {
        let Some(conditions) = statement["Condition"].as_object() else {
            continue;
        };
        let mentions_cluster = conditions
            .values()
            .flat_map(|by_key| by_key.as_object().into_iter().flat_map(|m| m.keys()))
            .any(|key| key.contains("kubernetes.io/cluster/"));
        if mentions_cluster {
            let owned = conditions
                .get("StringEquals")
                .and_then(|m| m.as_object())
                .map(|m| {
                    m.iter().any(|(k, v)| k.ends_with(owned_key) && v == &json!("owned"))
                })
                .unwrap_or(false);
            assert!(owned, "statement {} requires ownership", statement["Sid"]);
        }
    }
}

#[test]
fn ipv6_cidr_only_fills_ipv6_field() {
    let mut args = cluster_args();
    args.network_config = Some(NetworkConfig {
        ip_family: IpFamily::Ipv6,
        service_cidr: Some("fd00:ec2::/108".to_string()),
    });
    let plan = compose_cluster("prod", &args, &lookup("aws")).unwrap();
    let cluster = plan.component.resource(&plan.cluster).unwrap();
    let network = cluster.property("kubernetesNetworkConfig").unwrap();
    assert_eq!(network["serviceIpv6Cidr"], json!("fd00:ec2::/108"));
    assert!(network.get("serviceIpv4Cidr").is_none());

    args.network_config = Some(NetworkConfig {
        ip_family: IpFamily::Ipv4,
        service_cidr: Some("10.100.0.0/16".to_string()),
    });
    let plan = compose_cluster("prod", &args, &lookup("aws")).unwrap();
    let cluster = plan.component.resource(&plan.cluster).unwrap();
    let network = cluster.property("kubernetesNetworkConfig").unwrap();
    assert_eq!(network["serviceIpv4Cidr"], json!("10.100.0.0/16"));
    assert!(network.get("serviceIpv6Cidr").is_none());
}

#[test]
fn irsa_trust_has_one_audience_and_one_subject_per_account() {
    let lookup = lookup("aws");
    let env = lookup.environment().unwrap();
    let cluster = compose_cluster("prod", &cluster_args(), &lookup).unwrap();

    for n in [0usize, 1, 3] {
        let args = IrsaRoleArgs {
            service_accounts: (0..n)
                .map(|i| ServiceAccountRef::new("apps", format!("worker-{i}")))
                .collect(),
            ..Default::default()
        };
        let plan = compose_irsa_role_for("apps-role", &args, &cluster.handle, &env).unwrap();
        let role = &plan.component.resources[0];
        let pending = role.property("assumeRolePolicy").unwrap().as_str().unwrap();
        let provisioned = substitute(pending, |id, attribute| {
            (id.as_str() == "prod" && attribute == "identities[0].oidcs[0].issuer")
                .then(|| "https://oidc.eks.us-west-2.amazonaws.com/id/PROD".to_string())
        })
        .unwrap();
        let trust: Value = serde_json::from_str(&provisioned).unwrap();
        let statement = &trust["Statement"][0];
        assert_eq!(
            statement["Principal"]["Federated"],
            json!("arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-west-2.amazonaws.com/id/PROD")
        );
        let conditions = &statement["Condition"]["StringEquals"];

        let provider = "oidc.eks.us-west-2.amazonaws.com/id/PROD";
        assert_eq!(conditions[format!("{provider}:aud")], json!("sts.amazonaws.com"));
        let subjects = &conditions[format!("{provider}:sub")];
        let count = match subjects {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Array(values) => values.len(),
            other => panic!("unexpected subject condition {other}"),
        };
        assert_eq!(count, n);
    }
}

#[test]
fn whole_deployment_orders_cluster_before_karpenter() {
    let lookup = lookup("aws");
    let env = lookup.environment().unwrap();
    let cluster = compose_cluster("prod", &cluster_args(), &lookup).unwrap();
    let karpenter =
        compose_karpenter_for("karpenter", &karpenter_args(), &cluster.handle, &env).unwrap();
    assert!(karpenter
        .component
        .external_dependencies()
        .contains(&cluster.cluster));

    let mut deployment = Deployment::new();
    deployment.push(cluster.component);
    deployment.push(karpenter.component);

    let order: Vec<String> = deployment
        .provisioning_order()
        .unwrap()
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    let position = |id: &str| {
        order
            .iter()
            .position(|o| o == id)
            .unwrap_or_else(|| panic!("{id} missing from plan"))
    };

    assert!(position("prod") < position("karpenter-node-role"));
    assert!(position("karpenter-queue") < position("karpenter-queue-policy"));
    assert!(position("karpenter-queue-policy") < position("karpenter-HealthEvent-target"));
    assert!(position("karpenter-controller-policy") < position("karpenter-controller-role"));
    assert!(position("karpenter-controller-role") < position("karpenter-pod-identity"));
    assert!(position("karpenter-pod-identity") < position("karpenter-karpenter"));
    assert!(position("karpenter-k8s") < position("karpenter-karpenter"));

    // same inputs, same plan
    let again: Vec<String> = deployment
        .provisioning_order()
        .unwrap()
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    assert_eq!(order, again);
}

#[test]
fn planned_queue_encryption_mode_is_observable() {
    let queue = eksplan_karpenter::QueueDescriptor::from_args(None, None).unwrap();
    assert_eq!(queue.encryption, QueueEncryption::ManagedSse);
}
