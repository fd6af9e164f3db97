//! Karpenter chart installation
//!
//! The release is applied through a Kubernetes provider configured from a
//! kubeconfig. Chart values are layered: fixed defaults, then the caller's
//! values, then `settings` and `controller`, each of which merges the
//! generated keys with the caller's keys under the same name.

use serde_json::{json, Map, Value};

use eksplan_common::{Output, Resource, ResourceId, KUBE_SYSTEM_NAMESPACE};

/// Type token of Kubernetes providers
pub const PROVIDER_TYPE: &str = "pulumi:providers:kubernetes";
/// Type token of Helm releases
pub const RELEASE_TYPE: &str = "kubernetes:helm.sh/v3:Release";
/// Karpenter chart location
pub const KARPENTER_CHART: &str = "oci://public.ecr.aws/karpenter/karpenter";

/// Values the chart needs from the rest of the plan
#[derive(Clone, Debug)]
pub struct ChartInputs {
    /// Cluster name
    pub cluster_name: Output<String>,
    /// API server endpoint
    pub cluster_endpoint: Output<String>,
    /// Interruption queue name
    pub queue_name: Output<String>,
    /// Region of the controller's AWS clients
    pub region: String,
    /// Controller service account
    pub service_account: String,
}

/// Layer the caller's values over the generated ones
pub fn karpenter_values(inputs: ChartInputs, user: Option<&Value>) -> Output<Value> {
    let empty = Map::new();
    let user = user.and_then(Value::as_object).unwrap_or(&empty).clone();
    let ChartInputs {
        cluster_name,
        cluster_endpoint,
        queue_name,
        region,
        service_account,
    } = inputs;

    cluster_name
        .zip(cluster_endpoint)
        .zip(queue_name)
        .map(move |((cluster_name, endpoint), queue_name)| {
            let mut values = Map::new();
            values.insert("dnsPolicy".to_string(), json!("Default"));
            values.insert("serviceAccount".to_string(), json!({ "name": service_account }));
            for (key, value) in &user {
                values.insert(key.clone(), value.clone());
            }

            let settings = json!({
                "clusterName": cluster_name,
                "clusterEndpoint": endpoint,
                "interruptionQueue": queue_name,
            });
            values.insert("settings".to_string(), overlay(settings, user.get("settings")));

            let controller = json!({
                "env": [{ "name": "AWS_REGION", "value": region }],
                "resources": {
                    "requests": { "cpu": "1", "memory": "1Gi" },
                    "limits": { "cpu": "1", "memory": "1Gi" },
                },
            });
            values.insert("controller".to_string(), overlay(controller, user.get("controller")));

            Value::Object(values)
        })
}

/// Shallow merge: keys of `overrides` replace keys of `base`
fn overlay(base: Value, overrides: Option<&Value>) -> Value {
    match (base, overrides.and_then(Value::as_object)) {
        (Value::Object(mut base), Some(overrides)) => {
            for (key, value) in overrides {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (base, _) => base,
    }
}

/// Kubernetes provider for a kubeconfig
pub fn provider_resource(id: &str, kubeconfig: Output<String>) -> Resource {
    Resource::new(PROVIDER_TYPE, id).set_output("kubeconfig", kubeconfig)
}

/// Karpenter release, applied through `provider` after `after`
pub fn release_resource(
    id: &str,
    version: &str,
    values: Output<Value>,
    provider: &ResourceId,
    after: &ResourceId,
) -> Resource {
    Resource::new(RELEASE_TYPE, id)
        .set("chart", KARPENTER_CHART)
        .set("version", version)
        .set("namespace", KUBE_SYSTEM_NAMESPACE)
        .set("atomic", true)
        .set_output("values", values)
        .set_output("provider", Output::attribute(provider, "urn"))
        .depends_on(after)
}
