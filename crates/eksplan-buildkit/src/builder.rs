//! Rootless BuildKit daemon on Kubernetes
//!
//! Objects are built with the typed `k8s-openapi` structs and flattened into
//! resource properties, so the executor applies exactly what a manifest file
//! would contain. PEM material may still be pending; the certificate Secret
//! then waits for whatever produces it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    AppArmorProfile, Container, ContainerPort, EmptyDirVolumeSource, ExecAction,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SeccompProfile, Secret, SecretVolumeSource,
    SecurityContext, Service, ServicePort, ServiceSpec, Toleration, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use eksplan_common::{Component, Error, Output, Resource, ResourceId, Result};

/// Component type token
pub const BUILDER_COMPONENT_TYPE: &str = "eksplan:buildkit:Builder";
/// Type token of Secrets
pub const SECRET_TYPE: &str = "kubernetes:core/v1:Secret";
/// Type token of PersistentVolumeClaims
pub const PVC_TYPE: &str = "kubernetes:core/v1:PersistentVolumeClaim";
/// Type token of DaemonSets
pub const DAEMON_SET_TYPE: &str = "kubernetes:apps/v1:DaemonSet";
/// Type token of StatefulSets
pub const STATEFUL_SET_TYPE: &str = "kubernetes:apps/v1:StatefulSet";
/// Type token of Services
pub const SERVICE_TYPE: &str = "kubernetes:core/v1:Service";

/// buildkitd TCP port
pub const BUILDKIT_PORT: i32 = 1234;
/// Rootless buildkitd image
pub const BUILDKIT_IMAGE: &str = "moby/buildkit:master-rootless";
/// Image of the sysctl helper
pub const SYSCTL_IMAGE: &str = "public.ecr.aws/docker/library/busybox";

const COMPONENT: &str = "buildkitBuilder";
const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_REPLICAS: i32 = 1;

const CERTS_VOLUME: &str = "certs";
const CERTS_MOUNT_PATH: &str = "/certs";
const STATE_VOLUME: &str = "buildkitd";
const STATE_MOUNT_PATH: &str = "/home/user/.local/share/buildkit";
const ROOTLESS_UID: i64 = 1000;

/// Bottlerocket ships with user namespaces disabled
const ENABLE_USERNS: &str = "sysctl -w user.max_user_namespaces=63359 && sleep infinity";

/// Persistent build cache
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvConfig {
    /// Storage class of the claim
    pub storage_class: String,
    /// Requested size (e.g., "50Gi")
    pub size: String,
}

/// Arguments for the BuildKit builder
///
/// The PEM fields may be left out when the certificates come from a
/// certificate component planned in the same pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildkitBuilderArgs {
    /// CA certificate clients are verified against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_pem: Option<String>,

    /// Server certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_pem: Option<String>,

    /// Server private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_pem: Option<String>,

    /// Daemon replicas (default: 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Namespace of every object (default: "default")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Keep the build cache on a volume claim instead of an emptyDir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv_config: Option<PvConfig>,

    /// Run the user-namespace sysctl DaemonSet Bottlerocket nodes need
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottlerocket: Option<bool>,

    /// Node selector of the daemon pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Tolerations of the daemon pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<Value>>")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Compute resources of the buildkitd container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Value>")]
    pub resources: Option<ResourceRequirements>,
}

impl BuildkitBuilderArgs {
    /// Namespace of every object
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Reject settings the API server would refuse
    pub fn validate(&self) -> Result<()> {
        let given = [&self.ca_cert_pem, &self.cert_pem, &self.private_key_pem]
            .iter()
            .filter(|pem| pem.is_some())
            .count();
        if given != 0 && given != 3 {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "caCertPem",
                "caCertPem, certPem and privateKeyPem must be given together",
            ));
        }
        if self.replicas.is_some_and(|r| r < 0) {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "replicas",
                "replicas must not be negative",
            ));
        }
        if self.namespace().is_empty() {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "namespace",
                "namespace must not be empty",
            ));
        }
        if let Some(pv) = &self.pv_config {
            if pv.storage_class.is_empty() || pv.size.is_empty() {
                return Err(Error::configuration_for_field(
                    COMPONENT,
                    "pvConfig",
                    "pvConfig needs both storageClass and size",
                ));
            }
        }
        Ok(())
    }
}

/// TLS material mounted into the daemon
#[derive(Clone, Debug)]
pub struct BuilderTls {
    /// CA certificate
    pub ca_cert_pem: Output<String>,
    /// Server certificate
    pub cert_pem: Output<String>,
    /// Server private key
    pub private_key_pem: Output<String>,
}

impl BuilderTls {
    /// Material given inline in the arguments, if any
    pub fn from_args(args: &BuildkitBuilderArgs) -> Option<Self> {
        match (&args.ca_cert_pem, &args.cert_pem, &args.private_key_pem) {
            (Some(ca), Some(cert), Some(key)) => Some(Self {
                ca_cert_pem: Output::known(ca.clone()),
                cert_pem: Output::known(cert.clone()),
                private_key_pem: Output::known(key.clone()),
            }),
            _ => None,
        }
    }

    fn string_data(self) -> Output<BTreeMap<String, String>> {
        self.ca_cert_pem
            .zip(self.cert_pem)
            .zip(self.private_key_pem)
            .map(|((ca, cert), key)| {
                BTreeMap::from([
                    ("ca.pem".to_string(), ca),
                    ("cert.pem".to_string(), cert),
                    ("key.pem".to_string(), key),
                ])
            })
    }
}

/// The planned builder
#[derive(Clone, Debug)]
pub struct BuildkitBuilderPlan {
    /// Component holding the Kubernetes objects
    pub component: Component,
    /// Namespace of every object
    pub namespace: String,
    /// Certificate Secret
    pub secret: ResourceId,
    /// Build cache claim
    pub pvc: Option<ResourceId>,
    /// Sysctl DaemonSet
    pub daemon_set: Option<ResourceId>,
    /// buildkitd StatefulSet
    pub stateful_set: ResourceId,
    /// ClusterIP Service
    pub service: ResourceId,
    /// In-cluster address for `buildctl --addr`
    pub address: String,
}

impl BuildkitBuilderPlan {
    /// Every object as a multi-document YAML stream
    pub fn manifests_yaml(&self) -> Result<String> {
        let documents = self
            .component
            .resources
            .iter()
            .map(|resource| {
                serde_yaml::to_string(&resource.properties)
                    .map_err(|e| Error::serialization_for_kind("yaml", e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(documents.join("---\n"))
    }
}

/// Plan the BuildKit daemon
///
/// `tls` overrides the PEM arguments; one of the two must be present.
pub fn compose_buildkit_builder(
    name: &str,
    args: &BuildkitBuilderArgs,
    tls: Option<BuilderTls>,
) -> Result<BuildkitBuilderPlan> {
    args.validate()?;
    let tls = tls.or_else(|| BuilderTls::from_args(args)).ok_or_else(|| {
        Error::configuration_for_field(
            COMPONENT,
            "caCertPem",
            "builder needs caCertPem, certPem and privateKeyPem",
        )
    })?;

    let namespace = args.namespace().to_string();
    let mut component = Component::new(BUILDER_COMPONENT_TYPE, name);

    let secret_name = format!("{name}-buildkit-certs");
    let (string_data, pem_dependencies) = tls.string_data().into_parts();
    let secret = Secret {
        metadata: metadata(&secret_name, &namespace, None),
        string_data: Some(string_data),
        ..Default::default()
    };
    let mut secret = manifest_resource(SECRET_TYPE, &secret_name, &secret)?;
    secret.depends_on.extend(pem_dependencies);
    let secret_id = component.add(secret);

    let pvc_id = match &args.pv_config {
        Some(pv) => {
            let pvc_name = format!("{name}-buildkitd-pvc");
            let pvc = persistent_volume_claim(&pvc_name, &namespace, pv);
            Some(component.add(manifest_resource(PVC_TYPE, &pvc_name, &pvc)?))
        }
        None => None,
    };

    let daemon_set_id = if args.bottlerocket.unwrap_or(false) {
        let ds_name = format!("{name}-sysctl-userns");
        let daemon_set = sysctl_daemon_set(&ds_name, &namespace, args);
        Some(component.add(manifest_resource(DAEMON_SET_TYPE, &ds_name, &daemon_set)?))
    } else {
        None
    };

    let app = format!("{name}-buildkitd");
    let stateful_set = buildkitd_stateful_set(
        &app,
        &namespace,
        args,
        &secret_name,
        pvc_id.as_ref().map(ResourceId::as_str),
    );
    let mut stateful_set = manifest_resource(STATEFUL_SET_TYPE, &app, &stateful_set)?
        .depends_on(&secret_id);
    for id in pvc_id.iter().chain(daemon_set_id.iter()) {
        stateful_set = stateful_set.depends_on(id);
    }
    let stateful_set_id = component.add(stateful_set);

    let service_name = format!("{name}-service");
    let service = buildkitd_service(&service_name, &namespace, &app);
    let service_id = component.add(manifest_resource(SERVICE_TYPE, &service_name, &service)?);

    let address = format!("tcp://{service_name}.{namespace}.svc:{BUILDKIT_PORT}");
    component.export("statefulSet", app.as_str());
    component.export("service", service_name.as_str());
    component.export("certSecret", secret_name.as_str());
    component.export("address", address.as_str());

    info!(
        builder = %name,
        namespace = %namespace,
        persistent = pvc_id.is_some(),
        bottlerocket = daemon_set_id.is_some(),
        "planned buildkit builder"
    );
    Ok(BuildkitBuilderPlan {
        component,
        namespace,
        secret: secret_id,
        pvc: pvc_id,
        daemon_set: daemon_set_id,
        stateful_set: stateful_set_id,
        service: service_id,
        address,
    })
}

/// Flatten a typed object into a resource's properties
fn manifest_resource<K: Serialize>(type_token: &str, id: &str, object: &K) -> Result<Resource> {
    match serde_json::to_value(object)? {
        Value::Object(fields) => Ok(fields
            .into_iter()
            .fold(Resource::new(type_token, id), |resource, (key, value)| {
                resource.set(&key, value)
            })),
        _ => Err(Error::serialization_for_kind(
            type_token,
            "manifest did not serialize to an object",
        )),
    }
}

fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

fn metadata(name: &str, namespace: &str, labels: Option<BTreeMap<String, String>>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels,
        ..Default::default()
    }
}

fn persistent_volume_claim(name: &str, namespace: &str, pv: &PvConfig) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(name, namespace, None),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(pv.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(pv.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn sysctl_daemon_set(name: &str, namespace: &str, args: &BuildkitBuilderArgs) -> DaemonSet {
    let labels = app_labels(name);
    DaemonSet {
        metadata: metadata(name, namespace, Some(labels.clone())),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_selector: args.node_selector.clone(),
                    tolerations: args.tolerations.clone(),
                    containers: vec![Container {
                        name: "sysctl-userns".to_string(),
                        image: Some(SYSCTL_IMAGE.to_string()),
                        command: Some(
                            ["sh", "-euxc", ENABLE_USERNS]
                                .iter()
                                .map(|s| s.to_string())
                                .collect(),
                        ),
                        security_context: Some(SecurityContext {
                            privileged: Some(true),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn buildctl_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "buildctl".to_string(),
                "debug".to_string(),
                "workers".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(30),
        ..Default::default()
    }
}

fn buildkitd_args() -> Vec<String> {
    [
        "--addr",
        "unix:///run/user/1000/buildkit/buildkitd.sock",
        "--addr",
        "tcp://0.0.0.0:1234",
        "--tlscacert",
        "/certs/ca.pem",
        "--tlscert",
        "/certs/cert.pem",
        "--tlskey",
        "/certs/key.pem",
        "--oci-worker-no-process-sandbox",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn buildkitd_stateful_set(
    app: &str,
    namespace: &str,
    args: &BuildkitBuilderArgs,
    secret_name: &str,
    claim_name: Option<&str>,
) -> StatefulSet {
    let labels = app_labels(app);

    let state_volume = match claim_name {
        Some(claim_name) => Volume {
            name: STATE_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        None => Volume {
            name: STATE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    };

    let container = Container {
        name: "buildkitd".to_string(),
        image: Some(BUILDKIT_IMAGE.to_string()),
        args: Some(buildkitd_args()),
        readiness_probe: Some(buildctl_probe()),
        liveness_probe: Some(buildctl_probe()),
        security_context: Some(SecurityContext {
            seccomp_profile: Some(SeccompProfile {
                type_: "Unconfined".to_string(),
                ..Default::default()
            }),
            app_armor_profile: Some(AppArmorProfile {
                type_: "Unconfined".to_string(),
                ..Default::default()
            }),
            run_as_user: Some(ROOTLESS_UID),
            run_as_group: Some(ROOTLESS_UID),
            ..Default::default()
        }),
        ports: Some(vec![ContainerPort {
            container_port: BUILDKIT_PORT,
            ..Default::default()
        }]),
        resources: args.resources.clone(),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CERTS_VOLUME.to_string(),
                mount_path: CERTS_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: STATE_VOLUME.to_string(),
                mount_path: STATE_MOUNT_PATH.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    StatefulSet {
        metadata: metadata(app, namespace, Some(labels.clone())),
        spec: Some(StatefulSetSpec {
            replicas: Some(args.replicas.unwrap_or(DEFAULT_REPLICAS)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: app.to_string().into(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_selector: args.node_selector.clone(),
                    tolerations: args.tolerations.clone(),
                    containers: vec![container],
                    volumes: Some(vec![
                        Volume {
                            name: CERTS_VOLUME.to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(secret_name.to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        state_volume,
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn buildkitd_service(name: &str, namespace: &str, app: &str) -> Service {
    Service {
        metadata: metadata(name, namespace, Some(app_labels(app))),
        spec: Some(ServiceSpec {
            selector: Some(app_labels(app)),
            ports: Some(vec![ServicePort {
                port: BUILDKIT_PORT,
                target_port: Some(IntOrString::Int(BUILDKIT_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
