//! TLS material for a BuildKit daemon
//!
//! A private CA signs one server and one client certificate. Keys and
//! certificates are generated by the executor; this module only describes
//! them and wires the PEM attributes together.

use std::net::IpAddr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use eksplan_common::{Component, Error, Output, Resource, Result};

use crate::builder::BuilderTls;

/// Component type token
pub const CERTS_COMPONENT_TYPE: &str = "eksplan:buildkit:Certs";
/// Type token of private keys
pub const PRIVATE_KEY_TYPE: &str = "tls:index/privateKey:PrivateKey";
/// Type token of self-signed certificates
pub const SELF_SIGNED_CERT_TYPE: &str = "tls:index/selfSignedCert:SelfSignedCert";
/// Type token of certificate signing requests
pub const CERT_REQUEST_TYPE: &str = "tls:index/certRequest:CertRequest";
/// Type token of CA-signed certificates
pub const LOCALLY_SIGNED_CERT_TYPE: &str = "tls:index/locallySignedCert:LocallySignedCert";

const COMPONENT: &str = "buildkitCerts";

const CA_RSA_BITS: u32 = 3072;
const LEAF_RSA_BITS: u32 = 2048;
const LEAF_ECDSA_CURVE: &str = "P256";

/// Ten years
const CA_VALIDITY_HOURS: u32 = 10 * 365 * 24;
/// Ninety days
const CA_EARLY_RENEWAL_HOURS: u32 = 90 * 24;
/// 800 days stays under the 825-day ceiling Apple platforms enforce
const LEAF_VALIDITY_HOURS: u32 = 800 * 24;

const DEFAULT_CA_COMMON_NAME: &str = "buildkit-ca";
const DEFAULT_CA_ORGANIZATION: &str = "Buildkit development CA";
const LEAF_ORGANIZATION: &str = "Buildkit development certificate";

/// Key algorithm of the server and client keys
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyAlgorithm {
    /// RSA 2048
    #[default]
    Rsa,
    /// ECDSA on P-256
    Ecdsa,
}

impl KeyAlgorithm {
    /// Name understood by the executor
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Ecdsa => "ECDSA",
        }
    }

    fn key_resource(&self, id: String) -> Resource {
        let key = Resource::new(PRIVATE_KEY_TYPE, id).set("algorithm", self.as_str());
        match self {
            KeyAlgorithm::Rsa => key.set("rsaBits", LEAF_RSA_BITS),
            KeyAlgorithm::Ecdsa => key.set("ecdsaCurve", LEAF_ECDSA_CURVE),
        }
    }
}

/// Distinguished name of a certificate
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertSubject {
    /// CN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// O
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// OU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,
    /// C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// ST
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    /// L
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

impl CertSubject {
    fn default_ca() -> Self {
        Self {
            common_name: Some(DEFAULT_CA_COMMON_NAME.to_string()),
            organization: Some(DEFAULT_CA_ORGANIZATION.to_string()),
            ..Default::default()
        }
    }

    fn leaf() -> Self {
        Self {
            organization: Some(LEAF_ORGANIZATION.to_string()),
            ..Default::default()
        }
    }
}

/// Arguments for the BuildKit certificate set
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildkitCertsArgs {
    /// CA subject; defaults to a development CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_subject: Option<CertSubject>,

    /// Algorithm of the server and client keys
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,

    /// IP SANs of the server certificate
    #[serde(default, rename = "serverIPAddresses", skip_serializing_if = "Vec::is_empty")]
    pub server_ip_addresses: Vec<String>,

    /// DNS SANs of the server certificate
    #[serde(default, rename = "serverDNSNames", skip_serializing_if = "Vec::is_empty")]
    pub server_dns_names: Vec<String>,
}

impl BuildkitCertsArgs {
    /// Reject SANs the executor could never encode
    pub fn validate(&self) -> Result<()> {
        if let Some(bad) = self
            .server_ip_addresses
            .iter()
            .find(|ip| ip.parse::<IpAddr>().is_err())
        {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "serverIPAddresses",
                format!("'{bad}' is not an IP address"),
            ));
        }
        if self.server_dns_names.iter().any(|name| name.trim().is_empty()) {
            return Err(Error::configuration_for_field(
                COMPONENT,
                "serverDNSNames",
                "DNS names must not be empty",
            ));
        }
        Ok(())
    }
}

/// The planned certificate set
#[derive(Clone, Debug)]
pub struct BuildkitCertsPlan {
    /// Component holding keys, requests and certificates
    pub component: Component,
    /// CA certificate
    pub ca_cert_pem: Output<String>,
    /// Public key of the CA key pair
    pub ca_cert_public_key_pem: Output<String>,
    /// Server certificate
    pub server_cert_pem: Output<String>,
    /// Server private key
    pub server_private_key_pem: Output<String>,
    /// Client certificate
    pub client_cert_pem: Output<String>,
    /// Client private key
    pub client_private_key_pem: Output<String>,
}

impl BuildkitCertsPlan {
    /// TLS material for the daemon side
    pub fn server_tls(&self) -> BuilderTls {
        BuilderTls {
            ca_cert_pem: self.ca_cert_pem.clone(),
            cert_pem: self.server_cert_pem.clone(),
            private_key_pem: self.server_private_key_pem.clone(),
        }
    }
}

/// A certificate signed by the CA
struct Leaf {
    cert_pem: Output<String>,
    private_key_pem: Output<String>,
}

struct Ca {
    private_key_pem: Output<String>,
    cert_pem: Output<String>,
}

/// Plan the CA and the server and client certificates
pub fn compose_buildkit_certs(name: &str, args: &BuildkitCertsArgs) -> Result<BuildkitCertsPlan> {
    args.validate()?;
    let mut component = Component::new(CERTS_COMPONENT_TYPE, name);

    let ca_key = Resource::new(PRIVATE_KEY_TYPE, format!("{name}-ca-key"))
        .set("algorithm", KeyAlgorithm::Rsa.as_str())
        .set("rsaBits", CA_RSA_BITS);
    let ca_key_pem = ca_key.output("privateKeyPem");
    let ca_cert_public_key_pem = ca_key.output("publicKeyPem");
    component.add(ca_key);

    let subject = args.ca_subject.clone().unwrap_or_else(CertSubject::default_ca);
    let ca_cert = Resource::new(SELF_SIGNED_CERT_TYPE, format!("{name}-ca"))
        .set_output("privateKeyPem", ca_key_pem.clone())
        .set("allowedUses", vec!["cert_signing"])
        .set("validityPeriodHours", CA_VALIDITY_HOURS)
        .set("earlyRenewalHours", CA_EARLY_RENEWAL_HOURS)
        .set("isCaCertificate", true)
        .set("setSubjectKeyId", true)
        .set("subject", serde_json::to_value(&subject)?);
    let ca = Ca {
        private_key_pem: ca_key_pem,
        cert_pem: ca_cert.output("certPem"),
    };
    component.add(ca_cert);

    let server = plan_leaf(
        &mut component,
        &format!("{name}-server"),
        &ca,
        args.key_algorithm,
        &["key_encipherment", "digital_signature", "server_auth"],
        |request| {
            let dns_names = &args.server_dns_names;
            let ip_addresses = &args.server_ip_addresses;
            request
                .set_opt("dnsNames", (!dns_names.is_empty()).then(|| dns_names.clone()))
                .set_opt("ipAddresses", (!ip_addresses.is_empty()).then(|| ip_addresses.clone()))
        },
    )?;
    let client = plan_leaf(
        &mut component,
        &format!("{name}-client"),
        &ca,
        args.key_algorithm,
        &["key_encipherment", "digital_signature", "client_auth"],
        |request| request,
    )?;

    component.export("caCertPem", ca.cert_pem.value().clone());
    component.export("caCertPublicKeyPem", ca_cert_public_key_pem.value().clone());
    component.export("serverCertPem", server.cert_pem.value().clone());
    component.export("clientCertPem", client.cert_pem.value().clone());

    debug!(
        certs = %name,
        algorithm = args.key_algorithm.as_str(),
        "planned buildkit certificates"
    );
    Ok(BuildkitCertsPlan {
        component,
        ca_cert_pem: ca.cert_pem,
        ca_cert_public_key_pem,
        server_cert_pem: server.cert_pem,
        server_private_key_pem: server.private_key_pem,
        client_cert_pem: client.cert_pem,
        client_private_key_pem: client.private_key_pem,
    })
}

/// Key, signing request and CA-signed certificate for one side
fn plan_leaf(
    component: &mut Component,
    prefix: &str,
    ca: &Ca,
    algorithm: KeyAlgorithm,
    allowed_uses: &[&str],
    customize_request: impl FnOnce(Resource) -> Resource,
) -> Result<Leaf> {
    let key = algorithm.key_resource(format!("{prefix}-key"));
    let private_key_pem = key.output("privateKeyPem");
    component.add(key);

    let request = Resource::new(CERT_REQUEST_TYPE, format!("{prefix}-cert-request"))
        .set_output("privateKeyPem", private_key_pem.clone())
        .set("subject", serde_json::to_value(CertSubject::leaf())?);
    let request = customize_request(request);
    let request_pem = request.output("certRequestPem");
    component.add(request);

    let cert = Resource::new(LOCALLY_SIGNED_CERT_TYPE, format!("{prefix}-cert"))
        .set_output("caPrivateKeyPem", ca.private_key_pem.clone())
        .set_output("caCertPem", ca.cert_pem.clone())
        .set_output("certRequestPem", request_pem)
        .set("allowedUses", allowed_uses.to_vec())
        .set("validityPeriodHours", LEAF_VALIDITY_HOURS);
    let cert_pem = cert.output("certPem");
    let cert_id = component.add(cert);
    debug!(cert = %cert_id, "planned signed certificate");

    Ok(Leaf {
        cert_pem,
        private_key_pem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eksplan_common::ResourceId;
    use rstest::rstest;
    use serde_json::json;

    fn resource<'a>(plan: &'a BuildkitCertsPlan, id: &str) -> &'a Resource {
        plan.component
            .resource(&ResourceId::new(id))
            .unwrap_or_else(|| panic!("{id} is planned"))
    }

    #[test]
    fn ca_is_a_long_lived_rsa_3072_root() {
        let plan = compose_buildkit_certs("bk", &BuildkitCertsArgs::default()).unwrap();

        let key = resource(&plan, "bk-ca-key");
        assert_eq!(key.property("algorithm"), Some(&json!("RSA")));
        assert_eq!(key.property("rsaBits"), Some(&json!(3072)));

        let ca = resource(&plan, "bk-ca");
        assert_eq!(ca.type_token, SELF_SIGNED_CERT_TYPE);
        assert_eq!(ca.property("validityPeriodHours"), Some(&json!(87600)));
        assert_eq!(ca.property("earlyRenewalHours"), Some(&json!(2160)));
        assert_eq!(ca.property("isCaCertificate"), Some(&json!(true)));
        assert_eq!(ca.property("allowedUses"), Some(&json!(["cert_signing"])));
        assert_eq!(
            ca.property("subject"),
            Some(&json!({
                "commonName": "buildkit-ca",
                "organization": "Buildkit development CA",
            }))
        );
        assert!(ca.depends_on.contains(&ResourceId::new("bk-ca-key")));
    }

    #[test]
    fn custom_ca_subject_replaces_default() {
        let args = BuildkitCertsArgs {
            ca_subject: Some(CertSubject {
                common_name: Some("ci-ca".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let plan = compose_buildkit_certs("bk", &args).unwrap();
        assert_eq!(
            resource(&plan, "bk-ca").property("subject"),
            Some(&json!({ "commonName": "ci-ca" }))
        );
    }

    #[rstest]
    #[case(KeyAlgorithm::Rsa, "rsaBits", json!(2048))]
    #[case(KeyAlgorithm::Ecdsa, "ecdsaCurve", json!("P256"))]
    fn leaf_keys_follow_algorithm(
        #[case] algorithm: KeyAlgorithm,
        #[case] property: &str,
        #[case] expected: serde_json::Value,
    ) {
        let args = BuildkitCertsArgs {
            key_algorithm: algorithm,
            ..Default::default()
        };
        let plan = compose_buildkit_certs("bk", &args).unwrap();
        for id in ["bk-server-key", "bk-client-key"] {
            let key = resource(&plan, id);
            assert_eq!(key.property("algorithm"), Some(&json!(algorithm.as_str())));
            assert_eq!(key.property(property), Some(&expected));
        }
        // the CA key is always RSA
        assert_eq!(resource(&plan, "bk-ca-key").property("algorithm"), Some(&json!("RSA")));
    }

    #[test]
    fn server_certificate_carries_sans_and_server_auth() {
        let args = BuildkitCertsArgs {
            server_ip_addresses: vec!["10.0.0.10".to_string()],
            server_dns_names: vec!["buildkitd.default.svc".to_string()],
            ..Default::default()
        };
        let plan = compose_buildkit_certs("bk", &args).unwrap();

        let request = resource(&plan, "bk-server-cert-request");
        assert_eq!(request.property("dnsNames"), Some(&json!(["buildkitd.default.svc"])));
        assert_eq!(request.property("ipAddresses"), Some(&json!(["10.0.0.10"])));
        assert_eq!(
            request.property("subject"),
            Some(&json!({ "organization": "Buildkit development certificate" }))
        );

        let cert = resource(&plan, "bk-server-cert");
        assert_eq!(
            cert.property("allowedUses"),
            Some(&json!(["key_encipherment", "digital_signature", "server_auth"]))
        );
        assert_eq!(cert.property("validityPeriodHours"), Some(&json!(19200)));
        assert_eq!(cert.property("caCertPem"), Some(&json!("${bk-ca.certPem}")));
        assert_eq!(cert.property("caPrivateKeyPem"), Some(&json!("${bk-ca-key.privateKeyPem}")));
        assert!(cert.depends_on.contains(&ResourceId::new("bk-server-cert-request")));
    }

    #[test]
    fn client_certificate_has_no_sans() {
        let args = BuildkitCertsArgs {
            server_dns_names: vec!["buildkitd".to_string()],
            ..Default::default()
        };
        let plan = compose_buildkit_certs("bk", &args).unwrap();
        let request = resource(&plan, "bk-client-cert-request");
        assert!(request.property("dnsNames").is_none());
        assert_eq!(
            resource(&plan, "bk-client-cert").property("allowedUses"),
            Some(&json!(["key_encipherment", "digital_signature", "client_auth"]))
        );
    }

    #[test]
    fn outputs_reference_generated_material() {
        let plan = compose_buildkit_certs("bk", &BuildkitCertsArgs::default()).unwrap();
        assert_eq!(plan.ca_cert_pem.as_str(), "${bk-ca.certPem}");
        assert_eq!(plan.ca_cert_public_key_pem.as_str(), "${bk-ca-key.publicKeyPem}");
        assert_eq!(plan.server_private_key_pem.as_str(), "${bk-server-key.privateKeyPem}");
        assert_eq!(plan.client_cert_pem.as_str(), "${bk-client-cert.certPem}");

        let tls = plan.server_tls();
        assert_eq!(tls.cert_pem.as_str(), "${bk-server-cert.certPem}");
        assert!(!plan.component.outputs.contains_key("serverPrivateKeyPem"));
    }

    #[test]
    fn invalid_ip_san_is_rejected() {
        let args = BuildkitCertsArgs {
            server_ip_addresses: vec!["buildkitd".to_string()],
            ..Default::default()
        };
        let err = compose_buildkit_certs("bk", &args).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.field(), Some("serverIPAddresses"));
    }

    #[test]
    fn args_parse_original_field_names() {
        let args: BuildkitCertsArgs = serde_json::from_value(json!({
            "keyAlgorithm": "ECDSA",
            "serverIPAddresses": ["127.0.0.1"],
            "serverDNSNames": ["localhost"],
        }))
        .unwrap();
        assert_eq!(args.key_algorithm, KeyAlgorithm::Ecdsa);
        assert_eq!(args.server_ip_addresses, vec!["127.0.0.1"]);
        assert_eq!(args.server_dns_names, vec!["localhost"]);
    }
}
