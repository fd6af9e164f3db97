//! Kubernetes service network configuration

use std::net::IpAddr;

use serde_json::{Map, Value};

use eksplan_common::lookup::IpFamily;
use eksplan_common::{Error, Result};

use crate::args::NetworkConfig;

/// The `kubernetesNetworkConfig` block of a cluster
///
/// The service CIDR lands in exactly one of the two family-specific fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KubernetesNetworkConfig {
    /// Declared IP family, if any
    pub ip_family: Option<IpFamily>,
    /// Service CIDR for IPv4 clusters
    pub service_ipv4_cidr: Option<String>,
    /// Service CIDR for IPv6 clusters
    pub service_ipv6_cidr: Option<String>,
    /// Auto mode load balancing
    pub elastic_load_balancing: bool,
}

impl KubernetesNetworkConfig {
    /// Derive the block from the caller's network settings
    pub fn from_args(network: Option<&NetworkConfig>, auto_mode_enabled: bool) -> Self {
        let ip_family = network.map(|n| n.ip_family);
        let cidr = network.and_then(|n| n.service_cidr.clone());
        let (service_ipv4_cidr, service_ipv6_cidr) = match ip_family {
            Some(IpFamily::Ipv4) => (cidr, None),
            Some(IpFamily::Ipv6) => (None, cidr),
            None => (None, None),
        };
        Self {
            ip_family,
            service_ipv4_cidr,
            service_ipv6_cidr,
            elastic_load_balancing: auto_mode_enabled,
        }
    }

    /// Resource property value
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert(
            "elasticLoadBalancing".to_string(),
            serde_json::json!({ "enabled": self.elastic_load_balancing }),
        );
        if let Some(family) = self.ip_family {
            out.insert("ipFamily".to_string(), Value::from(family.as_str()));
        }
        if let Some(cidr) = &self.service_ipv4_cidr {
            out.insert("serviceIpv4Cidr".to_string(), Value::from(cidr.as_str()));
        }
        if let Some(cidr) = &self.service_ipv6_cidr {
            out.insert("serviceIpv6Cidr".to_string(), Value::from(cidr.as_str()));
        }
        Value::Object(out)
    }
}

/// Check a service CIDR is well formed and matches the IP family
pub fn validate_service_cidr(family: IpFamily, cidr: &str) -> Result<()> {
    let invalid = |reason: String| {
        Error::configuration_for_field("cluster", "networkConfig.serviceCidr", reason)
    };

    let (address, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| invalid(format!("'{cidr}' is not in CIDR notation")))?;
    let address: IpAddr = address
        .parse()
        .map_err(|_| invalid(format!("'{cidr}' has an invalid address")))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| invalid(format!("'{cidr}' has an invalid prefix length")))?;

    let (matches, max_prefix) = match (family, address) {
        (IpFamily::Ipv4, IpAddr::V4(_)) => (true, 32),
        (IpFamily::Ipv6, IpAddr::V6(_)) => (true, 128),
        (_, IpAddr::V4(_)) => (false, 32),
        (_, IpAddr::V6(_)) => (false, 128),
    };
    if !matches {
        return Err(invalid(format!(
            "'{cidr}' does not belong to IP family {}",
            family.as_str()
        )));
    }
    if prefix > max_prefix {
        return Err(invalid(format!("'{cidr}' prefix exceeds /{max_prefix}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn network(family: IpFamily, cidr: &str) -> NetworkConfig {
        NetworkConfig {
            ip_family: family,
            service_cidr: Some(cidr.to_string()),
        }
    }

    #[test]
    fn ipv4_cidr_only_fills_ipv4_field() {
        let config =
            KubernetesNetworkConfig::from_args(Some(&network(IpFamily::Ipv4, "10.100.0.0/16")), true);
        assert_eq!(config.service_ipv4_cidr.as_deref(), Some("10.100.0.0/16"));
        assert_eq!(config.service_ipv6_cidr, None);
    }

    #[test]
    fn ipv6_cidr_only_fills_ipv6_field() {
        let config =
            KubernetesNetworkConfig::from_args(Some(&network(IpFamily::Ipv6, "fd00:ec2::/108")), true);
        assert_eq!(config.service_ipv4_cidr, None);
        assert_eq!(config.service_ipv6_cidr.as_deref(), Some("fd00:ec2::/108"));

        let value = config.to_value();
        assert!(value.get("serviceIpv4Cidr").is_none());
        assert_eq!(value["ipFamily"], "ipv6");
    }

    #[test]
    fn no_network_config_leaves_family_unset() {
        let value = KubernetesNetworkConfig::from_args(None, false).to_value();
        assert_eq!(value, serde_json::json!({ "elasticLoadBalancing": { "enabled": false } }));
    }

    #[rstest]
    #[case::v4(IpFamily::Ipv4, "10.100.0.0/16")]
    #[case::v6(IpFamily::Ipv6, "fd00:ec2::/108")]
    fn accepts_matching_cidrs(#[case] family: IpFamily, #[case] cidr: &str) {
        assert!(validate_service_cidr(family, cidr).is_ok());
    }

    #[rstest]
    #[case::family_mismatch(IpFamily::Ipv6, "10.100.0.0/16")]
    #[case::no_prefix(IpFamily::Ipv4, "10.100.0.0")]
    #[case::bad_address(IpFamily::Ipv4, "10.100.0/16")]
    #[case::prefix_too_long(IpFamily::Ipv4, "10.100.0.0/33")]
    fn rejects_bad_cidrs(#[case] family: IpFamily, #[case] cidr: &str) {
        let err = validate_service_cidr(family, cidr).unwrap_err();
        assert_eq!(err.field(), Some("networkConfig.serviceCidr"));
    }
}
