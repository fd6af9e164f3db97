//! A reference to a cluster, whether it exists already or is planned in the
//! same pass

use tracing::debug;

use eksplan_common::arn::strip_scheme;
use eksplan_common::lookup::IpFamily;
use eksplan_common::{CloudLookup, ClusterDescription, Error, Output, Result};

/// Cluster facts other components build on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterHandle {
    /// Cluster name
    pub name: Output<String>,
    /// Cluster ARN
    pub arn: Output<String>,
    /// API server endpoint
    pub endpoint: Output<String>,
    /// Base64 CA bundle
    pub certificate_authority: Output<String>,
    /// IP family of the service network
    pub ip_family: IpFamily,
    oidc_provider: Option<Output<String>>,
    description: Option<ClusterDescription>,
}

impl ClusterHandle {
    /// Handle for an existing cluster
    ///
    /// A cluster without CA data cannot be reached, so that is checked here.
    pub fn lookup(name: &str, lookup: &dyn CloudLookup) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::configuration_for_field(
                "cluster",
                "clusterName",
                "cluster name must not be empty",
            ));
        }
        let description = lookup.describe_cluster(name)?;
        debug!(cluster = name, arn = %description.arn, "described existing cluster");
        Self::from_description(description)
    }

    /// Handle from a cluster description
    pub fn from_description(description: ClusterDescription) -> Result<Self> {
        let certificate_authority = description.certificate_authority()?.to_string();
        Ok(Self {
            name: Output::known(description.name.clone()),
            arn: Output::known(description.arn.clone()),
            endpoint: Output::known(description.endpoint.clone()),
            certificate_authority: Output::known(certificate_authority),
            ip_family: description.ip_family.unwrap_or_default(),
            oidc_provider: None,
            description: Some(description),
        })
    }

    /// Handle for a cluster planned in this pass
    ///
    /// `oidc_provider` is the issuer without its scheme, as IAM names the
    /// provider.
    pub fn planned(
        name: Output<String>,
        arn: Output<String>,
        endpoint: Output<String>,
        certificate_authority: Output<String>,
        oidc_provider: Output<String>,
        ip_family: IpFamily,
    ) -> Self {
        Self {
            name,
            arn,
            endpoint,
            certificate_authority,
            ip_family,
            oidc_provider: Some(oidc_provider),
            description: None,
        }
    }

    /// OIDC provider (issuer host and path), required for IRSA trust
    pub fn oidc_provider(&self) -> Result<Output<String>> {
        match (&self.description, &self.oidc_provider) {
            (Some(description), _) => Ok(Output::known(
                strip_scheme(description.oidc_issuer()?).to_string(),
            )),
            (None, Some(issuer)) => Ok(issuer.clone()),
            (None, None) => Err(Error::lookup(
                format!("cluster/{}", self.name.as_str()),
                "no OIDC issuers found",
            )),
        }
    }

    /// True when the cluster was described rather than planned
    pub fn exists(&self) -> bool {
        self.description.is_some()
    }
}
