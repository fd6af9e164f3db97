//! ARN parsing and partition-aware ARN construction

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A parsed Amazon Resource Name
///
/// `arn:<partition>:<service>:<region>:<account>:<resource>`. The resource part
/// keeps any further `:` or `/` separators untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arn {
    /// Partition (e.g., "aws", "aws-cn", "aws-us-gov")
    pub partition: String,
    /// Service namespace (e.g., "iam", "sts")
    pub service: String,
    /// Region, empty for global services
    pub region: String,
    /// Account id, empty or "aws" for managed resources
    pub account: String,
    /// Resource type and id
    pub resource: String,
}

impl Arn {
    /// Build an ARN from its parts
    pub fn new(
        partition: impl Into<String>,
        service: impl Into<String>,
        region: impl Into<String>,
        account: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            service: service.into(),
            region: region.into(),
            account: account.into(),
            resource: resource.into(),
        }
    }

    /// Last path segment of the resource (the role name for a role ARN)
    pub fn resource_name(&self) -> &str {
        self.resource
            .rsplit('/')
            .next()
            .unwrap_or(self.resource.as_str())
    }

    /// IAM role that issued an assumed-role session ARN
    ///
    /// `arn:aws:sts::123:assumed-role/Admin/alice` becomes
    /// `arn:aws:iam::123:role/Admin`. IAM user and role ARNs are their own
    /// issuer and are returned unchanged.
    pub fn session_issuer(&self) -> Result<Arn> {
        match self.service.as_str() {
            "iam" => Ok(self.clone()),
            "sts" => {
                let mut parts = self.resource.splitn(3, '/');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some("assumed-role"), Some(role), Some(_session)) if !role.is_empty() => {
                        Ok(Arn::new(
                            &self.partition,
                            "iam",
                            "",
                            &self.account,
                            format!("role/{role}"),
                        ))
                    }
                    _ => Err(Error::lookup(
                        self.to_string(),
                        "caller is not an assumed-role session",
                    )),
                }
            }
            other => Err(Error::lookup(
                self.to_string(),
                format!("unexpected service '{other}' for a caller identity"),
            )),
        }
    }
}

impl FromStr for Arn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(6, ':');
        let prefix = parts.next();
        match (
            prefix,
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some("arn"), Some(partition), Some(service), Some(region), Some(account), Some(resource))
                if !partition.is_empty() && !service.is_empty() && !resource.is_empty() =>
            {
                Ok(Arn::new(partition, service, region, account, resource))
            }
            _ => Err(Error::lookup(s, "malformed ARN")),
        }
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

/// Name of a role from its ARN (the last `/` segment)
///
/// Works on executor tokens too, which contain no `/` and are returned as is.
pub fn role_name_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// ARN of an AWS managed IAM policy in the given partition
pub fn aws_managed_policy(partition: &str, policy: &str) -> String {
    format!("arn:{partition}:iam::aws:policy/{policy}")
}

/// ARN of a customer policy in the given account
pub fn account_policy(partition: &str, account_id: &str, policy: &str) -> String {
    format!("arn:{partition}:iam::{account_id}:policy/{policy}")
}

/// ARN of an EKS cluster access policy
pub fn eks_access_policy(partition: &str, policy: &str) -> String {
    format!("arn:{partition}:eks::aws:cluster-access-policy/{policy}")
}

/// ARN of an IAM OIDC provider for an issuer URL
///
/// The scheme is dropped; IAM identifies providers by host and path only.
pub fn oidc_provider(partition: &str, account_id: &str, issuer: &str) -> String {
    format!(
        "arn:{partition}:iam::{account_id}:oidc-provider/{}",
        strip_scheme(issuer)
    )
}

/// Remove an `https://` scheme from an issuer URL
pub fn strip_scheme(issuer: &str) -> &str {
    issuer.strip_prefix("https://").unwrap_or(issuer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_and_formats_role_arn() {
        let arn: Arn = "arn:aws:iam::123456789012:role/path/Admin".parse().unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "iam");
        assert_eq!(arn.region, "");
        assert_eq!(arn.account, "123456789012");
        assert_eq!(arn.resource_name(), "Admin");
        assert_eq!(arn.to_string(), "arn:aws:iam::123456789012:role/path/Admin");
    }

    #[rstest]
    #[case::empty("")]
    #[case::not_an_arn("role/Admin")]
    #[case::missing_resource("arn:aws:iam::123456789012:")]
    #[case::too_few_parts("arn:aws:iam")]
    fn rejects_malformed_arns(#[case] input: &str) {
        let err = input.parse::<Arn>().unwrap_err();
        assert!(err.is_lookup());
    }

    #[rstest]
    #[case::standard(
        "arn:aws:sts::123456789012:assumed-role/Admin/alice",
        "arn:aws:iam::123456789012:role/Admin"
    )]
    #[case::china(
        "arn:aws-cn:sts::123456789012:assumed-role/Deployer/ci-run-1",
        "arn:aws-cn:iam::123456789012:role/Deployer"
    )]
    #[case::user(
        "arn:aws:iam::123456789012:user/bob",
        "arn:aws:iam::123456789012:user/bob"
    )]
    fn session_issuer_resolves_to_iam_principal(#[case] caller: &str, #[case] issuer: &str) {
        let arn: Arn = caller.parse().unwrap();
        assert_eq!(arn.session_issuer().unwrap().to_string(), issuer);
    }

    #[test]
    fn session_issuer_rejects_federated_users() {
        let arn: Arn = "arn:aws:sts::123456789012:federated-user/bob".parse().unwrap();
        assert!(arn.session_issuer().unwrap_err().is_lookup());
    }

    #[test]
    fn role_name_handles_paths_and_tokens() {
        assert_eq!(
            role_name_from_arn("arn:aws:iam::123456789012:role/a/b/Karpenter-prod"),
            "Karpenter-prod"
        );
        assert_eq!(role_name_from_arn("${node-role.arn}"), "${node-role.arn}");
    }

    #[test]
    fn managed_policy_arns_follow_partition() {
        assert_eq!(
            aws_managed_policy("aws-us-gov", "AmazonEKSClusterPolicy"),
            "arn:aws-us-gov:iam::aws:policy/AmazonEKSClusterPolicy"
        );
        assert_eq!(
            eks_access_policy("aws", "AmazonEKSClusterAdminPolicy"),
            "arn:aws:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy"
        );
        assert_eq!(
            account_policy("aws", "123456789012", "AmazonEKS_CNI_IPv6_Policy"),
            "arn:aws:iam::123456789012:policy/AmazonEKS_CNI_IPv6_Policy"
        );
    }

    #[test]
    fn oidc_provider_drops_scheme() {
        assert_eq!(
            oidc_provider(
                "aws",
                "123456789012",
                "https://oidc.eks.us-west-2.amazonaws.com/id/ABC"
            ),
            "arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-west-2.amazonaws.com/id/ABC"
        );
    }
}
