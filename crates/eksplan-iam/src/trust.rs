//! Trust policies: who may assume a role
//!
//! Two shapes are produced. IRSA trust federates Kubernetes service accounts
//! through the cluster's OIDC provider. Service trust lets an AWS service
//! principal (EC2, EKS, EKS Pod Identity) assume the role and tag its session.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use eksplan_common::arn::{oidc_provider, strip_scheme};
use eksplan_common::{Result, STS_AUDIENCE};

use crate::document::{ComparisonOperator, Condition, PolicyDocument, PrincipalType, Statement};

/// Action granted to OIDC-federated identities
pub const ASSUME_ROLE_WITH_WEB_IDENTITY: &str = "sts:AssumeRoleWithWebIdentity";

/// Actions granted to service principals
pub const SERVICE_TRUST_ACTIONS: [&str; 2] = ["sts:AssumeRole", "sts:TagSession"];

/// A Kubernetes service account allowed to assume an IRSA role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountRef {
    /// Namespace of the service account
    pub namespace: String,
    /// Name of the service account
    pub service_account: String,
}

impl ServiceAccountRef {
    /// Reference a service account
    pub fn new(namespace: impl Into<String>, service_account: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_account: service_account.into(),
        }
    }

    /// Subject claim of the account's projected token
    pub fn subject(&self) -> String {
        format!(
            "system:serviceaccount:{}:{}",
            self.namespace, self.service_account
        )
    }
}

/// Trust policy for IAM roles for service accounts
///
/// Exactly one audience condition is emitted, plus one subject condition per
/// service account. With no service accounts, any identity from the cluster's
/// OIDC provider that presents the STS audience can assume the role.
pub fn irsa_trust_policy(
    partition: &str,
    account_id: &str,
    oidc_issuer: &str,
    service_accounts: &[ServiceAccountRef],
) -> Result<PolicyDocument> {
    let issuer = strip_scheme(oidc_issuer);
    let mut statement = Statement::allow()
        .actions([ASSUME_ROLE_WITH_WEB_IDENTITY])
        .principal(
            PrincipalType::Federated,
            [oidc_provider(partition, account_id, oidc_issuer)],
        )
        .condition(Condition::new(
            ComparisonOperator::StringEquals,
            format!("{issuer}:aud"),
            [STS_AUDIENCE],
        ));

    for account in service_accounts {
        statement = statement.condition(Condition::new(
            ComparisonOperator::StringEquals,
            format!("{issuer}:sub"),
            [account.subject()],
        ));
    }

    if service_accounts.is_empty() {
        debug!(issuer, "IRSA trust without subject restriction");
    }
    PolicyDocument::new(vec![statement])
}

/// Trust policy letting a service principal assume the role
pub fn service_trust_policy(service_principal: &str) -> Result<PolicyDocument> {
    PolicyDocument::new(vec![Statement::allow()
        .principal(PrincipalType::Service, [service_principal])
        .actions(SERVICE_TRUST_ACTIONS)])
}
