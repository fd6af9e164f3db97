//! Least-privilege access policies
//!
//! Every statement is data: a sid, an action set, resource ARN templates and
//! condition templates. Templates reference `{partition}`, `{region}`,
//! `{cluster}`, `{dns_suffix}`, `{queue_arn}`, `{node_role_arn}` and
//! `{encryption_key_arn}`, which a [`TemplateContext`] resolves when the
//! document is composed.
//!
//! Mutating EC2 and instance-profile actions are scoped in two phases.
//! Creation is authorized through `aws:RequestTag/...` keys, the tags the
//! caller attaches in the same request. Mutation and deletion of existing
//! resources are authorized through `aws:ResourceTag/...` keys. Both always
//! require `kubernetes.io/cluster/<cluster> = owned`.

use std::collections::BTreeMap;

use eksplan_common::{Error, Result};

use crate::document::{
    ComparisonOperator, Condition, Effect, PolicyDocument, PrincipalType, Statement,
};

use ComparisonOperator::{
    Bool, ForAllValuesStringEquals, StringEquals, StringEqualsIfExists, StringLike,
};

/// A condition whose key and values may contain template variables
#[derive(Clone, Copy, Debug)]
pub struct ConditionSpec {
    /// Operator
    pub test: ComparisonOperator,
    /// Key template
    pub variable: &'static str,
    /// Value templates
    pub values: &'static [&'static str],
}

/// A principal block whose identifiers may contain template variables
#[derive(Clone, Copy, Debug)]
pub struct PrincipalSpec {
    /// Principal kind
    pub kind: PrincipalType,
    /// Identifier templates
    pub identifiers: &'static [&'static str],
}

/// A statement template
#[derive(Clone, Copy, Debug)]
pub struct StatementSpec {
    /// Statement id
    pub sid: Option<&'static str>,
    /// Allow or deny
    pub effect: Effect,
    /// Principals (resource policies only)
    pub principals: &'static [PrincipalSpec],
    /// Actions
    pub actions: &'static [&'static str],
    /// Resource templates
    pub resources: &'static [&'static str],
    /// Condition templates
    pub conditions: &'static [ConditionSpec],
}

const fn cond(
    test: ComparisonOperator,
    variable: &'static str,
    values: &'static [&'static str],
) -> ConditionSpec {
    ConditionSpec {
        test,
        variable,
        values,
    }
}

const fn allow(
    sid: &'static str,
    actions: &'static [&'static str],
    resources: &'static [&'static str],
    conditions: &'static [ConditionSpec],
) -> StatementSpec {
    StatementSpec {
        sid: Some(sid),
        effect: Effect::Allow,
        principals: &[],
        actions,
        resources,
        conditions,
    }
}

/// Tag every cluster-scoped resource must carry
pub const CLUSTER_OWNED_VALUE: &str = "owned";

const REQUEST_CLUSTER_OWNED: ConditionSpec = cond(
    StringEquals,
    "aws:RequestTag/kubernetes.io/cluster/{cluster}",
    &[CLUSTER_OWNED_VALUE],
);
const RESOURCE_CLUSTER_OWNED: ConditionSpec = cond(
    StringEquals,
    "aws:ResourceTag/kubernetes.io/cluster/{cluster}",
    &[CLUSTER_OWNED_VALUE],
);
const REQUEST_EKS_CLUSTER_NAME: ConditionSpec =
    cond(StringEquals, "aws:RequestTag/eks:eks-cluster-name", &["{cluster}"]);
const REQUEST_NODEPOOL: ConditionSpec =
    cond(StringLike, "aws:RequestTag/karpenter.sh/nodepool", &["*"]);
const RESOURCE_NODEPOOL: ConditionSpec =
    cond(StringLike, "aws:ResourceTag/karpenter.sh/nodepool", &["*"]);
const REQUEST_REGION: ConditionSpec = cond(
    StringEquals,
    "aws:RequestTag/topology.kubernetes.io/region",
    &["{region}"],
);
const RESOURCE_REGION: ConditionSpec = cond(
    StringEquals,
    "aws:ResourceTag/topology.kubernetes.io/region",
    &["{region}"],
);
const REQUEST_NODECLASS: ConditionSpec = cond(
    StringLike,
    "aws:RequestTag/karpenter.k8s.aws/ec2nodeclass",
    &["*"],
);
const RESOURCE_NODECLASS: ConditionSpec = cond(
    StringLike,
    "aws:ResourceTag/karpenter.k8s.aws/ec2nodeclass",
    &["*"],
);

const EC2_TAGGABLE_ON_CREATE: &[&str] = &[
    "arn:{partition}:ec2:{region}:*:fleet/*",
    "arn:{partition}:ec2:{region}:*:instance/*",
    "arn:{partition}:ec2:{region}:*:volume/*",
    "arn:{partition}:ec2:{region}:*:network-interface/*",
    "arn:{partition}:ec2:{region}:*:launch-template/*",
    "arn:{partition}:ec2:{region}:*:spot-instances-request/*",
];
const INSTANCE_PROFILES: &[&str] = &["arn:{partition}:iam::*:instance-profile/*"];

/// Statements of the Karpenter controller policy
pub const KARPENTER_CONTROLLER_STATEMENTS: &[StatementSpec] = &[
    allow(
        "AllowScopedEC2InstanceAccessActions",
        &["ec2:RunInstances", "ec2:CreateFleet"],
        &[
            "arn:{partition}:ec2:{region}::image/*",
            "arn:{partition}:ec2:{region}::snapshot/*",
            "arn:{partition}:ec2:{region}:*:security-group/*",
            "arn:{partition}:ec2:{region}:*:subnet/*",
        ],
        &[],
    ),
    allow(
        "AllowScopedEC2LaunchTemplateAccessActions",
        &["ec2:RunInstances", "ec2:CreateFleet"],
        &["arn:{partition}:ec2:{region}:*:launch-template/*"],
        &[RESOURCE_CLUSTER_OWNED, RESOURCE_NODEPOOL],
    ),
    allow(
        "AllowScopedEC2InstanceActionsWithTags",
        &["ec2:RunInstances", "ec2:CreateFleet", "ec2:CreateLaunchTemplate"],
        EC2_TAGGABLE_ON_CREATE,
        &[REQUEST_CLUSTER_OWNED, REQUEST_EKS_CLUSTER_NAME, REQUEST_NODEPOOL],
    ),
    allow(
        "AllowScopedResourceCreationTagging",
        &["ec2:CreateTags"],
        EC2_TAGGABLE_ON_CREATE,
        &[
            REQUEST_CLUSTER_OWNED,
            REQUEST_EKS_CLUSTER_NAME,
            cond(
                StringEquals,
                "ec2:CreateAction",
                &["RunInstances", "CreateFleet", "CreateLaunchTemplate"],
            ),
            REQUEST_NODEPOOL,
        ],
    ),
    allow(
        "AllowScopedResourceTagging",
        &["ec2:CreateTags"],
        &["arn:{partition}:ec2:{region}:*:instance/*"],
        &[
            RESOURCE_CLUSTER_OWNED,
            RESOURCE_NODEPOOL,
            cond(
                StringEqualsIfExists,
                "aws:RequestTag/eks:eks-cluster-name",
                &["{cluster}"],
            ),
            cond(
                ForAllValuesStringEquals,
                "aws:TagKeys",
                &["eks:eks-cluster-name", "karpenter.sh/nodeclaim", "Name"],
            ),
        ],
    ),
    allow(
        "AllowScopedDeletion",
        &["ec2:TerminateInstances", "ec2:DeleteLaunchTemplate"],
        &[
            "arn:{partition}:ec2:{region}:*:instance/*",
            "arn:{partition}:ec2:{region}:*:launch-template/*",
        ],
        &[RESOURCE_CLUSTER_OWNED, RESOURCE_NODEPOOL],
    ),
    allow(
        "AllowRegionalReadActions",
        &[
            "ec2:DescribeAvailabilityZones",
            "ec2:DescribeImages",
            "ec2:DescribeInstances",
            "ec2:DescribeInstanceTypeOfferings",
            "ec2:DescribeInstanceTypes",
            "ec2:DescribeLaunchTemplates",
            "ec2:DescribeSecurityGroups",
            "ec2:DescribeSpotPriceHistory",
            "ec2:DescribeSubnets",
        ],
        &["*"],
        &[cond(StringEquals, "aws:RequestedRegion", &["{region}"])],
    ),
    allow(
        "AllowSSMReadActions",
        &["ssm:GetParameter"],
        &["arn:{partition}:ssm:{region}::parameter/aws/service/*"],
        &[],
    ),
    allow(
        "AllowPricingReadActions",
        &["pricing:GetProducts"],
        &["*"],
        &[],
    ),
    allow(
        "AllowInterruptionQueueActions",
        &["sqs:DeleteMessage", "sqs:GetQueueUrl", "sqs:ReceiveMessage"],
        &["{queue_arn}"],
        &[],
    ),
    allow(
        "AllowPassingInstanceRole",
        &["iam:PassRole"],
        &["{node_role_arn}"],
        &[cond(StringEquals, "iam:PassedToService", &["ec2.{dns_suffix}"])],
    ),
    allow(
        "AllowScopedInstanceProfileCreationActions",
        &["iam:CreateInstanceProfile"],
        INSTANCE_PROFILES,
        &[
            REQUEST_CLUSTER_OWNED,
            REQUEST_EKS_CLUSTER_NAME,
            REQUEST_REGION,
            REQUEST_NODECLASS,
        ],
    ),
    allow(
        "AllowScopedInstanceProfileTagActions",
        &["iam:TagInstanceProfile"],
        INSTANCE_PROFILES,
        &[
            RESOURCE_CLUSTER_OWNED,
            RESOURCE_REGION,
            REQUEST_CLUSTER_OWNED,
            REQUEST_EKS_CLUSTER_NAME,
            REQUEST_REGION,
            RESOURCE_NODECLASS,
            REQUEST_NODECLASS,
        ],
    ),
    allow(
        "AllowScopedInstanceProfileActions",
        &[
            "iam:AddRoleToInstanceProfile",
            "iam:RemoveRoleFromInstanceProfile",
            "iam:DeleteInstanceProfile",
        ],
        INSTANCE_PROFILES,
        &[RESOURCE_CLUSTER_OWNED, RESOURCE_REGION, RESOURCE_NODECLASS],
    ),
    allow(
        "AllowInstanceProfileReadActions",
        &["iam:GetInstanceProfile"],
        INSTANCE_PROFILES,
        &[],
    ),
    allow(
        "AllowAPIServerEndpointDiscovery",
        &["eks:DescribeCluster"],
        &["arn:{partition}:eks:{region}:*:cluster/{cluster}"],
        &[],
    ),
];

/// Statements of the interruption queue's resource policy
pub const INTERRUPTION_QUEUE_STATEMENTS: &[StatementSpec] = &[
    StatementSpec {
        sid: Some("SqsWrite"),
        effect: Effect::Allow,
        principals: &[PrincipalSpec {
            kind: PrincipalType::Service,
            identifiers: &["events.{dns_suffix}", "sqs.{dns_suffix}"],
        }],
        actions: &["sqs:SendMessage"],
        resources: &["{queue_arn}"],
        conditions: &[],
    },
    StatementSpec {
        sid: Some("DenyHTTP"),
        effect: Effect::Deny,
        principals: &[PrincipalSpec {
            kind: PrincipalType::Any,
            identifiers: &["*"],
        }],
        actions: &["sqs:*"],
        resources: &["{queue_arn}"],
        conditions: &[cond(StringEquals, "aws:SecureTransport", &["false"])],
    },
];

/// Statements of the cluster role's secrets encryption policy
pub const CLUSTER_ENCRYPTION_STATEMENTS: &[StatementSpec] = &[
    StatementSpec {
        sid: None,
        effect: Effect::Allow,
        principals: &[],
        actions: &[
            "kms:Encrypt",
            "kms:Decrypt",
            "kms:ReEncrypt*",
            "kms:GenerateDataKey*",
            "kms:DescribeKey",
        ],
        resources: &["{encryption_key_arn}"],
        conditions: &[],
    },
    StatementSpec {
        sid: None,
        effect: Effect::Allow,
        principals: &[],
        actions: &["kms:CreateGrant", "kms:ListGrants", "kms:RevokeGrant"],
        resources: &["*"],
        conditions: &[cond(Bool, "kms:GrantIsForAWSResource", &["true"])],
    },
];

/// Values for template variables
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    vars: BTreeMap<&'static str, String>,
}

impl TemplateContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a partition and region
    pub fn for_partition(partition: &str, region: &str, dns_suffix: &str) -> Self {
        Self::new()
            .with("partition", partition)
            .with("region", region)
            .with("dns_suffix", dns_suffix)
    }

    /// Bind a variable
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.vars.insert(name, value.into());
        self
    }

    /// Substitute every `{name}` in a template
    ///
    /// A variable without a binding is a configuration error rather than an
    /// unresolved literal in the rendered policy.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| {
                Error::configuration_for("iam", format!("unterminated variable in '{template}'"))
            })?;
            let name = &after[..end];
            let value = self.vars.get(name).ok_or_else(|| {
                Error::configuration_for(
                    "iam",
                    format!("no value for template variable '{name}' in '{template}'"),
                )
            })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn render_all(&self, templates: &[&str]) -> Result<Vec<String>> {
        templates.iter().map(|t| self.render(t)).collect()
    }
}

impl StatementSpec {
    /// Resolve the templates into a statement
    pub fn render(&self, ctx: &TemplateContext) -> Result<Statement> {
        let mut statement = Statement::new(self.effect)
            .actions(self.actions.iter().copied())
            .resources(ctx.render_all(self.resources)?);
        if let Some(sid) = self.sid {
            statement = statement.sid(sid);
        }
        for principal in self.principals {
            statement = statement.principal(principal.kind, ctx.render_all(principal.identifiers)?);
        }
        for condition in self.conditions {
            statement = statement.condition(Condition::new(
                condition.test,
                ctx.render(condition.variable)?,
                ctx.render_all(condition.values)?,
            ));
        }
        Ok(statement)
    }
}

/// Render a statement table into a document
pub fn render_document(specs: &[StatementSpec], ctx: &TemplateContext) -> Result<PolicyDocument> {
    let statements = specs
        .iter()
        .map(|spec| spec.render(ctx))
        .collect::<Result<Vec<_>>>()?;
    PolicyDocument::new(statements)
}

/// Karpenter controller policy
///
/// `ctx` must bind `partition`, `region`, `dns_suffix`, `cluster`,
/// `queue_arn` and `node_role_arn`.
pub fn karpenter_controller_policy(ctx: &TemplateContext) -> Result<PolicyDocument> {
    render_document(KARPENTER_CONTROLLER_STATEMENTS, ctx)
}

/// Resource policy of the interruption queue
///
/// Event bus and queue service may send messages; every request not made
/// over TLS is denied.
pub fn interruption_queue_policy(queue_arn: &str, dns_suffix: &str) -> Result<PolicyDocument> {
    let ctx = TemplateContext::new()
        .with("queue_arn", queue_arn)
        .with("dns_suffix", dns_suffix);
    render_document(INTERRUPTION_QUEUE_STATEMENTS, &ctx)
}

/// Inline policy letting the cluster role use its secrets encryption key
pub fn cluster_encryption_policy(encryption_key_arn: &str) -> Result<PolicyDocument> {
    let ctx = TemplateContext::new().with("encryption_key_arn", encryption_key_arn);
    render_document(CLUSTER_ENCRYPTION_STATEMENTS, &ctx)
}
