//! AWS managed policies attached to generated roles

use eksplan_common::arn::aws_managed_policy;

/// Cluster role policies
pub const EKS_CLUSTER_ROLE_POLICIES: &[&str] = &[
    "AmazonEKSClusterPolicy",
    "AmazonEKSComputePolicy",
    "AmazonEKSBlockStoragePolicy",
    "AmazonEKSLoadBalancingPolicy",
    "AmazonEKSNetworkingPolicy",
];

/// Auto mode node role policies
pub const AUTO_MODE_NODE_POLICIES: &[&str] = &[
    "AmazonEKSWorkerNodeMinimalPolicy",
    "AmazonEC2ContainerRegistryPullOnly",
];

/// Karpenter node role policies
pub const KARPENTER_NODE_POLICIES: &[&str] = &[
    "AmazonEKS_CNI_Policy",
    "AmazonEKSWorkerNodePolicy",
    "AmazonEC2ContainerRegistryReadOnly",
];

/// Customer-managed CNI policy EKS creates in the account with the first IPv6 cluster
pub const CNI_IPV6_POLICY: &str = "AmazonEKS_CNI_IPv6_Policy";

/// Access policy granted to the cluster creator
pub const CLUSTER_ADMIN_ACCESS_POLICY: &str = "AmazonEKSClusterAdminPolicy";

/// ARNs of the named managed policies in a partition
pub fn managed_policy_arns(partition: &str, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .map(|name| aws_managed_policy(partition, name))
        .collect()
}
