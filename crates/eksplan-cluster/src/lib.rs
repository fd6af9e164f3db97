//! EKS cluster composition for eksplan
//!
//! - [`cluster`]: the cluster component and the roles and key it needs
//! - [`handle`]: references to existing or planned clusters
//! - [`kubeconfig`]: kubeconfig derivation for the Helm and Kubernetes providers
//! - [`irsa`]: IAM roles for service accounts

#![deny(missing_docs)]

pub mod addons;
pub mod args;
pub mod cluster;
pub mod handle;
pub mod irsa;
pub mod kubeconfig;
pub mod network;

pub use args::ClusterArgs;
pub use cluster::{compose_cluster, ClusterPlan};
pub use handle::ClusterHandle;
pub use irsa::{compose_irsa_role, compose_irsa_role_for, IrsaRoleArgs, IrsaRolePlan};
pub use kubeconfig::{build_kubeconfig, compose_kubeconfig, Kubeconfig, KubeconfigPlan};
