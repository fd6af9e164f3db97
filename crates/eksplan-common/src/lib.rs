//! Common types for eksplan: errors, deferred values, the resource graph and
//! the external lookup seam

#![deny(missing_docs)]

pub mod arn;
pub mod error;
pub mod lookup;
pub mod output;
pub mod resource;
pub mod tags;
pub mod telemetry;

pub use error::Error;
pub use lookup::{AwsEnvironment, CallerIdentity, CloudLookup, ClusterDescription, StaticLookup};
pub use output::Output;
pub use resource::{Component, Deployment, Resource, ResourceId};
pub use tags::Tags;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace that hosts cluster-level controllers
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Audience presented by service account tokens exchanged with STS
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";

/// IAM policy language version used by every generated document
pub const POLICY_VERSION: &str = "2012-10-17";
