//! IAM policy composition for eksplan
//!
//! - [`document`]: policy document model and JSON rendering
//! - [`trust`]: IRSA and service-principal trust policies
//! - [`access`]: table-driven least-privilege access policies
//! - [`role`]: role descriptors and borrowed-or-managed resolution

#![deny(missing_docs)]

pub mod access;
pub mod document;
pub mod managed;
pub mod role;
pub mod trust;

pub use document::{ComparisonOperator, Condition, Effect, PolicyDocument, PrincipalType, Statement};
pub use role::{resolve_role, RoleArgs, RoleDescriptor};
pub use trust::ServiceAccountRef;
