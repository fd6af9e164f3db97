//! BuildKit composition for eksplan
//!
//! - [`certs`]: a private CA plus server and client certificates for mutual TLS
//! - [`builder`]: the rootless buildkitd StatefulSet and the objects around it

#![deny(missing_docs)]

pub mod builder;
pub mod certs;

pub use builder::{compose_buildkit_builder, BuilderTls, BuildkitBuilderArgs, BuildkitBuilderPlan, PvConfig};
pub use certs::{compose_buildkit_certs, BuildkitCertsArgs, BuildkitCertsPlan, CertSubject, KeyAlgorithm};
