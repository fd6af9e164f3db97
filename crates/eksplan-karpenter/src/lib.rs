//! Karpenter composition for eksplan
//!
//! - [`queue`]: interruption queue and its resource policy
//! - [`events`]: the fixed EventBridge rule fan-out into the queue
//! - [`helm`]: chart values, Kubernetes provider and release
//! - [`karpenter`]: the component tying roles, queue and release together

#![deny(missing_docs)]

pub mod args;
pub mod events;
pub mod helm;
pub mod karpenter;
pub mod queue;

pub use args::{KarpenterArgs, QueueArgs};
pub use karpenter::{compose_karpenter, compose_karpenter_for, KarpenterPlan};
pub use queue::{QueueDescriptor, QueueEncryption};
