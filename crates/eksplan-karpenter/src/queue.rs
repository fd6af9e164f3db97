//! Interruption queue and its resource policy

use tracing::{debug, warn};

use eksplan_common::tags::{self, Tags};
use eksplan_common::{Component, Output, Resource, ResourceId, Result};
use eksplan_iam::access::interruption_queue_policy;

use crate::args::QueueArgs;

/// Type token of SQS queues
pub const QUEUE_TYPE: &str = "aws:sqs/queue:Queue";
/// Type token of SQS queue policies
pub const QUEUE_POLICY_TYPE: &str = "aws:sqs/queuePolicy:QueuePolicy";

/// How queue messages are encrypted at rest
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueEncryption {
    /// SQS-owned keys
    ManagedSse,
    /// A customer KMS key
    CustomerKms {
        /// Key id or alias
        key_id: Option<String>,
        /// Data key reuse period in seconds
        reuse_period_seconds: Option<u32>,
    },
}

/// A validated queue, ready to become a resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueDescriptor {
    /// Queue name; generated by the executor when unset
    pub name: Option<String>,
    /// Encryption mode
    pub encryption: QueueEncryption,
    /// Tags
    pub tags: Option<Tags>,
}

impl QueueDescriptor {
    /// Validate queue settings and pick the encryption mode
    ///
    /// Managed SSE wins when requested or when no KMS setting is given.
    pub fn from_args(args: Option<&QueueArgs>, component_tags: Option<&Tags>) -> Result<Self> {
        let default_args = QueueArgs::default();
        let args = args.unwrap_or(&default_args);
        args.validate()?;

        let kms_key = args.kms_master_key_id.clone().filter(|k| !k.is_empty());
        let encryption = match (args.managed_sse_enabled, &kms_key, args.kms_data_key_reuse_period_seconds) {
            (Some(true), _, _) => QueueEncryption::ManagedSse,
            (_, None, None) => {
                if args.managed_sse_enabled.is_none() {
                    warn!("queue encryption unset, defaulting to SQS managed SSE pending product-owner confirmation");
                }
                QueueEncryption::ManagedSse
            }
            (_, key_id, reuse_period_seconds) => QueueEncryption::CustomerKms {
                key_id: key_id.clone(),
                reuse_period_seconds,
            },
        };

        Ok(Self {
            name: args.name.clone(),
            encryption,
            tags: tags::merge(component_tags, args.tags.as_ref()),
        })
    }

    /// True when messages use SQS-owned keys
    pub fn managed_sse(&self) -> bool {
        self.encryption == QueueEncryption::ManagedSse
    }

    /// Queue resource
    pub fn to_resource(&self, id: &str) -> Resource {
        let (key_id, reuse) = match &self.encryption {
            QueueEncryption::ManagedSse => (None, None),
            QueueEncryption::CustomerKms {
                key_id,
                reuse_period_seconds,
            } => (key_id.clone(), *reuse_period_seconds),
        };
        Resource::new(QUEUE_TYPE, id)
            .set_opt("name", self.name.clone())
            .set("sqsManagedSseEnabled", self.managed_sse())
            .set_opt("kmsMasterKeyId", key_id)
            .set_opt("kmsDataKeyReusePeriodSeconds", reuse)
            .set_opt("tags", self.tags.as_ref().map(tags::to_map_value))
    }
}

/// The planned queue and how to refer to it
#[derive(Clone, Debug)]
pub struct InterruptionQueue {
    /// Queue resource
    pub queue: ResourceId,
    /// Queue policy resource
    pub policy: ResourceId,
    /// Queue ARN, usable once the policy is in place
    pub arn: Output<String>,
    /// Queue name
    pub name: Output<String>,
}

/// Plan the queue and its policy
///
/// Consumers of the ARN wait for the policy so nothing delivers to the
/// queue before the event services are allowed to.
pub fn plan_interruption_queue(
    component: &mut Component,
    name: &str,
    descriptor: &QueueDescriptor,
    dns_suffix: &str,
) -> Result<InterruptionQueue> {
    let queue = descriptor.to_resource(&format!("{name}-queue"));
    let queue_arn = queue.output("arn");
    let queue_url = queue.output("url");
    let queue_name = queue.output("name");
    let queue_id = component.add(queue);

    let document = queue_arn
        .clone()
        .try_map(|arn| interruption_queue_policy(&arn, dns_suffix)?.to_json())?;
    let policy = Resource::new(QUEUE_POLICY_TYPE, format!("{name}-queue-policy"))
        .set_output("queueUrl", queue_url)
        .set_output("policy", document);
    let policy_id = component.add(policy);

    debug!(queue = %queue_id, managed_sse = descriptor.managed_sse(), "planned interruption queue");
    Ok(InterruptionQueue {
        queue: queue_id,
        arn: queue_arn.with_dependency(&policy_id),
        policy: policy_id,
        name: queue_name,
    })
}
