//! Interruption event fan-out
//!
//! Four fixed EventBridge rules forward node lifecycle events to the
//! interruption queue, one target per rule.

use serde_json::json;
use tracing::debug;

use eksplan_common::tags::{self, Tags};
use eksplan_common::{Component, Output, Resource, ResourceId, Result};

/// Type token of EventBridge rules
pub const EVENT_RULE_TYPE: &str = "aws:cloudwatch/eventRule:EventRule";
/// Type token of EventBridge targets
pub const EVENT_TARGET_TYPE: &str = "aws:cloudwatch/eventTarget:EventTarget";
/// Target id shared by every rule
pub const QUEUE_TARGET_ID: &str = "KarpenterInterruptionQueueTarget";

/// One event rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterruptionEvent {
    /// Logical key, used in resource ids and names
    pub key: &'static str,
    /// Rule description
    pub description: &'static str,
    /// Event source
    pub source: &'static str,
    /// EventBridge detail type
    pub detail_type: &'static str,
}

/// Events Karpenter reacts to
pub const INTERRUPTION_EVENTS: [InterruptionEvent; 4] = [
    InterruptionEvent {
        key: "HealthEvent",
        description: "Karpenter interrupt - AWS health event",
        source: "aws.health",
        detail_type: "AWS Health Event",
    },
    InterruptionEvent {
        key: "SpotInterrupt",
        description: "Karpenter interrupt - EC2 spot instance interruption warning",
        source: "aws.ec2",
        detail_type: "EC2 Spot Instance Interruption Warning",
    },
    InterruptionEvent {
        key: "InstanceRebalance",
        description: "Karpenter interrupt - EC2 instance rebalance recommendation",
        source: "aws.ec2",
        detail_type: "EC2 Instance Rebalance Recommendation",
    },
    InterruptionEvent {
        key: "InstanceStateChange",
        description: "Karpenter interrupt - EC2 instance state-change notification",
        source: "aws.ec2",
        detail_type: "EC2 Instance State-change Notification",
    },
];

impl InterruptionEvent {
    /// EventBridge pattern as JSON text
    pub fn event_pattern(&self) -> Result<String> {
        Ok(serde_json::to_string(&json!({
            "source": [self.source],
            "detail-type": [self.detail_type],
        }))?)
    }
}

/// A planned rule and its target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedRule {
    /// Rule resource
    pub rule: ResourceId,
    /// Target resource
    pub target: ResourceId,
}

/// Plan every rule and its queue target
///
/// Rule names carry the component name so two installations in one account
/// do not collide.
pub fn plan_event_rules(
    component: &mut Component,
    name: &str,
    queue_arn: &Output<String>,
    component_tags: Option<&Tags>,
) -> Result<Vec<PlannedRule>> {
    INTERRUPTION_EVENTS
        .iter()
        .map(|event| {
            let rule = Resource::new(EVENT_RULE_TYPE, format!("{name}-{}", event.key))
                .set("name", format!("{name}-{}", event.key))
                .set("description", event.description)
                .set("eventPattern", event.event_pattern()?)
                .set_opt("tags", component_tags.map(tags::to_map_value));
            let rule_name = rule.output("name");
            let rule_id = component.add(rule);

            let target = Resource::new(EVENT_TARGET_TYPE, format!("{name}-{}-target", event.key))
                .set_output("rule", rule_name)
                .set_output("arn", queue_arn.clone())
                .set("targetId", QUEUE_TARGET_ID)
                .depends_on(&rule_id);
            let target_id = component.add(target);

            debug!(rule = %rule_id, "planned interruption event rule");
            Ok(PlannedRule {
                rule: rule_id,
                target: target_id,
            })
        })
        .collect()
}
