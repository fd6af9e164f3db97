//! Desired-state resource graph
//!
//! Components produce [`Resource`] descriptors: a type token understood by the
//! executor, a property bag, and explicit dependency edges. A [`Deployment`]
//! gathers components and computes the order in which the executor should
//! provision them. This layer never diffs state; it only describes it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::output::Output;
use crate::{Error, Result};

/// Unique logical identifier of a resource within a deployment
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create an identifier from a logical name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single desired-state resource handed to the executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Logical identifier, unique within a deployment
    pub id: ResourceId,
    /// Executor type token (e.g., "aws:sqs/queue:Queue")
    #[serde(rename = "type")]
    pub type_token: String,
    /// Desired properties
    pub properties: Map<String, Value>,
    /// Resources that must exist before this one
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<ResourceId>,
}

impl Resource {
    /// Create a resource with no properties
    pub fn new(type_token: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(id),
            type_token: type_token.into(),
            properties: Map::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Set a property from a plain value
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set a property only when a value is present
    pub fn set_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// Set a property from an output, recording its dependencies as edges
    pub fn set_output<V: Into<Value>>(mut self, key: &str, output: Output<V>) -> Self {
        let (value, dependencies) = output.into_parts();
        self.depends_on.extend(dependencies);
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Add an explicit ordering edge
    pub fn depends_on(mut self, id: &ResourceId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }

    /// Reference an attribute of this resource
    pub fn output(&self, attribute: &str) -> Output<String> {
        Output::attribute(&self.id, attribute)
    }

    /// Borrow a property
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A named group of resources produced by one composition function
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component instance name
    pub name: String,
    /// Component type token (e.g., "eksplan:index:Karpenter")
    #[serde(rename = "type")]
    pub type_token: String,
    /// Resources owned by this component
    pub resources: Vec<Resource>,
    /// Exported values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

impl Component {
    /// Create an empty component
    pub fn new(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_token: type_token.into(),
            resources: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource, returning its identifier
    pub fn add(&mut self, resource: Resource) -> ResourceId {
        let id = resource.id.clone();
        self.resources.push(resource);
        id
    }

    /// Export a value
    pub fn export(&mut self, key: &str, value: impl Into<Value>) {
        self.outputs.insert(key.to_string(), value.into());
    }

    /// Find a resource by identifier
    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }

    /// Find the first resource of the given type
    pub fn find_type(&self, type_token: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.type_token == type_token)
    }

    /// All resources of the given type
    pub fn all_of_type<'a>(&'a self, type_token: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.resources
            .iter()
            .filter(move |r| r.type_token == type_token)
    }

    /// Resources outside this component that it depends on
    pub fn external_dependencies(&self) -> BTreeSet<ResourceId> {
        let own: BTreeSet<&ResourceId> = self.resources.iter().map(|r| &r.id).collect();
        self.resources
            .iter()
            .flat_map(|r| r.depends_on.iter())
            .filter(|dep| !own.contains(dep))
            .cloned()
            .collect()
    }
}

/// Every component of one composition pass
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Components in declaration order
    pub components: Vec<Component>,
}

impl Deployment {
    /// Create an empty deployment
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component
    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    /// Iterate over all resources of all components
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.components.iter().flat_map(|c| c.resources.iter())
    }

    /// Check identifiers are unique and every edge points at a known resource
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for resource in self.resources() {
            if !seen.insert(&resource.id) {
                return Err(Error::configuration_for(
                    "deployment",
                    format!("duplicate resource id '{}'", resource.id),
                ));
            }
        }
        for resource in self.resources() {
            for dep in &resource.depends_on {
                if !seen.contains(dep) {
                    return Err(Error::configuration_for(
                        "deployment",
                        format!(
                            "resource '{}' depends on unknown resource '{}'",
                            resource.id, dep
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Dependency-ordered provisioning plan
    ///
    /// Kahn's algorithm with ties broken by declaration order, so the same
    /// inputs always yield the same plan.
    pub fn provisioning_order(&self) -> Result<Vec<&Resource>> {
        self.validate()?;

        let resources: Vec<&Resource> = self.resources().collect();
        let index: BTreeMap<&ResourceId, usize> = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (&r.id, i))
            .collect();

        let mut in_degree: Vec<usize> = resources.iter().map(|r| r.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
        for (i, resource) in resources.iter().enumerate() {
            for dep in &resource.depends_on {
                dependents[index[dep]].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(resources.len());

        while let Some(next) = ready.pop_first() {
            order.push(resources[next]);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != resources.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| resources[i].id.to_string())
                .collect();
            return Err(Error::configuration_for(
                "deployment",
                format!("dependency cycle between: {}", stuck.join(", ")),
            ));
        }

        debug!(resources = order.len(), "computed provisioning order");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn component(resources: Vec<Resource>) -> Component {
        let mut c = Component::new("test:index:Component", "test");
        for r in resources {
            c.add(r);
        }
        c
    }

    #[test]
    fn set_output_records_dependencies() {
        let role = Resource::new("aws:iam/role:Role", "node-role");
        let entry = Resource::new("aws:eks/accessEntry:AccessEntry", "entry")
            .set_output("principalArn", role.output("arn"));

        assert_eq!(entry.property("principalArn"), Some(&json!("${node-role.arn}")));
        assert!(entry.depends_on.contains(&role.id));
    }

    #[test]
    fn set_opt_skips_missing_values() {
        let r = Resource::new("t", "r").set_opt::<String>("name", None);
        assert!(r.property("name").is_none());
    }

    #[test]
    fn provisioning_order_respects_edges() {
        let queue = Resource::new("aws:sqs/queue:Queue", "queue");
        let policy = Resource::new("aws:sqs/queuePolicy:QueuePolicy", "policy")
            .set_output("queueUrl", queue.output("url"));
        let rule = Resource::new("aws:cloudwatch/eventRule:EventRule", "rule");

        let mut deployment = Deployment::new();
        deployment.push(component(vec![policy, rule, queue]));

        let order: Vec<&str> = deployment
            .provisioning_order()
            .unwrap()
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(order, vec!["rule", "queue", "policy"]);
    }

    #[test]
    fn cycles_are_configuration_errors() {
        let a = Resource::new("t", "a").depends_on(&ResourceId::new("b"));
        let b = Resource::new("t", "b").depends_on(&ResourceId::new("a"));
        let mut deployment = Deployment::new();
        deployment.push(component(vec![a, b]));

        let err = deployment.provisioning_order().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn dangling_edges_are_rejected() {
        let a = Resource::new("t", "a").depends_on(&ResourceId::new("missing"));
        let mut deployment = Deployment::new();
        deployment.push(component(vec![a]));

        let err = deployment.validate().unwrap_err();
        assert!(err.to_string().contains("unknown resource 'missing'"));
    }

    #[test]
    fn duplicate_ids_across_components_are_rejected() {
        let mut deployment = Deployment::new();
        deployment.push(component(vec![Resource::new("t", "same")]));
        deployment.push(component(vec![Resource::new("t", "same")]));

        assert!(deployment.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn external_dependencies_exclude_own_resources() {
        let own = Resource::new("t", "own");
        let user = Resource::new("t", "user")
            .depends_on(&own.id)
            .depends_on(&ResourceId::new("cluster"));
        let c = component(vec![own, user]);

        let external = c.external_dependencies();
        assert_eq!(external.len(), 1);
        assert!(external.contains(&ResourceId::new("cluster")));
    }
}
