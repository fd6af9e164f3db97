//! Deferred values with explicit dependency tracking
//!
//! An [`Output`] is a value together with the set of resources it was derived
//! from. Attributes of resources that do not exist yet are represented by
//! tokens of the form `${<resource-id>.<attribute>}`; the executor substitutes
//! them once the resource is provisioned. A token may carry a literal prefix to
//! drop from the value, `${<resource-id>.<attribute>#<prefix>}`, which is how
//! scheme-less URLs are derived from attributes only known later. Combining
//! outputs never blocks: the combinators simply carry the union of
//! dependencies forward.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::resource::ResourceId;
use crate::{Error, Result};

const TOKEN_OPEN: &str = "${";
const TOKEN_CLOSE: char = '}';
const TRIM_PREFIX: char = '#';

/// A value plus the resources it depends on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output<T> {
    value: T,
    dependencies: BTreeSet<ResourceId>,
}

impl<T> Output<T> {
    /// A value that depends on nothing
    pub fn known(value: T) -> Self {
        Self {
            value,
            dependencies: BTreeSet::new(),
        }
    }

    /// Borrow the value
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Take the value, dropping dependency information
    pub fn into_value(self) -> T {
        self.value
    }

    /// Resources this value was derived from
    pub fn dependencies(&self) -> &BTreeSet<ResourceId> {
        &self.dependencies
    }

    /// Split into value and dependencies
    pub fn into_parts(self) -> (T, BTreeSet<ResourceId>) {
        (self.value, self.dependencies)
    }

    /// Record an extra dependency without changing the value
    ///
    /// Used when a value must not be consumed before some other resource
    /// exists, even though the value itself does not mention it.
    pub fn with_dependency(mut self, id: &ResourceId) -> Self {
        self.dependencies.insert(id.clone());
        self
    }

    /// Derive a new value, keeping dependencies
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Output<U> {
        Output {
            value: f(self.value),
            dependencies: self.dependencies,
        }
    }

    /// Derive a new value with a fallible function, keeping dependencies
    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Output<U>> {
        Ok(Output {
            value: f(self.value)?,
            dependencies: self.dependencies,
        })
    }

    /// Combine two outputs into one derived value
    pub fn zip<U>(self, other: Output<U>) -> Output<(T, U)> {
        let mut dependencies = self.dependencies;
        dependencies.extend(other.dependencies);
        Output {
            value: (self.value, other.value),
            dependencies,
        }
    }

    /// Combine any number of outputs into one list
    pub fn all(outputs: impl IntoIterator<Item = Output<T>>) -> Output<Vec<T>> {
        let mut values = Vec::new();
        let mut dependencies = BTreeSet::new();
        for output in outputs {
            values.push(output.value);
            dependencies.extend(output.dependencies);
        }
        Output {
            value: values,
            dependencies,
        }
    }
}

impl<T: Serialize> Output<T> {
    /// Serialize the value into JSON, keeping dependencies
    pub fn to_json(&self) -> Result<Output<serde_json::Value>> {
        Ok(Output {
            value: serde_json::to_value(&self.value)?,
            dependencies: self.dependencies.clone(),
        })
    }
}

impl Output<String> {
    /// Reference an attribute of a resource that is provisioned by the executor
    pub fn attribute(id: &ResourceId, attribute: &str) -> Self {
        Self {
            value: token(id, attribute),
            dependencies: BTreeSet::from([id.clone()]),
        }
    }

    /// Reference an attribute with a literal prefix removed
    ///
    /// The prefix is dropped only when the provisioned value starts with it.
    pub fn attribute_without_prefix(id: &ResourceId, attribute: &str, prefix: &str) -> Self {
        Self {
            value: format!("${{{id}.{attribute}{TRIM_PREFIX}{prefix}}}"),
            dependencies: BTreeSet::from([id.clone()]),
        }
    }

    /// True if the value still contains executor tokens
    pub fn is_pending(&self) -> bool {
        contains_token(&self.value)
    }

    /// Borrow the string value
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T> From<T> for Output<T> {
    fn from(value: T) -> Self {
        Output::known(value)
    }
}

impl From<&str> for Output<String> {
    fn from(value: &str) -> Self {
        Output::known(value.to_string())
    }
}

/// Render the executor token for a resource attribute
pub fn token(id: &ResourceId, attribute: &str) -> String {
    format!("${{{}.{}}}", id, attribute)
}

/// True if `value` contains an executor token
pub fn contains_token(value: &str) -> bool {
    value
        .find(TOKEN_OPEN)
        .is_some_and(|start| value[start..].contains('}'))
}

/// Replace every executor token in `value` with the attribute it names
///
/// `resolve` receives the resource id and attribute of each token; a prefix
/// carried by the token is removed from the resolved value. A token that
/// cannot be resolved is a lookup error.
pub fn substitute(
    value: &str,
    mut resolve: impl FnMut(&ResourceId, &str) -> Option<String>,
) -> Result<String> {
    let mut rendered = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find(TOKEN_OPEN) {
        let body = &rest[start + TOKEN_OPEN.len()..];
        let Some(end) = body.find(TOKEN_CLOSE) else {
            break;
        };
        rendered.push_str(&rest[..start]);

        let reference = &body[..end];
        let (reference, prefix) = match reference.split_once(TRIM_PREFIX) {
            Some((reference, prefix)) => (reference, Some(prefix)),
            None => (reference, None),
        };
        let (id, attribute) = reference
            .split_once('.')
            .ok_or_else(|| Error::lookup(reference, "executor token has no attribute"))?;
        let id = ResourceId::new(id);
        let resolved = resolve(&id, attribute).ok_or_else(|| {
            Error::lookup(id.as_str(), format!("attribute {attribute} is unresolved"))
        })?;
        let trimmed = match prefix {
            Some(prefix) => resolved.strip_prefix(prefix).unwrap_or(&resolved),
            None => &resolved,
        };
        rendered.push_str(trimmed);
        rest = &body[end + 1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}
