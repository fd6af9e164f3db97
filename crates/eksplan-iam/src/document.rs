//! IAM policy document model and JSON rendering
//!
//! Statements are built with a small fluent API and rendered into the standard
//! policy grammar (`Version`, `Statement[]` with `Sid`, `Effect`, `Principal`,
//! `Action`, `Resource`, `Condition`). Rendering follows the usual IAM
//! conventions: single-element lists collapse to a string, and conditions that
//! share an operator and key are merged into one value list (any-of).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use eksplan_common::{Error, Result, POLICY_VERSION};

/// Whether a statement grants or denies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Grant the actions
    Allow,
    /// Deny the actions; always wins over an allow
    Deny,
}

impl Effect {
    /// Policy grammar value
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// Kind of principal a trust or resource policy names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalType {
    /// An AWS service (e.g., "ec2.amazonaws.com")
    Service,
    /// A federated identity provider (e.g., an OIDC provider ARN)
    Federated,
    /// An IAM account, user or role
    Aws,
    /// Everyone
    Any,
}

impl PrincipalType {
    /// Policy grammar key
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::Service => "Service",
            PrincipalType::Federated => "Federated",
            PrincipalType::Aws => "AWS",
            PrincipalType::Any => "*",
        }
    }
}

/// A principal block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Principal kind
    pub kind: PrincipalType,
    /// Identifiers of that kind
    pub identifiers: Vec<String>,
}

/// Condition operators used by generated documents
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Exact string match
    StringEquals,
    /// Glob match
    StringLike,
    /// Exact match when the key is present
    StringEqualsIfExists,
    /// Every value in the request is in the list
    ForAllValuesStringEquals,
    /// Boolean match
    Bool,
}

impl ComparisonOperator {
    /// Policy grammar operator
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::StringEquals => "StringEquals",
            ComparisonOperator::StringLike => "StringLike",
            ComparisonOperator::StringEqualsIfExists => "StringEqualsIfExists",
            ComparisonOperator::ForAllValuesStringEquals => "ForAllValues:StringEquals",
            ComparisonOperator::Bool => "Bool",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One condition: `test(variable, values)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    /// Operator
    pub test: ComparisonOperator,
    /// Condition key (e.g., "aws:SecureTransport")
    pub variable: String,
    /// Accepted values; any one may match
    pub values: Vec<String>,
}

impl Condition {
    /// Create a condition
    pub fn new(
        test: ComparisonOperator,
        variable: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            test,
            variable: variable.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// One policy statement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    /// Statement id, unique within a document when present
    pub sid: Option<String>,
    /// Allow or deny
    pub effect: Effect,
    /// Principals (trust and resource policies only)
    pub principals: Vec<Principal>,
    /// Actions
    pub actions: Vec<String>,
    /// Resource ARNs or patterns (identity and resource policies only)
    pub resources: Vec<String>,
    /// Conditions, all of which must hold
    pub conditions: Vec<Condition>,
}

impl Statement {
    /// Empty statement with the given effect
    pub fn new(effect: Effect) -> Self {
        Self {
            sid: None,
            effect,
            principals: Vec::new(),
            actions: Vec::new(),
            resources: Vec::new(),
            conditions: Vec::new(),
        }
    }

    /// Empty allow statement
    pub fn allow() -> Self {
        Self::new(Effect::Allow)
    }

    /// Empty deny statement
    pub fn deny() -> Self {
        Self::new(Effect::Deny)
    }

    /// Set the statement id
    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Add actions
    pub fn actions(mut self, actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    /// Add resources
    pub fn resources(mut self, resources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.resources.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Add a principal block
    pub fn principal(
        mut self,
        kind: PrincipalType,
        identifiers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.principals.push(Principal {
            kind,
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add a condition
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Conditions on the given key
    pub fn conditions_on<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a Condition> {
        self.conditions.iter().filter(move |c| c.variable == variable)
    }

    fn to_value(&self) -> Value {
        let mut out = Map::new();
        if let Some(sid) = &self.sid {
            out.insert("Sid".to_string(), Value::from(sid.as_str()));
        }
        out.insert("Effect".to_string(), Value::from(self.effect.as_str()));
        if !self.principals.is_empty() {
            out.insert("Principal".to_string(), render_principals(&self.principals));
        }
        if !self.actions.is_empty() {
            out.insert("Action".to_string(), one_or_many(&self.actions));
        }
        if !self.resources.is_empty() {
            out.insert("Resource".to_string(), one_or_many(&self.resources));
        }
        if !self.conditions.is_empty() {
            out.insert("Condition".to_string(), render_conditions(&self.conditions));
        }
        Value::Object(out)
    }
}

/// A complete policy document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyDocument {
    statements: Vec<Statement>,
}

impl PolicyDocument {
    /// Build a document, rejecting duplicate statement ids
    pub fn new(statements: Vec<Statement>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for sid in statements.iter().filter_map(|s| s.sid.as_deref()) {
            if !seen.insert(sid) {
                return Err(Error::configuration_for(
                    "iam",
                    format!("duplicate statement sid '{sid}'"),
                ));
            }
        }
        Ok(Self { statements })
    }

    /// Statements in order
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Statement with the given id
    pub fn statement(&self, sid: &str) -> Option<&Statement> {
        self.statements
            .iter()
            .find(|s| s.sid.as_deref() == Some(sid))
    }

    /// Policy grammar JSON value
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("Version".to_string(), Value::from(POLICY_VERSION));
        out.insert(
            "Statement".to_string(),
            Value::Array(self.statements.iter().map(Statement::to_value).collect()),
        );
        Value::Object(out)
    }

    /// Policy grammar JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.to_value())
            .map_err(|e| Error::serialization_for_kind("PolicyDocument", e.to_string()))
    }
}

fn one_or_many(values: &[String]) -> Value {
    match values {
        [single] => Value::from(single.as_str()),
        many => Value::Array(many.iter().map(|v| Value::from(v.as_str())).collect()),
    }
}

fn push_unique(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

fn render_principals(principals: &[Principal]) -> Value {
    if principals.iter().any(|p| p.kind == PrincipalType::Any) {
        return Value::from("*");
    }
    let mut grouped: Vec<(PrincipalType, Vec<String>)> = Vec::new();
    for principal in principals {
        match grouped.iter_mut().find(|(kind, _)| *kind == principal.kind) {
            Some((_, ids)) => push_unique(ids, &principal.identifiers),
            None => grouped.push((principal.kind, principal.identifiers.clone())),
        }
    }
    Value::Object(
        grouped
            .into_iter()
            .map(|(kind, ids)| (kind.as_str().to_string(), one_or_many(&ids)))
            .collect(),
    )
}

fn render_conditions(conditions: &[Condition]) -> Value {
    let mut by_operator: Vec<(ComparisonOperator, Vec<(String, Vec<String>)>)> = Vec::new();
    for condition in conditions {
        let index = match by_operator.iter().position(|(op, _)| *op == condition.test) {
            Some(index) => index,
            None => {
                by_operator.push((condition.test, Vec::new()));
                by_operator.len() - 1
            }
        };
        let keys = &mut by_operator[index].1;
        match keys.iter_mut().find(|(var, _)| *var == condition.variable) {
            Some((_, values)) => push_unique(values, &condition.values),
            None => keys.push((condition.variable.clone(), condition.values.clone())),
        }
    }

    Value::Object(
        by_operator
            .into_iter()
            .map(|(op, keys)| {
                let keys: Map<String, Value> = keys
                    .into_iter()
                    .map(|(var, values)| (var, one_or_many(&values)))
                    .collect();
                (op.as_str().to_string(), Value::Object(keys))
            })
            .collect(),
    )
}
