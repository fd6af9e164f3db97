//! Error types for desired-state composition
//!
//! Errors are structured with fields so the executor can report exactly which
//! component and input were at fault. Composition never retries: every error
//! is a precondition failure the caller has to fix before planning again.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for composition
#[derive(Debug, Error)]
pub enum Error {
    /// Inputs are missing, out of range, or mutually exclusive
    #[error("configuration error for {component}: {message}")]
    Configuration {
        /// Component whose inputs are invalid (e.g., "karpenter", "cluster")
        component: String,
        /// Description of what's invalid
        message: String,
        /// The invalid input path (e.g., "queue.managedSseEnabled")
        field: Option<String>,
    },

    /// An external descriptive query returned an empty or unusable answer
    #[error("lookup error for {resource}: {message}")]
    Lookup {
        /// The resource that was queried (e.g., "cluster/prod")
        resource: String,
        /// Description of what was missing
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create a configuration error without component context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            component: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error with component context
    pub fn configuration_for(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error with component context and input path
    pub fn configuration_for_field(
        component: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            component: component.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a lookup error for the queried resource
    pub fn lookup(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Lookup {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// True for mutually exclusive or missing inputs
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// True when an external query came back empty
    pub fn is_lookup(&self) -> bool {
        matches!(self, Error::Lookup { .. })
    }

    /// Get the offending input path if this is a configuration error
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Configuration { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// Get the component name if this error is associated with one
    pub fn component(&self) -> Option<&str> {
        match self {
            Error::Configuration { component, .. } => Some(component),
            Error::Lookup { .. } => None,
            Error::Serialization { .. } => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: conflicting queue encryption inputs are rejected before planning
    #[test]
    fn story_configuration_error_names_the_conflicting_input() {
        let err = Error::configuration_for_field(
            "karpenter",
            "queue.managedSseEnabled",
            "kmsMasterKeyId and kmsDataKeyReusePeriodSeconds must not be set",
        );
        assert!(err.is_configuration());
        assert!(!err.is_lookup());
        assert_eq!(err.field(), Some("queue.managedSseEnabled"));
        assert_eq!(err.component(), Some("karpenter"));
        assert!(err.to_string().contains("configuration error for karpenter"));
    }

    /// Story: a cluster without an OIDC provider cannot back IRSA trust
    #[test]
    fn story_lookup_error_names_the_queried_resource() {
        let err = Error::lookup("cluster/prod", "no OIDC issuers found");
        assert!(err.is_lookup());
        assert_eq!(err.component(), None);
        assert_eq!(err.field(), None);
        assert_eq!(
            err.to_string(),
            "lookup error for cluster/prod: no OIDC issuers found"
        );
    }

    #[test]
    fn configuration_without_context_uses_unknown() {
        match Error::configuration("missing vpcConfig") {
            Error::Configuration {
                component, field, ..
            } => {
                assert_eq!(component, UNKNOWN_CONTEXT);
                assert!(field.is_none());
            }
            _ => panic!("Expected Configuration variant"),
        }
    }

    #[test]
    fn serialization_error_keeps_kind() {
        let err = Error::serialization_for_kind("PolicyDocument", "bad value");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("PolicyDocument")),
            _ => panic!("Expected Serialization variant"),
        }
        assert!(err.to_string().contains("serialization error"));
    }

    #[test]
    fn serde_json_errors_convert() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
