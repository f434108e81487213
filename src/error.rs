//! Error types for Rustform.
//!
//! This module defines the error types used throughout Rustform, providing
//! rich error information for debugging and user feedback. Declaration-level
//! errors (dangling references, cycles, schema violations) are raised before
//! any provider operation runs; provider errors are contained to the failing
//! resource by the apply engine.

use thiserror::Error;

use crate::provider::ProviderError;

/// Result type alias for Rustform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Rustform.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Declaration Errors
    // ========================================================================
    /// A reference names a resource that is not declared.
    #[error("Resource '{referenced_by}' references unknown resource '{resource}'")]
    UnknownResource {
        /// The missing target resource
        resource: String,
        /// The resource whose property bag contains the reference
        referenced_by: String,
    },

    /// Two declarations share the same logical name.
    #[error("Duplicate resource name '{0}'")]
    DuplicateResource(String),

    /// A resource references one of its own output attributes.
    #[error("Resource '{0}' cannot reference itself")]
    SelfReference(String),

    /// The declarations form a dependency cycle.
    #[error("Dependency cycle detected: {}", format_cycle(.0))]
    Cycle(Vec<String>),

    /// A declaration violates its resource kind's schema.
    #[error("Invalid declaration for resource '{resource}': {message}")]
    InvalidDeclaration {
        /// The offending resource
        resource: String,
        /// What is wrong with it
        message: String,
    },

    // ========================================================================
    // Apply Errors
    // ========================================================================
    /// A provider operation failed.
    #[error("Provider operation failed for resource '{resource}': {source}")]
    Provider {
        /// The resource being applied
        resource: String,
        /// The underlying provider error
        #[source]
        source: ProviderError,
    },

    /// A resolver or engine invariant was violated. Always a defect,
    /// never caused by user input.
    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    /// An output attribute was read before its producing resource completed.
    #[error("Output '{resource}.{attribute}' has not been resolved yet")]
    NotYetResolved {
        /// The producing resource
        resource: String,
        /// The attribute that was requested
        attribute: String,
    },

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Format a cycle path for display, closing the loop back to its start.
fn format_cycle(cycle: &[String]) -> String {
    if cycle.is_empty() {
        return "empty cycle".to_string();
    }
    let mut result = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        result.push_str(" -> ");
        result.push_str(first);
    }
    result
}

impl Error {
    /// Creates an unknown-resource error.
    pub fn unknown_resource(
        resource: impl Into<String>,
        referenced_by: impl Into<String>,
    ) -> Self {
        Self::UnknownResource {
            resource: resource.into(),
            referenced_by: referenced_by.into(),
        }
    }

    /// Creates an invalid-declaration error.
    pub fn invalid_declaration(
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidDeclaration {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a provider error wrapped with the resource identity.
    pub fn provider(resource: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            resource: resource.into(),
            source,
        }
    }

    /// Creates an internal consistency error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalConsistency(message.into())
    }

    /// Returns true if this error was caused by the user's declarations
    /// rather than by a provider failure or an engine defect.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownResource { .. }
                | Error::DuplicateResource(_)
                | Error::SelfReference(_)
                | Error::Cycle(_)
                | Error::InvalidDeclaration { .. }
                | Error::YamlParse(_)
                | Error::JsonParse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_closes_loop() {
        let err = Error::Cycle(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: a -> b -> c -> a"
        );
    }

    #[test]
    fn test_user_error_classification() {
        assert!(Error::DuplicateResource("x".into()).is_user_error());
        assert!(Error::unknown_resource("a", "b").is_user_error());
        assert!(!Error::internal("oops").is_user_error());
        assert!(!Error::NotYetResolved {
            resource: "a".into(),
            attribute: "id".into()
        }
        .is_user_error());
    }
}
