//! # Error Handling
//!
//! Centralized error taxonomy for the Cadenza runtime.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Registration mistakes (`Configuration`, `CircularDependency`) are meant to
//! fail loudly; `Validation` and `NotFound` are expected, client-triggerable
//! outcomes; `InternalDispatch` wraps whatever went wrong inside a handler.

use crate::validation::ValidationErrors;
use thiserror::Error;

/// Result type alias for Cadenza operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons the container could not produce an instance
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Identifier has no definition and names no known type
    #[error("Service or type not found: {id}")]
    ServiceNotFound {
        /// The identifier that was requested
        id: String,
    },

    /// Type is known but cannot be constructed (abstract)
    #[error("Cannot instantiate {type_name}")]
    NotInstantiable {
        /// The abstract type name
        type_name: String,
    },

    /// A constructor parameter has neither a service to inject nor a default
    #[error("Cannot resolve parameter ${parameter} in {type_name}")]
    UnresolvableParameter {
        /// The type being constructed
        type_name: String,
        /// The offending parameter name
        parameter: String,
    },

    /// Instance exists but is not of the requested Rust type
    #[error("Service {id} is not a {expected}")]
    TypeMismatch {
        /// The identifier that was resolved
        id: String,
        /// The Rust type the caller asked for
        expected: &'static str,
    },

    /// Constructor asked for an argument position that was never resolved
    #[error("Constructor of {type_name} has no argument at position {index}")]
    MissingArgument {
        /// The type being constructed
        type_name: String,
        /// Requested position
        index: usize,
    },
}

/// Core error types for the Cadenza runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Container failed to build an instance
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Dependency graph revisited an identifier that was still being built
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency {
        /// Identifiers in resolution order, ending with the repeated one
        chain: Vec<String>,
    },

    /// Route, parameter or middleware declarations are structurally invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong with the declaration
        message: String,
    },

    /// A bound value object failed validation
    #[error("{}", .0.joined())]
    Validation(ValidationErrors),

    /// No route matched the request
    #[error("No route found for {method} {path}")]
    NotFound {
        /// Request method
        method: String,
        /// Request path (query string stripped)
        path: String,
    },

    /// Anything else raised while resolving or invoking a handler
    #[error("Dispatch to {action} failed: {source}")]
    InternalDispatch {
        /// `Controller::action` that was being dispatched
        action: String,
        /// The original cause
        #[source]
        source: anyhow::Error,
    },

    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    Bind {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a configuration error from any message
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// HTTP status class this error converts to at the response boundary
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::PayloadTooLarge { .. } => 413,
            _ => 500,
        }
    }

    /// Whether this error is a client-triggerable outcome rather than a fault
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldError;

    #[test]
    fn test_not_found_error() {
        let err = Error::NotFound {
            method: "GET".to_string(),
            path: "/unknown".to_string(),
        };
        assert!(err.to_string().contains("/unknown"));
        assert_eq!(err.status(), 404);
        assert!(err.is_client_error());
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::Bind {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_circular_chain_display() {
        let err = Error::CircularDependency {
            chain: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: A -> B -> A");
    }

    #[test]
    fn test_validation_error_joins_messages() {
        let mut errors = ValidationErrors::new();
        errors.add(FieldError::required("email"));
        errors.add(FieldError::too_short("name", 3));
        let err = Error::Validation(errors);

        assert_eq!(
            err.to_string(),
            "email: email is required | name: name must be at least 3 characters"
        );
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_internal_dispatch_keeps_cause() {
        let err = Error::InternalDispatch {
            action: "Users::show".to_string(),
            source: anyhow::anyhow!("database offline"),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("database offline"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_resolution_is_transparent() {
        let err: Error = ResolutionError::ServiceNotFound { id: "Mailer".into() }.into();
        assert_eq!(err.to_string(), "Service or type not found: Mailer");
    }
}
