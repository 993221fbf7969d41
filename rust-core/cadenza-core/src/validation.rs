//! # Validation Module
//!
//! Structured validation errors plus the validator collaborator the router
//! consults after binding a value object.
//!
//! Value objects describe their own constraints through [`Validate`]; the
//! [`Validator`] registered in the container decides how those constraints
//! are evaluated. [`ConstraintValidator`] is the stock implementation.

use serde::Serialize;
use std::any::Any;

/// Container identifier under which the router looks up its [`Validator`]
pub const VALIDATOR_SERVICE: &str = "cadenza.validator";

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Required field is missing
    Required,
    /// Value is invalid type
    InvalidType,
    /// Value is too short
    TooShort,
    /// Value is too long
    TooLong,
    /// Value is below minimum
    TooSmall,
    /// Value doesn't match pattern
    InvalidFormat,
    /// Custom validation failed
    Custom,
}

/// A single validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Field path (e.g., "email", "user.address.city")
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code
    pub code: ValidationCode,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    /// Create a "required field" error
    pub fn required(field: impl Into<String>) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} is required"),
            field: field_str,
            code: ValidationCode::Required,
        }
    }

    /// Create an "invalid type" error
    pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be {expected}"),
            field: field_str,
            code: ValidationCode::InvalidType,
        }
    }

    /// Create a "too short" error
    pub fn too_short(field: impl Into<String>, min: usize) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be at least {min} characters"),
            field: field_str,
            code: ValidationCode::TooShort,
        }
    }

    /// Create a "too long" error
    pub fn too_long(field: impl Into<String>, max: usize) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be at most {max} characters"),
            field: field_str,
            code: ValidationCode::TooLong,
        }
    }

    /// Create a "below minimum" error
    pub fn too_small(field: impl Into<String>, min: i64) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be at least {min}"),
            field: field_str,
            code: ValidationCode::TooSmall,
        }
    }

    /// Create an "invalid format" error
    pub fn invalid_format(field: impl Into<String>, expected: &str) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be a valid {expected}"),
            field: field_str,
            code: ValidationCode::InvalidFormat,
        }
    }
}

/// Collection of validation errors
///
/// Allows aggregating multiple field errors for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    /// List of field-level errors
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field error
    pub fn add(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Add a required field error
    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(FieldError::required(field));
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// All `field: message` pairs joined with `" | "`
    #[must_use]
    pub fn joined(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Constraints a value object declares about itself
///
/// The default implementation declares none.
pub trait Validate {
    /// Push one [`FieldError`] per violated constraint
    fn validate(&self, _errors: &mut ValidationErrors) {}
}

/// A record bound from request data and handed to a handler
///
/// Implemented for every `Validate + Send + 'static` type.
pub trait ValueObject: Validate + Any + Send {
    /// Erase into `Any` so the handler can take it back by concrete type
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Validate + Any + Send> ValueObject for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// External validation collaborator
///
/// An empty result means the value object is valid.
pub trait Validator: Send + Sync {
    /// Evaluate `object` and report every violation
    fn validate(&self, object: &dyn ValueObject) -> ValidationErrors;
}

/// Validator that evaluates the constraints declared by the value object
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstraintValidator;

impl Validator for ConstraintValidator {
    fn validate(&self, object: &dyn ValueObject) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        object.validate(&mut errors);
        errors
    }
}
