//! # Parameter Types and Coercion
//!
//! Declared parameter kinds and the dynamic values bound from URL captures,
//! constructor defaults and handler arguments.
//!
//! URL captures are untyped text; [`coerce`] turns numeric text into numbers
//! and leaves everything else alone, [`coerce_list`] does the same for
//! comma-separated aggregates.

use serde::Serialize;
use std::fmt;

/// Declared kind of a constructor or handler parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ParamKind {
    /// No declared type
    #[default]
    Untyped,
    /// Builtin scalar (int, float, string, bool)
    Scalar,
    /// Builtin list-like aggregate
    Aggregate,
    /// Non-builtin type, identified by name
    Class(String),
}

impl ParamKind {
    /// Builtin kinds are bound positionally from the URL
    #[must_use]
    pub const fn is_builtin(&self) -> bool {
        !matches!(self, Self::Class(_))
    }

    /// Get the kind name for error messages
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Untyped => "mixed",
            Self::Scalar => "scalar",
            Self::Aggregate => "array",
            Self::Class(name) => name,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Dynamic parameter value
///
/// Serializes untagged, so a bound argument list renders as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum ParamValue {
    /// Absent / null default
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (i64)
    Int(i64),
    /// Float value (f64)
    Float(f64),
    /// Text left as-is
    String(String),
    /// Aggregate of coerced elements
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Get the value as a string
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => items
                .iter()
                .map(Self::as_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Borrow as `&str` if String variant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64 if Int variant
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64; integers widen
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow elements if List variant
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Whether `raw` is a plain decimal number: sign, digits, optional
/// fraction, optional exponent
fn is_numeric(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;

    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return false;
    }

    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if i < bytes.len() && matches!(bytes[i], b'+' | b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

/// Coerce a single raw capture
///
/// - numeric with a `.` → `Float`
/// - other numeric values, exponent forms included → `Int` when the value is
///   integral and fits in i64, else `Float`
/// - anything else stays `String`
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
pub fn coerce(raw: &str) -> ParamValue {
    if !is_numeric(raw) {
        return ParamValue::String(raw.to_string());
    }
    let fractional = raw.contains('.');
    if !fractional {
        if let Ok(i) = raw.parse::<i64>() {
            return ParamValue::Int(i);
        }
    }
    let Ok(f) = raw.parse::<f64>() else {
        return ParamValue::String(raw.to_string());
    };
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
    if !fractional && f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        return ParamValue::Int(f as i64);
    }
    ParamValue::Float(f)
}

/// Coerce a comma-separated aggregate capture
///
/// Elements are trimmed, empties dropped, each element coerced.
#[must_use]
pub fn coerce_list(raw: &str) -> ParamValue {
    ParamValue::List(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(coerce)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_integer() {
        assert_eq!(coerce("7"), ParamValue::Int(7));
        assert_eq!(coerce("-456"), ParamValue::Int(-456));
        assert_eq!(coerce("+12"), ParamValue::Int(12));
    }

    #[test]
    fn test_coerce_float() {
        assert_eq!(coerce("3.5"), ParamValue::Float(3.5));
        assert_eq!(coerce(".5"), ParamValue::Float(0.5));
        assert_eq!(coerce("1.5e3"), ParamValue::Float(1500.0));
        assert_eq!(coerce("2.0"), ParamValue::Float(2.0));
    }

    #[test]
    fn test_coerce_integral_exponent_is_integer() {
        assert_eq!(coerce("1e3"), ParamValue::Int(1000));
        assert_eq!(coerce("-2E2"), ParamValue::Int(-200));
        assert_eq!(coerce("5e-1"), ParamValue::Float(0.5));
        assert_eq!(coerce("1e30"), ParamValue::Float(1e30));
        assert_eq!(
            coerce_list("2e1,x"),
            ParamValue::List(vec![ParamValue::Int(20), ParamValue::from("x")])
        );
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(coerce("v7"), ParamValue::String("v7".into()));
        assert_eq!(coerce("1.2.3"), ParamValue::String("1.2.3".into()));
        assert_eq!(coerce("NaN"), ParamValue::String("NaN".into()));
        assert_eq!(coerce("inf"), ParamValue::String("inf".into()));
        assert_eq!(coerce("-"), ParamValue::String("-".into()));
        assert_eq!(coerce("1e"), ParamValue::String("1e".into()));
        assert_eq!(coerce(""), ParamValue::String(String::new()));
    }

    #[test]
    fn test_coerce_overflowing_integer_becomes_float() {
        assert_eq!(
            coerce("99999999999999999999"),
            ParamValue::Float(99_999_999_999_999_999_999.0)
        );
    }

    #[test]
    fn test_coerce_list() {
        assert_eq!(
            coerce_list("go, rust,,1, 2.5 "),
            ParamValue::List(vec![
                ParamValue::from("go"),
                ParamValue::from("rust"),
                ParamValue::Int(1),
                ParamValue::Float(2.5),
            ])
        );
        assert_eq!(coerce_list(",,"), ParamValue::List(Vec::new()));
    }

    #[test]
    fn test_param_value_as_string() {
        assert_eq!(ParamValue::Int(42).as_string(), "42");
        assert_eq!(ParamValue::Float(3.25).as_string(), "3.25");
        assert_eq!(ParamValue::Bool(true).as_string(), "true");
        assert_eq!(coerce_list("a,b").as_string(), "a,b");
    }

    #[test]
    fn test_param_value_serializes_untagged() {
        let value = ParamValue::List(vec![ParamValue::Int(1), ParamValue::from("x"), ParamValue::Null]);
        assert_eq!(serde_json::to_string(&value).ok().as_deref(), Some(r#"[1,"x",null]"#));
    }

    #[test]
    fn test_param_kind_builtin() {
        assert!(ParamKind::Scalar.is_builtin());
        assert!(ParamKind::Aggregate.is_builtin());
        assert!(ParamKind::Untyped.is_builtin());
        assert!(!ParamKind::Class("Dto".into()).is_builtin());
        assert_eq!(ParamKind::Aggregate.to_string(), "array");
    }
}
