//! # HTTP Response
//!
//! Final structured result of a dispatch, and the error sink that turns an
//! [`Error`] into a `{"error": {"code", "message", "details"}}` body.
//!
//! Internal failures only expose their cause when `debug` is on; the toggle
//! is evaluated here and nowhere else.

use crate::error::Error;
use serde_json::{json, Value};
use std::backtrace::BacktraceStatus;
use std::collections::HashMap;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Response headers
    pub headers: HashMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            headers: HashMap::new(),
        }
    }
}

impl Response {
    /// Create a JSON response from an already serialized body
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Create a text response
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: "text/plain; charset=utf-8".to_string(),
            ..Self::default()
        }
    }

    /// Empty response with `status`
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// 200 response carrying `value` as JSON
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self::json(value.to_string())
    }

    /// Error body with no details
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::error_with_details(status, message, Value::Null)
    }

    fn error_with_details(status: u16, message: &str, details: Value) -> Self {
        let body = json!({
            "error": {
                "code": status,
                "message": message,
                "details": details,
            }
        });
        Self::json(body.to_string()).with_status(status)
    }

    /// Convert a dispatch failure into its error response
    #[must_use]
    pub fn from_error(err: &Error, debug: bool) -> Self {
        let status = err.status();
        match err {
            Error::Validation(errors) => {
                Self::error_with_details(status, &errors.joined(), json!(errors.errors))
            }
            Error::NotFound { .. } => Self::error(status, "Route not found"),
            _ if err.is_client_error() => Self::error(status, &err.to_string()),
            _ if debug => Self::error_with_details(status, &err.to_string(), debug_details(err)),
            _ => Self::error(status, "Internal Server Error"),
        }
    }

    /// Set status code
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else {
            self.headers.insert(key.to_ascii_lowercase(), value.to_string());
        }
    }

    /// Header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case("content-type") {
            return Some(&self.content_type);
        }
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Body parsed back as JSON
    #[must_use]
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Location and cause chain of an internal failure
fn debug_details(err: &Error) -> Value {
    let mut chain = Vec::new();
    let mut current = std::error::Error::source(err);
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = std::error::Error::source(cause);
    }

    match err {
        Error::InternalDispatch { action, source } => {
            let backtrace = source.backtrace();
            let trace: Vec<String> = if backtrace.status() == BacktraceStatus::Captured {
                backtrace
                    .to_string()
                    .lines()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty())
                    .collect()
            } else {
                Vec::new()
            };
            json!({ "action": action, "chain": chain, "trace": trace })
        }
        _ => json!({ "chain": chain, "trace": [] }),
    }
}
