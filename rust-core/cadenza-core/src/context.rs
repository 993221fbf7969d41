//! # Request Context
//!
//! What travels through the middleware pipeline: the request plus
//! attributes that middleware attach for later layers (request id, JWT
//! claims, ...).

use crate::request::Request;
use serde_json::Value;
use std::collections::HashMap;

/// Per-request state passed to every middleware layer
#[derive(Debug, Clone)]
pub struct Context {
    /// The inbound request
    pub request: Request,
    attributes: HashMap<String, Value>,
}

impl Context {
    /// Wrap a request
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            request,
            attributes: HashMap::new(),
        }
    }

    /// Attach an attribute, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Attribute by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Attribute as a string
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Whether an attribute is present
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }
}

impl From<Request> for Context {
    fn from(request: Request) -> Self {
        Self::new(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attributes() {
        let mut ctx = Context::new(Request::new("GET", "/"));
        assert!(!ctx.contains("user"));

        ctx.set("user", json!({"sub": "42"}));
        ctx.set("request_id", "abc");
        assert_eq!(ctx.get("user"), Some(&json!({"sub": "42"})));
        assert_eq!(ctx.get_str("request_id"), Some("abc"));

        ctx.set("request_id", "def");
        assert_eq!(ctx.get_str("request_id"), Some("def"));
    }
}
