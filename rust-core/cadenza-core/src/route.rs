//! # Route Metadata
//!
//! Route table entries, their compiled matchers, and the declarations
//! controllers use to describe their actions.
//!
//! A path template such as `/users/{id}/posts/{tag}` compiles to an anchored
//! regex in which every `{identifier}` becomes a single-segment capture and
//! all other text matches literally.

use crate::binding::{Arguments, ParamSpec};
use crate::container::Instance;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// HTTP methods accepted in action declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// HTTP GET
    #[default]
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Upper-case method name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Self::Get,
            Self::Post,
            Self::Put,
            Self::Delete,
            Self::Patch,
            Self::Head,
            Self::Options,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| Error::configuration(format!("Unsupported HTTP method: {s}")))
    }
}

/// One row of the route table
///
/// This is what the route cache persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Path template (e.g. "/users/{id}")
    pub path: String,
    /// Upper-cased HTTP method
    pub method: String,
    /// Controller identifier resolved through the container
    pub controller: String,
    /// Action name on the controller
    pub action: String,
}

impl RouteEntry {
    /// Create an entry; the method is upper-cased
    pub fn new(
        path: impl Into<String>,
        method: &str,
        controller: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            method: method.to_ascii_uppercase(),
            controller: controller.into(),
            action: action.into(),
        }
    }

    /// `Controller::action`, used in logs and errors
    #[must_use]
    pub fn qualified_action(&self) -> String {
        format!("{}::{}", self.controller, self.action)
    }
}

/// Byte ranges of `{identifier}` placeholders in `template`
fn placeholders(template: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(open) = template[offset..].find('{').map(|i| i + offset) {
        let Some(close) = template[open..].find('}').map(|i| i + open) else {
            break;
        };
        let name = &template[open + 1..close];
        let mut chars = name.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            found.push((open, close + 1));
            offset = close + 1;
        } else {
            offset = open + 1;
        }
    }
    found
}

/// Compile a path template into an anchored matcher
///
/// # Errors
///
/// Returns `Error::Configuration` if the resulting pattern is rejected.
pub fn compile_pattern(template: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(template.len() + 16);
    pattern.push('^');

    let mut last = 0;
    for (start, end) in placeholders(template) {
        pattern.push_str(&regex::escape(&template[last..start]));
        pattern.push_str("([^/]+)");
        last = end;
    }
    pattern.push_str(&regex::escape(&template[last..]));
    pattern.push('$');

    Regex::new(&pattern).map_err(|e| {
        Error::configuration(format!("Invalid route pattern {template}: {e}"))
    })
}

/// Route entry with its compiled matcher
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    /// Table entry
    pub entry: RouteEntry,
    pattern: Regex,
}

impl CompiledRoute {
    /// Compile `entry`'s path template
    ///
    /// # Errors
    ///
    /// See [`compile_pattern`].
    pub fn compile(entry: RouteEntry) -> Result<Self> {
        let pattern = compile_pattern(&entry.path)?;
        Ok(Self { entry, pattern })
    }

    /// Regex source the template compiled to
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Captured segments if `method` and the whole `path` match
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> Option<Vec<String>> {
        if !self.entry.method.eq_ignore_ascii_case(method) {
            return None;
        }
        self.pattern.captures(path).map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect()
        })
    }
}

/// Invokes an action on a resolved controller instance
pub type ActionHandler =
    Arc<dyn Fn(&Instance, Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync>;

/// Declaration of one controller action
#[derive(Clone)]
pub struct ActionDeclaration {
    /// Action name
    pub name: String,
    /// Path fragment appended to the controller prefix
    pub path: String,
    /// HTTP method
    pub method: Method,
    /// Parameters in declaration order
    pub parameters: Vec<ParamSpec>,
    handler: Option<ActionHandler>,
}

impl ActionDeclaration {
    /// Declare an action
    pub fn new(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            method,
            parameters: Vec::new(),
            handler: None,
        }
    }

    /// Declare a GET action
    pub fn get(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::Get, path)
    }

    /// Declare a POST action
    pub fn post(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::Post, path)
    }

    /// Declare a PUT action
    pub fn put(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::Put, path)
    }

    /// Declare a DELETE action
    pub fn delete(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::Delete, path)
    }

    /// Append a parameter
    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Set the body of the action
    ///
    /// `C` is the controller type the container builds; the result is
    /// serialized to JSON.
    #[must_use]
    pub fn handler<C, R, F>(mut self, handler: F) -> Self
    where
        C: Any + Send + Sync,
        R: Serialize,
        F: Fn(&C, Arguments) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(move |instance: &Instance, args: Arguments| {
            let controller = instance.as_ref().downcast_ref::<C>().ok_or_else(|| {
                anyhow::anyhow!("Controller is not a {}", std::any::type_name::<C>())
            })?;
            let result = handler(controller, args)?;
            Ok(serde_json::to_value(result)?)
        }));
        self
    }

    /// The erased action body, if set
    #[must_use]
    pub fn action_handler(&self) -> Option<&ActionHandler> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for ActionDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDeclaration")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("parameters", &self.parameters)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Route declarations of one controller
#[derive(Debug, Clone)]
pub struct ControllerDeclaration {
    /// Container identifier of the controller
    pub controller: String,
    /// Path prefix shared by every action
    pub prefix: String,
    /// Declared actions, in order
    pub actions: Vec<ActionDeclaration>,
}

impl ControllerDeclaration {
    /// Declare a controller with no prefix
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            prefix: String::new(),
            actions: Vec::new(),
        }
    }

    /// Set the path prefix
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Append an action
    #[must_use]
    pub fn action(mut self, action: ActionDeclaration) -> Self {
        self.actions.push(action);
        self
    }

    /// Look up an action by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ActionDeclaration> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Full path of `action`: prefix and fragment joined by exactly one `/`
    #[must_use]
    pub fn full_path(&self, action: &ActionDeclaration) -> String {
        format!(
            "{}/{}",
            self.prefix.trim_end_matches('/'),
            action.path.trim_start_matches('/')
        )
    }
}
