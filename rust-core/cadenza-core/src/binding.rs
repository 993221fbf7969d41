//! # Parameter Binding
//!
//! Turns a matched request into the ordered argument list of a controller
//! action.
//!
//! Builtin parameters are bound positionally from URL captures through a
//! cursor that only they advance. Value-object parameters are deserialized
//! from the request-data bucket named by their source directive and must
//! pass the registered [`Validator`] before the action ever runs.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::types::{coerce, coerce_list, ParamKind, ParamValue};
use crate::validation::{
    FieldError, ValidationCode, ValidationErrors, Validate, Validator, ValueObject,
    VALIDATOR_SERVICE,
};
use anyhow::{anyhow, Context as _};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::{type_name, Any};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Request-data bucket a value object is populated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Query-string fields
    Query,
    /// Parsed JSON request body
    Json,
    /// Posted form fields merged with uploaded-file metadata
    FormData,
}

impl Source {
    /// Directive spelling
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Json => "json",
            Self::FormData => "formData",
        }
    }

    /// Collect this bucket from `request`
    #[must_use]
    pub fn bucket(self, request: &Request) -> Map<String, Value> {
        match self {
            Self::Query => request
                .query_map()
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
            Self::Json => crate::json::parse_body_object(request.body_bytes()),
            Self::FormData => {
                let mut bucket: Map<String, Value> = request
                    .form_fields()
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                for (field, file) in request.uploads() {
                    if let Ok(meta) = serde_json::to_value(file) {
                        bucket.insert(field.clone(), meta);
                    }
                }
                bucket
            }
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "query" => Ok(Self::Query),
            "json" => Ok(Self::Json),
            "formData" => Ok(Self::FormData),
            other => Err(Error::configuration(format!("Unsupported source: {other}"))),
        }
    }
}

/// Builds a value object from a request-data bucket
pub type ObjectBuilder = fn(Map<String, Value>) -> serde_json::Result<Box<dyn ValueObject>>;

fn build_object<T>(bucket: Map<String, Value>) -> serde_json::Result<Box<dyn ValueObject>>
where
    T: DeserializeOwned + Validate + Send + 'static,
{
    serde_json::from_value::<T>(Value::Object(bucket)).map(|o| Box::new(o) as Box<dyn ValueObject>)
}

/// Declared parameter of a controller action
#[derive(Clone)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// Declared kind
    pub kind: ParamKind,
    /// Value used when no URL capture is left
    pub default: Option<ParamValue>,
    /// Value-source directive (`query`, `json`, `formData`)
    pub source: Option<String>,
    builder: Option<ObjectBuilder>,
}

impl ParamSpec {
    fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            source: None,
            builder: None,
        }
    }

    /// Scalar bound from the next URL capture
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Scalar)
    }

    /// Comma-separated list bound from the next URL capture
    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Aggregate)
    }

    /// Untyped parameter bound from the next URL capture
    pub fn untyped(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Untyped)
    }

    /// Value object of type `T`
    ///
    /// Needs a source directive; see [`ParamSpec::source`].
    pub fn object<T>(name: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Validate + Send + 'static,
    {
        let mut spec = Self::new(name, ParamKind::Class(short_type_name::<T>().to_string()));
        spec.builder = Some(build_object::<T>);
        spec
    }

    /// Set the value-source directive
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the default value
    #[must_use]
    pub fn default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Reject declarations that could never bind
    ///
    /// # Errors
    ///
    /// `Configuration` for a value object without a source directive or with
    /// an unsupported one.
    pub fn check(&self, action: &str) -> Result<Option<Source>> {
        if self.kind.is_builtin() {
            return Ok(None);
        }
        let directive = self.source.as_deref().ok_or_else(|| {
            Error::configuration(format!(
                "Parameter ${} in {action}() must declare a value source",
                self.name
            ))
        })?;
        let source = directive.parse::<Source>()?;
        if self.builder.is_none() {
            return Err(Error::configuration(format!(
                "Parameter ${} in {action}() has no value-object builder for {}",
                self.name, self.kind
            )));
        }
        Ok(Some(source))
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// One bound argument
pub enum Argument {
    /// Builtin value from the URL or a default
    Value(ParamValue),
    /// Validated value object
    Object(Box<dyn Any + Send>),
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// Bound arguments of one dispatch, in declaration order
///
/// Value objects are moved out with [`Arguments::object`], so each can be
/// taken once.
#[derive(Debug, Default)]
pub struct Arguments {
    names: Vec<String>,
    items: Vec<Option<Argument>>,
}

impl Arguments {
    fn push(&mut self, name: &str, argument: Argument) {
        self.names.push(name.to_string());
        self.items.push(Some(argument));
    }

    fn slot(&self, index: usize) -> anyhow::Result<&Argument> {
        self.items
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| anyhow!("No argument at position {index}"))
    }

    /// Builtin value at `index`
    ///
    /// # Errors
    ///
    /// Fails if the position is empty or holds a value object.
    pub fn value(&self, index: usize) -> anyhow::Result<&ParamValue> {
        match self.slot(index)? {
            Argument::Value(value) => Ok(value),
            Argument::Object(_) => Err(anyhow!(
                "Argument ${} is a value object",
                self.names[index]
            )),
        }
    }

    /// Integer value at `index`
    ///
    /// # Errors
    ///
    /// Fails unless the argument is an integer.
    pub fn int(&self, index: usize) -> anyhow::Result<i64> {
        let value = self.value(index)?;
        value
            .as_int()
            .with_context(|| format!("Argument ${} is not an integer: {value:?}", self.names[index]))
    }

    /// Numeric value at `index`, integers widened
    ///
    /// # Errors
    ///
    /// Fails unless the argument is numeric.
    pub fn float(&self, index: usize) -> anyhow::Result<f64> {
        let value = self.value(index)?;
        value
            .as_float()
            .with_context(|| format!("Argument ${} is not numeric: {value:?}", self.names[index]))
    }

    /// Text rendering of the value at `index`
    ///
    /// # Errors
    ///
    /// Fails if the position is empty or holds a value object.
    pub fn text(&self, index: usize) -> anyhow::Result<String> {
        self.value(index).map(ParamValue::as_string)
    }

    /// List elements at `index`
    ///
    /// # Errors
    ///
    /// Fails unless the argument is a list.
    pub fn list(&self, index: usize) -> anyhow::Result<&[ParamValue]> {
        let value = self.value(index)?;
        value
            .as_list()
            .with_context(|| format!("Argument ${} is not a list", self.names[index]))
    }

    /// Move the value object at `index` out as a `T`
    ///
    /// # Errors
    ///
    /// Fails if the position is empty, already taken, a builtin value or of
    /// another type.
    pub fn object<T: Any>(&mut self, index: usize) -> anyhow::Result<T> {
        let name = self.names.get(index).cloned().unwrap_or_default();
        let taken = self.items.get_mut(index).and_then(Option::take);
        match taken {
            Some(Argument::Object(object)) => object
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| anyhow!("Argument ${name} is not a {}", type_name::<T>())),
            Some(value @ Argument::Value(_)) => {
                self.items[index] = Some(value);
                Err(anyhow!("Argument ${name} is not a value object"))
            }
            None => Err(anyhow!("No argument at position {index}")),
        }
    }

    /// Number of bound arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the action takes no arguments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Bind every declared parameter of `action`
///
/// # Errors
///
/// - `Configuration` for a value object without a usable source directive,
///   a missing validator, or a builtin parameter with neither a capture nor
///   a default
/// - `Validation` when a value object cannot be built from its bucket or
///   fails the validator
pub fn bind(
    action: &str,
    specs: &[ParamSpec],
    request: &Request,
    captures: &[String],
    container: &Container,
) -> Result<Arguments> {
    let mut arguments = Arguments::default();
    let mut cursor = 0;

    for spec in specs {
        if let Some(source) = spec.check(action)? {
            let object = bind_object(spec, source, request, container)?;
            arguments.push(&spec.name, Argument::Object(object.into_any()));
            continue;
        }

        let value = if let Some(raw) = captures.get(cursor) {
            cursor += 1;
            match spec.kind {
                ParamKind::Aggregate => coerce_list(raw),
                _ => coerce(raw),
            }
        } else if let Some(default) = &spec.default {
            default.clone()
        } else {
            return Err(Error::configuration(format!(
                "Missing URL parameter for ${} in {action}()",
                spec.name
            )));
        };
        arguments.push(&spec.name, Argument::Value(value));
    }

    Ok(arguments)
}

fn bind_object(
    spec: &ParamSpec,
    source: Source,
    request: &Request,
    container: &Container,
) -> Result<Box<dyn ValueObject>> {
    let builder = spec
        .builder
        .ok_or_else(|| Error::configuration(format!("Parameter ${} has no builder", spec.name)))?;

    let object = builder(source.bucket(request)).map_err(|e| {
        let mut errors = ValidationErrors::new();
        errors.add(FieldError::new(
            source.as_str(),
            format!("Invalid {} payload: {e}", spec.kind),
            ValidationCode::InvalidType,
        ));
        Error::Validation(errors)
    })?;

    if !container.has(VALIDATOR_SERVICE) {
        return Err(Error::configuration("Validator service not registered"));
    }
    let validator = container.get_as::<Arc<dyn Validator>>(VALIDATOR_SERVICE)?;

    let errors = validator.validate(object.as_ref());
    if !errors.is_empty() {
        debug!(parameter = %spec.name, violations = errors.len(), "Value object rejected");
        return Err(Error::Validation(errors));
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Definition;
    use crate::request::UploadedFile;
    use crate::validation::ConstraintValidator;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct CreatePost {
        title: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    impl Validate for CreatePost {
        fn validate(&self, errors: &mut ValidationErrors) {
            if self.title.trim().is_empty() {
                errors.add_required("title");
            }
            if self.tags.len() > 3 {
                errors.add(FieldError::new("tags", "too many tags", ValidationCode::TooLong));
            }
        }
    }

    #[derive(Debug, Deserialize)]
    struct Avatar {
        avatar: UploadedMeta,
        caption: String,
    }

    #[derive(Debug, Deserialize)]
    struct UploadedMeta {
        name: String,
        size: u64,
    }

    impl Validate for Avatar {}

    fn container() -> Container {
        let mut container = Container::new();
        container.set(
            VALIDATOR_SERVICE,
            Definition::instance(Arc::new(ConstraintValidator) as Arc<dyn Validator>),
        );
        container
    }

    fn captures(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_positional_binding_with_list() {
        let specs = [ParamSpec::scalar("id"), ParamSpec::list("tags")];
        let args = bind(
            "Posts::show",
            &specs,
            &Request::new("GET", "/users/42/posts/go,rust"),
            &captures(&["42", "go,rust"]),
            &container(),
        )
        .unwrap();

        assert_eq!(args.int(0).unwrap(), 42);
        assert_eq!(
            args.value(1).unwrap(),
            &ParamValue::List(vec![ParamValue::from("go"), ParamValue::from("rust")])
        );
    }

    #[test]
    fn test_default_used_when_captures_run_out() {
        let specs = [ParamSpec::scalar("id"), ParamSpec::scalar("page").default(1_i64)];
        let args = bind("A::b", &specs, &Request::new("GET", "/"), &captures(&["3.5"]), &container())
            .unwrap();
        assert!((args.float(0).unwrap() - 3.5).abs() < f64::EPSILON);
        assert_eq!(args.int(1).unwrap(), 1);
    }

    #[test]
    fn test_missing_capture_without_default() {
        let specs = [ParamSpec::untyped("slug")];
        let err = bind("A::b", &specs, &Request::new("GET", "/"), &[], &container()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("$slug"));
    }

    #[test]
    fn test_object_without_source_is_configuration_error() {
        let specs = [ParamSpec::object::<CreatePost>("post")];
        let request = Request::new("POST", "/").with_json(&serde_json::json!({"title": "ok"}));
        let err = bind("Posts::create", &specs, &request, &[], &container()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_unsupported_source() {
        let specs = [ParamSpec::object::<CreatePost>("post").source("cookies")];
        let err = bind("Posts::create", &specs, &Request::new("POST", "/"), &[], &container())
            .unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Unsupported source: cookies");
    }

    #[test]
    fn test_object_from_json() {
        let specs = [
            ParamSpec::scalar("blog"),
            ParamSpec::object::<CreatePost>("post").source("json"),
            ParamSpec::scalar("draft").default(false),
        ];
        let request = Request::new("POST", "/blogs/7/posts")
            .with_json(&serde_json::json!({"title": "Hello", "tags": ["a"], "unknown": 1}));
        let mut args = bind("Posts::create", &specs, &request, &captures(&["7"]), &container())
            .unwrap();

        assert_eq!(args.len(), 3);
        assert_eq!(args.int(0).unwrap(), 7);
        assert_eq!(args.value(2).unwrap(), &ParamValue::Bool(false));

        let post = args.object::<CreatePost>(1).unwrap();
        assert_eq!(post.title, "Hello");
        assert_eq!(post.tags, vec!["a".to_string()]);
        assert!(args.object::<CreatePost>(1).is_err());
    }

    #[test]
    fn test_invalid_object_joins_messages() {
        let specs = [ParamSpec::object::<CreatePost>("post").source("json")];
        let request = Request::new("POST", "/").with_json(&serde_json::json!({
            "title": " ",
            "tags": ["a", "b", "c", "d"],
        }));
        let err = bind("Posts::create", &specs, &request, &[], &container()).unwrap_err();
        assert_eq!(err.to_string(), "title: title is required | tags: too many tags");
    }

    #[test]
    fn test_malformed_bucket_is_validation_error() {
        let specs = [ParamSpec::object::<CreatePost>("post").source("json")];
        let request = Request::new("POST", "/").with_body("not json");
        match bind("Posts::create", &specs, &request, &[], &container()).unwrap_err() {
            Error::Validation(errors) => assert_eq!(errors.errors[0].field, "json"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_object_from_query() {
        let specs = [ParamSpec::object::<CreatePost>("post").source("query")];
        let request = Request::new("GET", "/search?title=rust&page=2");
        let mut args = bind("Posts::search", &specs, &request, &[], &container()).unwrap();
        assert_eq!(args.object::<CreatePost>(0).unwrap().title, "rust");
    }

    #[test]
    fn test_form_data_merges_uploads() {
        let specs = [ParamSpec::object::<Avatar>("avatar").source("formData")];
        let request = Request::new("POST", "/profile")
            .with_form("caption=Me+at+the+beach")
            .with_upload(
                "avatar",
                UploadedFile {
                    name: "beach.png".to_string(),
                    content_type: "image/png".to_string(),
                    tmp_name: "/tmp/php123".to_string(),
                    error: 0,
                    size: 2048,
                },
            );
        let mut args = bind("Profile::upload", &specs, &request, &[], &container()).unwrap();
        let avatar = args.object::<Avatar>(0).unwrap();
        assert_eq!(avatar.caption, "Me at the beach");
        assert_eq!(avatar.avatar.name, "beach.png");
        assert_eq!(avatar.avatar.size, 2048);
    }

    #[test]
    fn test_missing_validator_is_configuration_error() {
        let specs = [ParamSpec::object::<CreatePost>("post").source("json")];
        let request = Request::new("POST", "/").with_json(&serde_json::json!({"title": "x"}));
        let err = bind("Posts::create", &specs, &request, &[], &Container::new()).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Validator service not registered");
    }

    #[test]
    fn test_source_round_trip_names() {
        for source in [Source::Query, Source::Json, Source::FormData] {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert_eq!(ParamSpec::object::<CreatePost>("p").kind.to_string(), "CreatePost");
    }

    #[test]
    fn test_argument_accessors_reject_wrong_shape() {
        let specs = [ParamSpec::untyped("name")];
        let mut args =
            bind("A::b", &specs, &Request::new("GET", "/"), &captures(&["v7"]), &container())
                .unwrap();
        assert!(args.int(0).is_err());
        assert!(args.list(0).is_err());
        assert_eq!(args.text(0).unwrap(), "v7");
        assert!(args.object::<CreatePost>(0).is_err());
        assert_eq!(args.text(0).unwrap(), "v7");
        assert!(args.value(5).is_err());
    }
}
