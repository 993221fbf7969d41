//! # Dependency Container
//!
//! Builds object graphs on demand from explicit registration-time
//! descriptors.
//!
//! - [`Definition`] maps an identifier to an alias, a factory or a pre-built
//!   instance.
//! - [`TypeDescriptor`] describes how to construct a named type: its ordered
//!   constructor [`Dependency`] list and a constructor closure.
//! - Identifiers with an explicit definition are cached after their first
//!   resolution; everything else is rebuilt on every `get`.
//!
//! Resolution is depth-first. The identifiers currently being built travel
//! through the recursion inside a [`Resolution`], so a dependency cycle ends
//! in [`Error::CircularDependency`] instead of a stack overflow.
//!
//! ```ignore
//! let mut container = Container::new();
//! container.register(
//!     TypeDescriptor::class("Mailer")
//!         .dependency(Dependency::scalar("sender").default("noreply@example.com"))
//!         .construct(|deps| Ok(Mailer::new(deps.value(0)?.as_string()))),
//! );
//! container.set("mailer", Definition::alias("Mailer"));
//! let mailer = container.get_as::<Mailer>("mailer")?;
//! ```

use crate::error::{Error, ResolutionError, Result};
use crate::types::{ParamKind, ParamValue};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Type-erased shared instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Factory invoked with the in-flight resolution
pub type Factory = Arc<dyn Fn(&mut Resolution<'_>) -> Result<Instance> + Send + Sync>;

/// Constructor invoked with the resolved dependency list
pub type Constructor = Arc<dyn Fn(&Dependencies) -> Result<Instance> + Send + Sync>;

/// What an identifier resolves to
#[derive(Clone)]
pub enum Definition {
    /// Another identifier, usually a type name
    Alias(String),
    /// Invocable producing the instance
    Factory(Factory),
    /// Pre-built instance
    Instance(Instance),
}

impl Definition {
    /// Resolve through another identifier
    pub fn alias(target: impl Into<String>) -> Self {
        Self::Alias(target.into())
    }

    /// Resolve by calling `factory`
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&mut Resolution<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(move |resolution: &mut Resolution<'_>| {
            factory(resolution).map(|value| Arc::new(value) as Instance)
        }))
    }

    /// Resolve to an existing value
    pub fn instance<T: Any + Send + Sync>(value: T) -> Self {
        Self::Instance(Arc::new(value))
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias(target) => f.debug_tuple("Alias").field(target).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
            Self::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

/// Explicit injection hint on a constructor parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inject {
    /// Inject the parameter's own declared class
    Declared,
    /// Inject the named service
    Service(String),
}

/// One constructor parameter, in declaration order
#[derive(Debug, Clone)]
pub struct Dependency {
    /// Parameter name, used in error messages
    pub name: String,
    /// Declared kind
    pub kind: ParamKind,
    /// Default value for builtin parameters
    pub default: Option<ParamValue>,
    /// Explicit injection hint
    pub inject: Option<Inject>,
}

impl Dependency {
    fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            inject: None,
        }
    }

    /// Parameter typed with a non-builtin class
    pub fn class(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Class(class.into()))
    }

    /// Builtin scalar parameter
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Scalar)
    }

    /// Parameter with no declared type
    pub fn untyped(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Untyped)
    }

    /// Set the default value
    #[must_use]
    pub fn default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Inject the named service regardless of the declared kind
    #[must_use]
    pub fn inject(mut self, id: impl Into<String>) -> Self {
        self.inject = Some(Inject::Service(id.into()));
        self
    }

    /// Inject the declared class explicitly
    #[must_use]
    pub fn inject_declared(mut self) -> Self {
        self.inject = Some(Inject::Declared);
        self
    }
}

/// Registration-time description of a constructible type
#[derive(Clone)]
pub struct TypeDescriptor {
    name: String,
    dependencies: Vec<Dependency>,
    constructor: Option<Constructor>,
}

impl TypeDescriptor {
    /// Describe a concrete class; call [`TypeDescriptor::construct`] to make
    /// it instantiable
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            constructor: None,
        }
    }

    /// Describe a type that is known but never instantiable
    pub fn abstract_class(name: impl Into<String>) -> Self {
        Self::class(name)
    }

    /// Append a constructor parameter
    #[must_use]
    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Set the constructor
    #[must_use]
    pub fn construct<T, F>(mut self, constructor: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Dependencies) -> Result<T> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(move |deps: &Dependencies| {
            constructor(deps).map(|value| Arc::new(value) as Instance)
        }));
        self
    }

    /// Type name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a constructor was provided
    #[must_use]
    pub const fn is_instantiable(&self) -> bool {
        self.constructor.is_some()
    }

    /// Declared constructor parameters
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("instantiable", &self.is_instantiable())
            .finish()
    }
}

/// A resolved constructor argument
#[derive(Clone)]
pub enum Resolved {
    /// Injected service
    Service(Instance),
    /// Default value of a builtin parameter
    Value(ParamValue),
}

/// Resolved constructor arguments, in declaration order
pub struct Dependencies {
    type_name: String,
    values: Vec<Resolved>,
}

impl Dependencies {
    fn get(&self, index: usize) -> Result<&Resolved> {
        self.values.get(index).ok_or_else(|| {
            ResolutionError::MissingArgument {
                type_name: self.type_name.clone(),
                index,
            }
            .into()
        })
    }

    /// Injected service at `index`, downcast to `T`
    ///
    /// # Errors
    ///
    /// `MissingArgument` when out of range, `TypeMismatch` when the argument
    /// is a plain value or a different type.
    pub fn service<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        let mismatch = || ResolutionError::TypeMismatch {
            id: format!("{}#{index}", self.type_name),
            expected: type_name::<T>(),
        };
        match self.get(index)? {
            Resolved::Service(instance) => Arc::clone(instance)
                .downcast::<T>()
                .map_err(|_| mismatch().into()),
            Resolved::Value(_) => Err(mismatch().into()),
        }
    }

    /// Plain value at `index`
    ///
    /// # Errors
    ///
    /// `MissingArgument` when out of range, `TypeMismatch` when the argument
    /// is an injected service.
    pub fn value(&self, index: usize) -> Result<&ParamValue> {
        match self.get(index)? {
            Resolved::Value(value) => Ok(value),
            Resolved::Service(_) => Err(ResolutionError::TypeMismatch {
                id: format!("{}#{index}", self.type_name),
                expected: "ParamValue",
            }
            .into()),
        }
    }

    /// Number of resolved arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the constructor takes no arguments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Dependency resolution container
///
/// Definitions and descriptors are registered through `&mut self` during
/// startup; afterwards the container is shared read-only and only the
/// instance cache mutates.
#[derive(Default)]
pub struct Container {
    definitions: HashMap<String, Definition>,
    types: HashMap<String, TypeDescriptor>,
    instances: RwLock<HashMap<String, Instance>>,
}

impl Container {
    /// Create a new empty container
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition for `id`
    pub fn set(&mut self, id: impl Into<String>, definition: Definition) {
        let id = id.into();
        debug!(id = %id, definition = ?definition, "Service defined");
        self.definitions.insert(id, definition);
    }

    /// Register `id` as resolving to itself
    pub fn set_self(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.set(id.clone(), Definition::Alias(id));
    }

    /// Register a type descriptor
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        debug!(type_name = %descriptor.name, "Type registered");
        self.types.insert(descriptor.name.clone(), descriptor);
    }

    /// True if `id` has an explicit definition or names an instantiable type
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
            || self.types.get(id).is_some_and(TypeDescriptor::is_instantiable)
    }

    /// Resolve `id` to an instance
    ///
    /// # Errors
    ///
    /// `Resolution` when nothing can be built, `CircularDependency` when the
    /// graph loops back onto itself.
    pub fn get(&self, id: &str) -> Result<Instance> {
        Resolution::new(self).get(id)
    }

    /// Resolve `id` and downcast to `T`
    ///
    /// # Errors
    ///
    /// As [`Container::get`], plus `TypeMismatch` if the instance is not a `T`.
    pub fn get_as<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>> {
        Resolution::new(self).get_as(id)
    }

    fn cached(&self, id: &str) -> Option<Instance> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        instances.get(id).cloned()
    }

    /// First write wins; a concurrent loser adopts the stored instance
    fn remember(&self, id: &str, instance: Instance) -> Instance {
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(instances.entry(id.to_string()).or_insert(instance))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Container")
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("cached", &instances.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One top-level `get`, carrying the identifiers still under construction
pub struct Resolution<'c> {
    container: &'c Container,
    in_progress: Vec<String>,
}

impl<'c> Resolution<'c> {
    fn new(container: &'c Container) -> Self {
        Self {
            container,
            in_progress: Vec::new(),
        }
    }

    /// The container being resolved against
    #[must_use]
    pub const fn container(&self) -> &'c Container {
        self.container
    }

    /// Resolve `id` as part of this resolution
    ///
    /// # Errors
    ///
    /// See [`Container::get`].
    pub fn get(&mut self, id: &str) -> Result<Instance> {
        if let Some(instance) = self.container.cached(id) {
            return Ok(instance);
        }

        if self.in_progress.iter().any(|pending| pending == id) {
            let mut chain = self.in_progress.clone();
            chain.push(id.to_string());
            return Err(Error::CircularDependency { chain });
        }

        self.in_progress.push(id.to_string());
        let result = self.build(id);
        self.in_progress.pop();
        result
    }

    /// Resolve `id` and downcast to `T`
    ///
    /// # Errors
    ///
    /// See [`Container::get_as`].
    pub fn get_as<T: Any + Send + Sync>(&mut self, id: &str) -> Result<Arc<T>> {
        self.get(id)?
            .downcast::<T>()
            .map_err(|_| {
                ResolutionError::TypeMismatch {
                    id: id.to_string(),
                    expected: type_name::<T>(),
                }
                .into()
            })
    }

    fn build(&mut self, id: &str) -> Result<Instance> {
        let container = self.container;
        let Some(definition) = container.definitions.get(id) else {
            return self.instantiate(id);
        };

        let instance = match definition {
            Definition::Instance(instance) => Arc::clone(instance),
            Definition::Factory(factory) => factory(self)?,
            Definition::Alias(target) if target == id => self.instantiate(target)?,
            Definition::Alias(target) => self.get(target)?,
        };
        debug!(id = %id, "Service resolved and cached");
        Ok(container.remember(id, instance))
    }

    fn instantiate(&mut self, type_name: &str) -> Result<Instance> {
        let container = self.container;
        let descriptor = container.types.get(type_name).ok_or_else(|| {
            ResolutionError::ServiceNotFound {
                id: type_name.to_string(),
            }
        })?;
        let constructor = descriptor.constructor.as_ref().ok_or_else(|| {
            ResolutionError::NotInstantiable {
                type_name: type_name.to_string(),
            }
        })?;

        let mut values = Vec::with_capacity(descriptor.dependencies.len());
        for dependency in &descriptor.dependencies {
            values.push(self.resolve_dependency(type_name, dependency)?);
        }

        constructor(&Dependencies {
            type_name: type_name.to_string(),
            values,
        })
    }

    fn resolve_dependency(&mut self, owner: &str, dependency: &Dependency) -> Result<Resolved> {
        match (&dependency.inject, &dependency.kind) {
            (Some(Inject::Service(id)), _) => return self.get(id).map(Resolved::Service),
            (Some(Inject::Declared), ParamKind::Class(class)) => {
                return self.get(class).map(Resolved::Service)
            }
            _ => {}
        }

        match &dependency.kind {
            ParamKind::Class(class) => self.get(class).map(Resolved::Service),
            ParamKind::Scalar | ParamKind::Aggregate | ParamKind::Untyped => dependency
                .default
                .clone()
                .map(Resolved::Value)
                .ok_or_else(|| {
                    ResolutionError::UnresolvableParameter {
                        type_name: owner.to_string(),
                        parameter: dependency.name.clone(),
                    }
                    .into()
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Config {
        dsn: String,
    }

    struct Repository {
        config: Arc<Config>,
        page_size: i64,
    }

    struct Service {
        repository: Arc<Repository>,
    }

    fn config_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Config")
            .dependency(Dependency::scalar("dsn").default("sqlite::memory:"))
            .construct(|deps| {
                Ok(Config {
                    dsn: deps.value(0)?.as_string(),
                })
            })
    }

    fn repository_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Repository")
            .dependency(Dependency::class("config", "Config"))
            .dependency(Dependency::scalar("page_size").default(25_i64))
            .construct(|deps| {
                Ok(Repository {
                    config: deps.service::<Config>(0)?,
                    page_size: deps.value(1)?.as_int().unwrap_or_default(),
                })
            })
    }

    fn service_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Service")
            .dependency(Dependency::class("repository", "Repository"))
            .construct(|deps| {
                Ok(Service {
                    repository: deps.service::<Repository>(0)?,
                })
            })
    }

    fn graph() -> Container {
        let mut container = Container::new();
        container.register(config_descriptor());
        container.register(repository_descriptor());
        container.register(service_descriptor());
        container
    }

    #[test]
    fn test_auto_resolves_constructor_graph() {
        let container = graph();
        let service = container.get_as::<Service>("Service").unwrap();
        assert_eq!(service.repository.page_size, 25);
        assert_eq!(service.repository.config.dsn, "sqlite::memory:");
    }

    #[test]
    fn test_auto_resolved_instances_are_not_cached() {
        let container = graph();
        let first = container.get("Repository").unwrap();
        let second = container.get("Repository").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_explicit_definition_is_cached() {
        let mut container = graph();
        container.set_self("Repository");

        let first = container.get("Repository").unwrap();
        let second = container.get("Repository").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_alias_definition_caches_under_its_own_id() {
        let mut container = graph();
        container.set("repo", Definition::alias("Repository"));

        let first = container.get("repo").unwrap();
        let second = container.get("repo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // The target itself has no explicit definition.
        let direct = container.get("Repository").unwrap();
        assert!(!Arc::ptr_eq(&first, &direct));
    }

    #[test]
    fn test_factory_called_once_when_defined() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let mut container = graph();
        container.set(
            "Config",
            Definition::factory(|_| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(Config {
                    dsn: "postgres://db".to_string(),
                })
            }),
        );

        let a = container.get_as::<Repository>("Repository").unwrap();
        let b = container.get_as::<Repository>("Repository").unwrap();
        assert_eq!(a.config.dsn, "postgres://db");
        assert!(Arc::ptr_eq(&a.config, &b.config));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_can_resolve_other_services() {
        let mut container = graph();
        container.set(
            "page_size",
            Definition::factory(|resolution| {
                let repository = resolution.get_as::<Repository>("Repository")?;
                Ok(repository.page_size * 2)
            }),
        );
        assert_eq!(*container.get_as::<i64>("page_size").unwrap(), 50);
    }

    #[test]
    fn test_prebuilt_instance() {
        let mut container = Container::new();
        container.set("greeting", Definition::instance("hello".to_string()));

        let first = container.get_as::<String>("greeting").unwrap();
        let second = container.get_as::<String>("greeting").unwrap();
        assert_eq!(first.as_str(), "hello");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_has() {
        let mut container = graph();
        container.register(TypeDescriptor::abstract_class("Cache"));
        container.set("cache.driver", Definition::instance(1_u8));

        assert!(container.has("Service"));
        assert!(container.has("cache.driver"));
        assert!(!container.has("Cache"));
        assert!(!container.has("Missing"));
    }

    #[test]
    fn test_missing_service() {
        let container = Container::new();
        let err = container.get("Missing").unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::ServiceNotFound { ref id }) if id == "Missing"
        ));
    }

    #[test]
    fn test_abstract_type_is_not_instantiable() {
        let mut container = Container::new();
        container.register(TypeDescriptor::abstract_class("Cache"));
        let err = container.get("Cache").unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::NotInstantiable { .. })
        ));
    }

    #[test]
    fn test_scalar_without_default_is_unresolvable() {
        let mut container = Container::new();
        container.register(
            TypeDescriptor::class("Client")
                .dependency(Dependency::scalar("timeout"))
                .construct(|_| Ok(())),
        );
        let err = container.get("Client").unwrap_err();
        assert_eq!(err.to_string(), "Cannot resolve parameter $timeout in Client");
    }

    #[test]
    fn test_untyped_with_default() {
        let mut container = Container::new();
        container.register(
            TypeDescriptor::class("Client")
                .dependency(Dependency::untyped("retries").default(3_i64))
                .construct(|deps| Ok(deps.value(0)?.as_int())),
        );
        assert_eq!(*container.get_as::<Option<i64>>("Client").unwrap(), Some(3));
    }

    #[test]
    fn test_inject_hint_overrides_declared_kind() {
        let mut container = graph();
        container.set("default.dsn", Definition::instance("mysql://primary".to_string()));
        container.register(
            TypeDescriptor::class("Reporter")
                .dependency(Dependency::untyped("dsn").inject("default.dsn"))
                .dependency(Dependency::class("config", "Config").inject_declared())
                .construct(|deps| {
                    let dsn = deps.service::<String>(0)?;
                    let config = deps.service::<Config>(1)?;
                    Ok(format!("{dsn} / {}", config.dsn))
                }),
        );
        let report = container.get_as::<String>("Reporter").unwrap();
        assert_eq!(report.as_str(), "mysql://primary / sqlite::memory:");
    }

    #[test]
    fn test_inject_declared_on_scalar_falls_back_to_default() {
        let mut container = Container::new();
        container.register(
            TypeDescriptor::class("Pager")
                .dependency(Dependency::scalar("size").default(10_i64).inject_declared())
                .construct(|deps| Ok(deps.value(0)?.as_int())),
        );
        assert_eq!(*container.get_as::<Option<i64>>("Pager").unwrap(), Some(10));
    }

    #[test]
    fn test_circular_dependency_is_reported() {
        let mut container = Container::new();
        container.register(
            TypeDescriptor::class("A")
                .dependency(Dependency::class("b", "B"))
                .construct(|_| Ok(())),
        );
        container.register(
            TypeDescriptor::class("B")
                .dependency(Dependency::class("a", "A"))
                .construct(|_| Ok(())),
        );

        match container.get("A").unwrap_err() {
            Error::CircularDependency { chain } => assert_eq!(chain, vec!["A", "B", "A"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_circular_dependency_through_factory() {
        let mut container = Container::new();
        container.set("loop", Definition::factory(|r| r.get("loop").map(|_| ())));
        assert!(matches!(
            container.get("loop"),
            Err(Error::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_self_alias_for_unknown_type_fails() {
        let mut container = Container::new();
        container.set_self("Ghost");
        assert!(container.has("Ghost"));
        assert!(matches!(
            container.get("Ghost"),
            Err(Error::Resolution(ResolutionError::ServiceNotFound { .. }))
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let mut container = Container::new();
        container.set("n", Definition::instance(1_u32));
        assert!(matches!(
            container.get_as::<String>("n"),
            Err(Error::Resolution(ResolutionError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_shared_across_threads() {
        let mut container = graph();
        container.set_self("Config");
        let container = Arc::new(container);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let container = Arc::clone(&container);
                std::thread::spawn(move || container.get("Config").unwrap())
            })
            .collect();
        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let cached = container.get("Config").unwrap();
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &cached)));
    }
}
