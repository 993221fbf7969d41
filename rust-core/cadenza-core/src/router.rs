//! # Router
//!
//! Ordered route table with first-match-wins dispatch.
//!
//! ## Features
//!
//! - Path templates with single-segment captures (`/users/{id}`)
//! - Routes built from controller declarations, optionally restored from a
//!   [`RouteCache`]
//! - Dispatch resolves the controller through the [`Container`], binds the
//!   action's parameters and invokes it
//!
//! Matching is a linear scan in registration order. The first entry whose
//! method and full path both match wins, even when a later entry would
//! match too.

use crate::binding::bind;
use crate::cache::{RouteCache, DEFAULT_ROUTE_TTL};
use crate::container::Container;
use crate::discovery::ControllerFinder;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::route::{CompiledRoute, ControllerDeclaration, RouteEntry};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A route that matched, with its raw captures in order
#[derive(Debug)]
pub struct Match<'a> {
    /// The matched table entry
    pub entry: &'a RouteEntry,
    /// Captured path segments, not yet coerced
    pub captures: Vec<String>,
}

/// Route table plus the declarations its entries dispatch to
pub struct Router {
    routes: Vec<CompiledRoute>,
    declarations: HashMap<String, ControllerDeclaration>,
    cache: Option<Arc<dyn RouteCache>>,
    cache_ttl: Duration,
    debug: bool,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            declarations: HashMap::new(),
            cache: None,
            cache_ttl: DEFAULT_ROUTE_TTL,
            debug: false,
        }
    }

    /// Use `cache` for the route table outside debug mode
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn RouteCache>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    /// Debug mode bypasses the route cache
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Append a route
    ///
    /// Registering the same route twice yields two entries; the first keeps
    /// winning.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the template cannot be compiled.
    pub fn add_route(&mut self, path: &str, method: &str, controller: &str, action: &str) -> Result<()> {
        let route = CompiledRoute::compile(RouteEntry::new(path, method, controller, action))?;
        debug!(
            method = %route.entry.method,
            path = %route.entry.path,
            pattern = %route.pattern(),
            action = %route.entry.qualified_action(),
            "Route registered"
        );
        self.routes.push(route);
        Ok(())
    }

    /// Record the route declarations of a controller
    pub fn declare(&mut self, declaration: ControllerDeclaration) {
        self.declarations
            .insert(declaration.controller.clone(), declaration);
    }

    /// Declarations recorded for `controller`
    #[must_use]
    pub fn declaration(&self, controller: &str) -> Option<&ControllerDeclaration> {
        self.declarations.get(controller)
    }

    /// Add one route per declared action of `controller`
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the controller was never declared,
    /// an action has no body, or a parameter could never bind.
    pub fn register_from_declared(&mut self, controller: &str) -> Result<()> {
        let declaration = self.declarations.get(controller).cloned().ok_or_else(|| {
            Error::configuration(format!("Controller {controller} has no route declarations"))
        })?;

        for action in &declaration.actions {
            let qualified = format!("{}::{}", declaration.controller, action.name);
            if action.action_handler().is_none() {
                return Err(Error::configuration(format!("Action {qualified} has no handler")));
            }
            for spec in &action.parameters {
                spec.check(&qualified)?;
            }
            self.add_route(
                &declaration.full_path(action),
                action.method.as_str(),
                &declaration.controller,
                &action.name,
            )?;
        }
        Ok(())
    }

    /// Register every controller `finder` reports under `directories`
    ///
    /// Outside debug mode a cached table is used instead when present, and a
    /// freshly built table is stored afterwards.
    ///
    /// # Errors
    ///
    /// Propagates registration errors; nothing is skipped silently.
    pub fn register_controllers(
        &mut self,
        finder: &dyn ControllerFinder,
        directories: &[PathBuf],
    ) -> Result<()> {
        let cached = self
            .cache
            .as_ref()
            .filter(|_| !self.debug)
            .and_then(|cache| cache.get());
        if let Some(entries) = cached {
            info!(routes = entries.len(), "Route table restored from cache");
            return self.load(entries);
        }

        for directory in directories {
            for controller in finder.find(directory) {
                self.register_from_declared(&controller)?;
            }
        }

        if let Some(cache) = self.cache.as_ref().filter(|_| !self.debug) {
            if let Err(e) = cache.store(&self.entries(), self.cache_ttl) {
                warn!(error = %e, "Failed to store route cache");
            }
        }
        info!(routes = self.routes.len(), "Controllers registered");
        Ok(())
    }

    /// Append previously built entries
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a template cannot be compiled.
    pub fn load(&mut self, entries: Vec<RouteEntry>) -> Result<()> {
        for entry in entries {
            self.routes.push(CompiledRoute::compile(entry)?);
        }
        Ok(())
    }

    /// The route table, in registration order
    #[must_use]
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.routes.iter().map(|r| r.entry.clone()).collect()
    }

    /// Number of table entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route matching `method` and `uri`; any query string is ignored
    #[must_use]
    pub fn match_route(&self, method: &str, uri: &str) -> Option<Match<'_>> {
        let path = uri.split_once('?').map_or(uri, |(path, _)| path);
        self.routes.iter().find_map(|route| {
            route.matches(method, path).map(|captures| Match {
                entry: &route.entry,
                captures,
            })
        })
    }

    /// Match `request`, resolve its controller, bind and invoke the action
    ///
    /// # Errors
    ///
    /// - `NotFound` when no route matches
    /// - `Configuration`, `Validation` and `CircularDependency` as raised
    /// - `InternalDispatch` for anything else, including handler panics
    pub fn dispatch(&self, container: &Container, request: &Request) -> Result<Value> {
        let matched = self
            .match_route(&request.method, &request.path)
            .ok_or_else(|| Error::NotFound {
                method: request.method.clone(),
                path: request.path.clone(),
            })?;
        let entry = matched.entry;
        let qualified = entry.qualified_action();

        let action = self
            .declarations
            .get(&entry.controller)
            .and_then(|d| d.find(&entry.action))
            .ok_or_else(|| Error::configuration(format!("Action {qualified} is not declared")))?;
        let handler = action
            .action_handler()
            .ok_or_else(|| Error::configuration(format!("Action {qualified} has no handler")))?;

        debug!(action = %qualified, captures = ?matched.captures, "Route matched");

        let controller = container
            .get(&entry.controller)
            .map_err(|e| escalate(&qualified, e))?;
        let arguments = bind(&qualified, &action.parameters, request, &matched.captures, container)
            .map_err(|e| escalate(&qualified, e))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&controller, arguments))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(match e.downcast::<Error>() {
                Ok(err) => escalate(&qualified, err),
                Err(source) => Error::InternalDispatch {
                    action: qualified,
                    source,
                },
            }),
            Err(payload) => Err(Error::InternalDispatch {
                source: anyhow::anyhow!("Handler panicked: {}", panic_message(payload.as_ref())),
                action: qualified,
            }),
        }
    }
}

/// Keep registration and client errors as they are, wrap everything else
fn escalate(action: &str, err: Error) -> Error {
    match err {
        Error::Validation(_) | Error::Configuration { .. } | Error::CircularDependency { .. } => err,
        other => Error::InternalDispatch {
            action: action.to_string(),
            source: other.into(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("controllers", &self.declarations.keys().collect::<Vec<_>>())
            .field("cached", &self.cache.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Arguments, ParamSpec};
    use crate::cache::MemoryRouteCache;
    use crate::container::{Definition, Dependency, TypeDescriptor};
    use crate::discovery::StaticFinder;
    use crate::error::ResolutionError;
    use crate::route::ActionDeclaration;
    use crate::validation::{
        ConstraintValidator, Validate, ValidationErrors, Validator, VALIDATOR_SERVICE,
    };
    use serde::Deserialize;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Posts {
        calls: Arc<AtomicUsize>,
    }

    #[derive(Deserialize)]
    struct NewPost {
        title: String,
    }

    impl Validate for NewPost {
        fn validate(&self, errors: &mut ValidationErrors) {
            if self.title.is_empty() {
                errors.add_required("title");
            }
            if self.title.len() > 10 {
                errors.add(crate::validation::FieldError::too_long("title", 10));
            }
        }
    }

    fn posts_declaration() -> ControllerDeclaration {
        ControllerDeclaration::new("Posts")
            .prefix("/users/")
            .action(
                ActionDeclaration::get("tagged", "/{id}/posts/{tag}")
                    .param(ParamSpec::scalar("id"))
                    .param(ParamSpec::list("tag"))
                    .handler(|c: &Posts, args: Arguments| {
                        c.calls.fetch_add(1, Ordering::SeqCst);
                        Ok(json!([args.value(0)?, args.value(1)?]))
                    }),
            )
            .action(
                ActionDeclaration::post("create", "/{id}/posts")
                    .param(ParamSpec::scalar("id"))
                    .param(ParamSpec::object::<NewPost>("post").source("json"))
                    .handler(|c: &Posts, mut args: Arguments| {
                        c.calls.fetch_add(1, Ordering::SeqCst);
                        let post: NewPost = args.object(1)?;
                        Ok(json!({"user": args.int(0)?, "title": post.title}))
                    }),
            )
            .action(
                ActionDeclaration::get("fail", "/fail").handler(|_: &Posts, _| {
                    Err::<(), _>(anyhow::anyhow!("database offline"))
                }),
            )
            .action(
                ActionDeclaration::get("explode", "/explode")
                    .handler(|_: &Posts, _| -> anyhow::Result<()> { panic!("boom") }),
            )
    }

    fn setup() -> (Container, Router, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut container = Container::new();
        container.set("calls", Definition::instance(Arc::clone(&calls)));
        container.register(
            TypeDescriptor::class("Posts")
                .dependency(Dependency::untyped("calls").inject("calls"))
                .construct(|deps| {
                    let calls = deps.service::<Arc<AtomicUsize>>(0)?;
                    Ok(Posts {
                        calls: Arc::clone(calls.as_ref()),
                    })
                }),
        );
        container.set(
            VALIDATOR_SERVICE,
            Definition::instance(Arc::new(ConstraintValidator) as Arc<dyn Validator>),
        );

        let mut router = Router::new();
        router.declare(posts_declaration());
        router.register_from_declared("Posts").unwrap();
        (container, router, calls)
    }

    #[test]
    fn test_registered_paths() {
        let (_, router, _) = setup();
        let paths: Vec<String> = router.entries().into_iter().map(|e| e.path).collect();
        assert_eq!(
            paths,
            vec!["/users/{id}/posts/{tag}", "/users/{id}/posts", "/users/fail", "/users/explode"]
        );
    }

    #[test]
    fn test_dispatch_binds_positional_values() {
        let (container, router, calls) = setup();
        let request = Request::new("GET", "/users/42/posts/go,rust?sort=asc");
        let result = router.dispatch(&container, &request).unwrap();
        assert_eq!(result, json!([42, ["go", "rust"]]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let (_, router, _) = setup();
        assert!(router.match_route("get", "/users/1/posts/a").is_some());
        assert!(router.match_route("DELETE", "/users/1/posts/a").is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut router = Router::new();
        router.add_route("/items/{id}", "GET", "A", "show").unwrap();
        router.add_route("/items/special", "GET", "B", "special").unwrap();
        router.add_route("/items/{id}", "GET", "C", "show").unwrap();
        assert_eq!(router.len(), 3);

        let matched = router.match_route("GET", "/items/special").unwrap();
        assert_eq!(matched.entry.controller, "A");
        assert_eq!(matched.captures, vec!["special"]);
    }

    #[test]
    fn test_duplicate_registration_keeps_both() {
        let (_, mut router, _) = setup();
        router.register_from_declared("Posts").unwrap();
        assert_eq!(router.len(), 8);
        let matched = router.match_route("GET", "/users/1/posts/x").unwrap();
        assert_eq!(matched.entry.action, "tagged");
    }

    #[test]
    fn test_not_found() {
        let (container, router, _) = setup();
        let err = router
            .dispatch(&container, &Request::new("GET", "/nowhere?x=1"))
            .unwrap_err();
        assert_eq!(err.to_string(), "No route found for GET /nowhere");
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_object_from_json() {
        let (container, router, _) = setup();
        let request = Request::new("POST", "/users/9/posts").with_json(&json!({"title": "Hi"}));
        let result = router.dispatch(&container, &request).unwrap();
        assert_eq!(result, json!({"user": 9, "title": "Hi"}));
    }

    #[test]
    fn test_invalid_object_never_reaches_handler() {
        let (container, router, calls) = setup();
        let request = Request::new("POST", "/users/9/posts")
            .with_json(&json!({"title": "far too long a title"}));
        let err = router.dispatch(&container, &request).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.to_string(), "title: title must be at most 10 characters");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_source_rejected_at_registration() {
        let mut router = Router::new();
        router.declare(
            ControllerDeclaration::new("Posts").action(
                ActionDeclaration::post("create", "/posts")
                    .param(ParamSpec::object::<NewPost>("post"))
                    .handler(|_: &Posts, _| Ok(())),
            ),
        );
        let err = router.register_from_declared("Posts").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(router.is_empty());
    }

    #[test]
    fn test_missing_source_rejected_at_dispatch() {
        let (container, _, calls) = setup();
        let mut router = Router::new();
        router.declare(
            ControllerDeclaration::new("Posts").action(
                ActionDeclaration::post("create", "/posts")
                    .param(ParamSpec::object::<NewPost>("post"))
                    .handler(|_: &Posts, _| Ok(())),
            ),
        );
        router.add_route("/posts", "POST", "Posts", "create").unwrap();

        for body in [json!({"title": "ok"}), json!({}), json!(null)] {
            let request = Request::new("POST", "/posts").with_json(&body);
            let err = router.dispatch(&container, &request).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_undeclared_controller() {
        let mut router = Router::new();
        let err = router.register_from_declared("Ghost").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_action_without_handler() {
        let mut router = Router::new();
        router.declare(
            ControllerDeclaration::new("Posts").action(ActionDeclaration::get("index", "/")),
        );
        assert!(matches!(
            router.register_from_declared("Posts"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_handler_error_is_internal_dispatch() {
        let (container, router, _) = setup();
        match router
            .dispatch(&container, &Request::new("GET", "/users/fail"))
            .unwrap_err()
        {
            Error::InternalDispatch { action, source } => {
                assert_eq!(action, "Posts::fail");
                assert_eq!(source.to_string(), "database offline");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_handler_panic_is_internal_dispatch() {
        let (container, router, _) = setup();
        let err = router
            .dispatch(&container, &Request::new("GET", "/users/explode"))
            .unwrap_err();
        assert!(matches!(err, Error::InternalDispatch { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_unresolvable_controller_is_internal_dispatch() {
        let (_, router, _) = setup();
        let err = router
            .dispatch(&Container::new(), &Request::new("GET", "/users/fail"))
            .unwrap_err();
        match err {
            Error::InternalDispatch { source, .. } => assert!(matches!(
                source.downcast_ref::<Error>(),
                Some(Error::Resolution(ResolutionError::ServiceNotFound { .. }))
            )),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_circular_controller_is_reported_as_is() {
        let (_, router, _) = setup();
        let mut container = Container::new();
        container.register(
            TypeDescriptor::class("Posts")
                .dependency(Dependency::class("calls", "Posts"))
                .construct(|_| Ok(())),
        );
        let err = router
            .dispatch(&container, &Request::new("GET", "/users/fail"))
            .unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
    }

    #[test]
    fn test_register_controllers_uses_cache_outside_debug() {
        let cache = Arc::new(MemoryRouteCache::new());
        let finder = StaticFinder::new().with("/app/api", ["Posts"]);
        let dirs = vec![Path::new("/app/api").to_path_buf()];

        let mut first = Router::new().with_cache(cache.clone(), DEFAULT_ROUTE_TTL);
        first.declare(posts_declaration());
        first.register_controllers(&finder, &dirs).unwrap();
        assert_eq!(cache.get().map(|r| r.len()), Some(4));

        // The finder reports nothing now, so routes can only come from the cache.
        let mut second = Router::new().with_cache(cache.clone(), DEFAULT_ROUTE_TTL);
        second.declare(posts_declaration());
        second.register_controllers(&StaticFinder::new(), &dirs).unwrap();
        assert_eq!(second.entries(), first.entries());

        let mut debug = Router::new()
            .with_cache(cache, DEFAULT_ROUTE_TTL)
            .with_debug(true);
        debug.register_controllers(&StaticFinder::new(), &dirs).unwrap();
        assert!(debug.is_empty());
    }

    #[test]
    fn test_register_controllers_propagates_errors() {
        let finder = StaticFinder::new().with("/app/api", ["Unknown"]);
        let mut router = Router::new();
        let err = router
            .register_controllers(&finder, &[Path::new("/app/api").to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
