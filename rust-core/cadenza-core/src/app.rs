//! # Application Kernel
//!
//! Ties the container, the router and the middleware pipeline together.
//!
//! [`ApplicationBuilder`] is the registration phase: everything is mutable
//! and nothing serves traffic. [`ApplicationBuilder::build`] freezes the
//! result into an [`Application`] whose state is shared read-only between
//! workers.

use crate::cache::RouteCache;
use crate::config::AppConfig;
use crate::container::Container;
use crate::context::Context;
use crate::discovery::ControllerFinder;
use crate::error::{Error, Result};
use crate::middleware::{MiddlewarePipeline, MiddlewareRef};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

/// Frozen application: handles requests from any thread
#[derive(Debug, Clone)]
pub struct Application {
    container: Arc<Container>,
    router: Arc<Router>,
    pipeline: MiddlewarePipeline,
    debug: bool,
}

impl Application {
    /// Start a registration phase
    #[must_use]
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Run `request` through the pipeline and the router
    ///
    /// Never fails: every error is rendered by [`Response::from_error`].
    pub fn handle(&self, request: Request) -> Response {
        let mut ctx = Context::new(request);
        let router = &self.router;
        let container = &self.container;
        let terminal = |ctx: &mut Context| -> Result<Response> {
            router
                .dispatch(container, &ctx.request)
                .map(|value| Response::from_value(&value))
        };

        match self.pipeline.handle(&mut ctx, &terminal) {
            Ok(response) => response,
            Err(err) => {
                self.report(&ctx, &err);
                Response::from_error(&err, self.debug)
            }
        }
    }

    fn report(&self, ctx: &Context, err: &Error) {
        let method = &ctx.request.method;
        let path = &ctx.request.path;
        if err.is_client_error() {
            debug!(method = %method, path = %path, error = %err, "Request rejected");
        } else {
            error!(method = %method, path = %path, error = ?err, "Dispatch failed");
        }
    }

    /// The shared container
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// The frozen router
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Whether internal error details are exposed
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }
}

/// Registration phase of an [`Application`]
#[derive(Debug, Default)]
pub struct ApplicationBuilder {
    container: Container,
    router: Router,
    middleware: Vec<MiddlewareRef>,
    debug: bool,
}

impl ApplicationBuilder {
    /// Empty builder, debug off
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `config`: debug flag, plus route caching outside debug mode
    #[must_use]
    pub fn config(self, config: &AppConfig, cache: Option<Arc<dyn RouteCache>>) -> Self {
        let mut builder = self.debug(config.debug);
        if let Some(cache) = cache {
            builder.router = mem::take(&mut builder.router).with_cache(cache, config.route_cache_ttl);
        }
        builder
    }

    /// Toggle debug mode
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self.router = mem::take(&mut self.router).with_debug(debug);
        self
    }

    /// Append a middleware layer; the first appended is the outermost
    #[must_use]
    pub fn middleware(mut self, layer: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(layer.into());
        self
    }

    /// Container under registration
    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    /// Router under registration
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Register every controller `finder` reports under `directories`
    ///
    /// # Errors
    ///
    /// See [`Router::register_controllers`].
    pub fn controllers(
        mut self,
        finder: &dyn ControllerFinder,
        directories: &[PathBuf],
    ) -> Result<Self> {
        self.router.register_controllers(finder, directories)?;
        Ok(self)
    }

    /// Freeze registration
    #[must_use]
    pub fn build(self) -> Application {
        let container = Arc::new(self.container);
        let pipeline = MiddlewarePipeline::new(Arc::clone(&container), self.middleware);
        debug!(
            routes = self.router.len(),
            middleware = pipeline.len(),
            debug = self.debug,
            "Application built"
        );
        Application {
            container,
            router: Arc::new(self.router),
            pipeline,
            debug: self.debug,
        }
    }
}
