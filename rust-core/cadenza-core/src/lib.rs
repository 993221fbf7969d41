//! # Cadenza Core
//!
//! Core runtime library for the Cadenza request-dispatch framework.
//! Turns declared services and declared routes into running request
//! handling.
//!
//! ## Architecture
//!
//! Three tightly coupled components do the work:
//!
//! - a dependency **container** that builds object graphs on demand,
//! - a **router** that matches a request, binds handler parameters and
//!   invokes the handler it resolved through the container,
//! - a **middleware pipeline** that wraps the router's dispatch.
//!
//! Everything is registered once through an [`ApplicationBuilder`] and read
//! concurrently afterwards.
//!
//! ## Modules
//!
//! - `container` - Dependency container and type descriptors
//! - `router` - Ordered route table, matching and dispatch
//! - `route` - Route entries, compiled patterns, controller declarations
//! - `binding` - Parameter specs and argument binding
//! - `middleware` - Middleware pipeline and stock middleware
//! - `app` - Application kernel
//! - `server` - HTTP server built on Hyper
//! - `request` / `response` / `context` - Request-scoped data
//! - `cache` - Route table caches
//! - `discovery` - Controller directories and finders
//! - `validation` - Validator collaborator and structured errors
//! - `config` - Application and server settings
//! - `json` - High-performance JSON parsing with simd-json
//! - `types` - Parameter kinds, values and coercion
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod app;
pub mod binding;
pub mod cache;
pub mod config;
pub mod container;
pub mod context;
pub mod discovery;
pub mod error;
pub mod json;
pub mod middleware;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod types;
pub mod validation;

pub use app::{Application, ApplicationBuilder};
pub use binding::{Arguments, ParamSpec, Source};
pub use cache::{FileRouteCache, MemoryRouteCache, RouteCache};
pub use config::{AppConfig, ServerConfig};
pub use container::{Container, Definition, Dependency, Resolution, TypeDescriptor};
pub use context::Context;
pub use discovery::{resolve_controller_directories, ControllerFinder, StaticFinder};
pub use error::{Error, ResolutionError, Result};
pub use json::{parse_json, to_json};
pub use middleware::{
    AuthMiddleware, CorsMiddleware, LoggingMiddleware, Middleware, MiddlewarePipeline,
    MiddlewareRef, Next, RateLimitMiddleware, RequestIdMiddleware,
};
pub use request::{Request, UploadedFile};
pub use response::Response;
pub use route::{ActionDeclaration, ControllerDeclaration, Method, RouteEntry};
pub use router::Router;
pub use server::Server;
pub use types::{ParamKind, ParamValue};
pub use validation::{
    ConstraintValidator, FieldError, Validate, ValidationCode, ValidationErrors, Validator,
    ValueObject, VALIDATOR_SERVICE,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
