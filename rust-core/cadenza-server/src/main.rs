//! # Cadenza Server
//!
//! Demonstration service: wires the user directory controllers into a
//! Cadenza application and serves it over HTTP.
//!
//! Settings come from `CADENZA_*` environment variables, see
//! [`AppConfig::from_env`].

mod users;

use cadenza_core::{
    AppConfig, Application, AuthMiddleware, ConstraintValidator, CorsMiddleware, Definition,
    FileRouteCache, LoggingMiddleware, MiddlewareRef, RateLimitMiddleware, RequestIdMiddleware,
    RouteCache, Server, StaticFinder, Validator, VALIDATOR_SERVICE,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_json)?;

    let app = build_application(&config)?;
    info!(
        routes = app.router().len(),
        debug = config.debug,
        version = cadenza_core::VERSION,
        "Application ready"
    );

    Server::new(app)
        .with_config(config.server.clone())
        .serve()
        .await?;
    Ok(())
}

/// Initialize tracing for the binary
fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("cadenza=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    Ok(())
}

fn build_application(config: &AppConfig) -> cadenza_core::Result<Application> {
    let cache: Arc<dyn RouteCache> = Arc::new(FileRouteCache::new(&config.base_path));
    let mut builder = Application::builder().config(config, Some(cache));

    users::register_services(builder.container_mut());
    let validator: Arc<dyn Validator> = Arc::new(ConstraintValidator);
    builder
        .container_mut()
        .set(VALIDATOR_SERVICE, Definition::instance(validator));
    for declaration in users::declarations() {
        builder.router_mut().declare(declaration);
    }

    let api = config.base_path.join("api");
    let finder = StaticFinder::new().with(api.clone(), users::CONTROLLERS);
    let mut directories = vec![api];
    directories.extend(config.controller_directories.iter().cloned());
    directories.dedup();

    builder = builder
        .middleware(MiddlewareRef::object(RequestIdMiddleware))
        .middleware(MiddlewareRef::object(LoggingMiddleware::new()))
        .middleware(MiddlewareRef::object(CorsMiddleware::new()))
        .middleware(MiddlewareRef::object(RateLimitMiddleware::new(100, 50)));
    if let Some(secret) = &config.jwt_secret {
        builder = builder.middleware(MiddlewareRef::object(
            AuthMiddleware::new(secret).except("/health"),
        ));
    }

    Ok(builder.controllers(&finder, &directories)?.build())
}
