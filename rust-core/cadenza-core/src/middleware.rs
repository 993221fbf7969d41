//! # Middleware Pipeline
//!
//! Chain-of-responsibility around the terminal dispatch.
//!
//! Each layer receives the [`Context`] and a [`Next`] continuation; calling
//! `next.run(ctx)` hands over to the inner layers, returning early skips
//! them, the terminal dispatch included. Layers are resolved lazily: a
//! [`MiddlewareRef::Service`] is looked up in the container only when its
//! turn comes.
//!
//! Given `[A, B]` and terminal `T` the happy path runs
//! `A(enter) → B(enter) → T → B(exit) → A(exit)`.

use crate::container::Container;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Middleware trait for request/response interception
pub trait Middleware: Send + Sync {
    /// Process `ctx`, usually by delegating to `next` and adjusting its
    /// response
    ///
    /// # Errors
    ///
    /// Whatever the inner layers or the middleware itself raise.
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response>;

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Plain function middleware
pub type MiddlewareFn = Arc<dyn Fn(&mut Context, Next<'_>) -> Result<Response> + Send + Sync>;

/// Innermost step of the pipeline
pub type Terminal<'a> = &'a dyn Fn(&mut Context) -> Result<Response>;

/// One pipeline layer as registered
#[derive(Clone)]
pub enum MiddlewareRef {
    /// Middleware object used as-is
    Object(Arc<dyn Middleware>),
    /// Function called as `(ctx, next)`
    Callable(MiddlewareFn),
    /// Container identifier of an `Arc<dyn Middleware>` or a [`MiddlewareFn`]
    Service(String),
}

impl MiddlewareRef {
    /// Wrap a middleware object
    pub fn object<M: Middleware + 'static>(middleware: M) -> Self {
        Self::Object(Arc::new(middleware))
    }

    /// Wrap a function
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&mut Context, Next<'_>) -> Result<Response> + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(f))
    }

    /// Refer to a container service
    pub fn service(id: impl Into<String>) -> Self {
        Self::Service(id.into())
    }
}

impl From<&str> for MiddlewareRef {
    fn from(id: &str) -> Self {
        Self::service(id)
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(m) => f.debug_tuple("Object").field(&m.name()).finish(),
            Self::Callable(_) => f.write_str("Callable(..)"),
            Self::Service(id) => f.debug_tuple("Service").field(id).finish(),
        }
    }
}

/// Continuation over the remaining layers
pub struct Next<'a> {
    layers: &'a [MiddlewareRef],
    container: &'a Container,
    terminal: Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Run the remaining layers, then the terminal
    ///
    /// # Errors
    ///
    /// `Configuration` if a service layer resolves to something that is not
    /// a middleware; otherwise whatever the layers raise.
    pub fn run(self, ctx: &mut Context) -> Result<Response> {
        let Some((layer, rest)) = self.layers.split_first() else {
            return (self.terminal)(ctx);
        };
        let next = Next {
            layers: rest,
            container: self.container,
            terminal: self.terminal,
        };

        match layer {
            MiddlewareRef::Object(middleware) => middleware.handle(ctx, next),
            MiddlewareRef::Callable(f) => f(ctx, next),
            MiddlewareRef::Service(id) => {
                let instance = self.container.get(id)?;
                if let Some(middleware) = instance.downcast_ref::<Arc<dyn Middleware>>() {
                    return middleware.handle(ctx, next);
                }
                if let Some(f) = instance.downcast_ref::<MiddlewareFn>() {
                    return f(ctx, next);
                }
                Err(Error::configuration(format!("Invalid middleware: {id}")))
            }
        }
    }

    /// Number of layers still ahead
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.layers.len()
    }
}

/// Ordered middleware layers bound to a container
#[derive(Clone)]
pub struct MiddlewarePipeline {
    container: Arc<Container>,
    layers: Vec<MiddlewareRef>,
}

impl MiddlewarePipeline {
    /// Create a pipeline; the first layer is the outermost
    #[must_use]
    pub fn new(container: Arc<Container>, layers: Vec<MiddlewareRef>) -> Self {
        Self { container, layers }
    }

    /// Run `ctx` through every layer and finally `terminal`
    ///
    /// # Errors
    ///
    /// See [`Next::run`].
    pub fn handle(&self, ctx: &mut Context, terminal: Terminal<'_>) -> Result<Response> {
        Next {
            layers: &self.layers,
            container: &self.container,
            terminal,
        }
        .run(ctx)
    }

    /// Number of layers
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether there are no layers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

/// Ensures every request carries an `x-request-id` and echoes it back
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdMiddleware;

impl Middleware for RequestIdMiddleware {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response> {
        let request_id = match ctx.request.header("x-request-id") {
            Some(id) => id.to_string(),
            None => {
                let id = generate_request_id();
                ctx.request.set_header("x-request-id", &id);
                id
            }
        };
        ctx.set("request_id", request_id.as_str());

        let mut response = next.run(ctx)?;
        response.set_header("x-request-id", &request_id);
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "RequestIdMiddleware"
    }
}

/// Logs one line per request and one per response, with duration
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable header logging
    #[must_use]
    pub const fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response> {
        let method = ctx.request.method.clone();
        let path = ctx.request.path.clone();
        let request_id = ctx.get_str("request_id").unwrap_or("-").to_string();

        if self.log_headers {
            info!(
                method = %method,
                path = %path,
                request_id = %request_id,
                headers = ?ctx.request.headers_map(),
                "Request received"
            );
        } else {
            info!(method = %method, path = %path, request_id = %request_id, "Request received");
        }

        let start = Instant::now();
        let result = next.run(ctx);
        let status = match &result {
            Ok(response) => response.status,
            Err(err) => err.status(),
        };
        info!(
            method = %method,
            path = %path,
            status,
            request_id = %request_id,
            duration_ms = %start.elapsed().as_millis(),
            "Response sent"
        );
        result
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// CORS middleware - adds Cross-Origin Resource Sharing headers
///
/// `OPTIONS` preflight requests are answered directly with 204.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    fn decorate(&self, response: &mut Response) {
        response.set_header("Access-Control-Allow-Origin", &self.allow_origin);
        response.set_header("Access-Control-Allow-Methods", &self.allow_methods);
        response.set_header("Access-Control-Allow-Headers", &self.allow_headers);
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response> {
        let mut response = if ctx.request.method == "OPTIONS" {
            Response::empty(204)
        } else {
            next.run(ctx)?
        };
        self.decorate(&mut response);
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}

/// Token bucket rate limiting middleware, keyed by `x-client-ip`
pub struct RateLimitMiddleware {
    /// Maximum burst capacity
    capacity: u64,
    /// Tokens refilled per second
    refill_per_sec: u64,
    /// Per-key buckets
    state: Mutex<HashMap<String, Bucket>>,
}

/// Internal token bucket state
struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl RateLimitMiddleware {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Take a token for `key`; buckets that refilled completely are
    /// dropped whenever a new key shows up
    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut map = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !map.contains_key(key) {
            map.retain(|_, b| b.tokens.saturating_add(self.refill(b, now)) < self.capacity);
        }
        let bucket = map.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        let refill = self.refill(bucket, now);
        if refill > 0 {
            bucket.tokens = bucket.tokens.saturating_add(refill).min(self.capacity);
            bucket.last_refill = now;
        }
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn refill(&self, bucket: &Bucket, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        (elapsed.as_secs_f64() * self.refill_per_sec as f64) as u64
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.state.lock().map_or(0, |m| m.len())
    }
}

impl fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish_non_exhaustive()
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response> {
        let key = ctx.request.header("x-client-ip").unwrap_or("unknown").to_string();
        if self.allow(&key) {
            next.run(ctx)
        } else {
            warn!(client = %key, "Rate limit exceeded");
            Ok(Response::error(429, "Rate limit exceeded"))
        }
    }

    fn name(&self) -> &'static str {
        "RateLimitMiddleware"
    }
}

/// Authentication Configuration (JWT)
#[derive(Clone)]
pub struct AuthConfig {
    /// JWT decoding key
    pub decoding_key: DecodingKey,
    /// JWT validation settings
    pub validation: Validation,
}

impl AuthConfig {
    /// Create auth config from shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

/// Bearer-token authentication (HS256 JWT)
///
/// Verified claims are stored in the context under `claims`.
pub struct AuthMiddleware {
    config: AuthConfig,
    public_prefixes: Vec<String>,
}

impl AuthMiddleware {
    /// Require a token signed with `secret`
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            config: AuthConfig::new(secret),
            public_prefixes: Vec::new(),
        }
    }

    /// Let requests under `prefix` through without a token
    #[must_use]
    pub fn except(mut self, prefix: impl Into<String>) -> Self {
        self.public_prefixes.push(prefix.into());
        self
    }

    fn is_public(&self, path: &str) -> bool {
        self.public_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMiddleware")
            .field("public_prefixes", &self.public_prefixes)
            .finish_non_exhaustive()
    }
}

impl Middleware for AuthMiddleware {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response> {
        if self.is_public(&ctx.request.path) {
            return next.run(ctx);
        }

        let Some(token) = ctx
            .request
            .header("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
        else {
            return Ok(Response::error(401, "Missing or invalid Authorization header"));
        };

        match decode::<serde_json::Value>(token, &self.config.decoding_key, &self.config.validation) {
            Ok(token_data) => {
                ctx.set("claims", token_data.claims);
                next.run(ctx)
            }
            Err(e) => {
                warn!("JWT validation failed: {}", e);
                Ok(Response::error(401, "Unauthorized"))
            }
        }
    }

    fn name(&self) -> &'static str {
        "AuthMiddleware"
    }
}
