//! # Configuration
//!
//! Application and HTTP server settings, with `CADENZA_*` environment
//! overrides.

use crate::cache::DEFAULT_ROUTE_TTL;
use crate::discovery::resolve_controller_directories;
use crate::error::{Error, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Expose internal error details and bypass the route cache
    pub debug: bool,
    /// Project root; controller directories and the route cache live below it
    pub base_path: PathBuf,
    /// Directories handed to the controller finder, in registration order
    pub controller_directories: Vec<PathBuf>,
    /// Lifetime of a stored route table
    pub route_cache_ttl: Duration,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// HS256 secret for bearer-token authentication
    pub jwt_secret: Option<String>,
    /// HTTP server settings
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            base_path: PathBuf::from("."),
            controller_directories: Vec::new(),
            route_cache_ttl: DEFAULT_ROUTE_TTL,
            log_json: false,
            jwt_secret: None,
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Configuration from the process environment
    ///
    /// # Errors
    ///
    /// `Configuration` if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Configuration from an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// See [`AppConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("CADENZA_DEBUG") {
            config.debug = parse_flag("CADENZA_DEBUG", &value)?;
        }
        if let Some(value) = lookup("CADENZA_LOG_JSON") {
            config.log_json = parse_flag("CADENZA_LOG_JSON", &value)?;
        }
        config.base_path = match lookup("CADENZA_BASE_PATH") {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => env::current_dir()?,
        };
        if let Some(address) = lookup("CADENZA_ADDRESS") {
            config.server.address = address.parse().map_err(|_| {
                Error::configuration(format!("CADENZA_ADDRESS is not a socket address: {address}"))
            })?;
        }
        if let Some(size) = lookup("CADENZA_MAX_BODY_SIZE") {
            config.server.max_body_size = size.parse().map_err(|_| {
                Error::configuration(format!("CADENZA_MAX_BODY_SIZE is not a byte count: {size}"))
            })?;
        }
        config.jwt_secret = lookup("CADENZA_JWT_SECRET").filter(|secret| !secret.is_empty());
        config.controller_directories = resolve_controller_directories(&config.base_path);

        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::configuration(format!("{key} is not a boolean: {other}"))),
    }
}
