//! # HTTP Server
//!
//! Hosts an [`Application`] on Hyper and Tokio.
//!
//! ## Key Features
//!
//! - Async accept loop; the synchronous dispatch runs on the blocking pool
//! - Graceful shutdown on Ctrl-C with a bounded drain period
//! - Request body size limit (413 before dispatch)
//! - Connection keep-alive support

use crate::app::Application;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use http_body_util::Full;
pub use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// HTTP host for an [`Application`]
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
    app: Arc<Application>,
}

impl Server {
    /// Create a server with default settings
    #[must_use]
    pub fn new(app: Application) -> Self {
        Self {
            config: ServerConfig::default(),
            app: Arc::new(app),
        }
    }

    /// Replace the server settings
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind the server to an address
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Set max request body size
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Current settings
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the server with graceful shutdown
    ///
    /// # Errors
    ///
    /// `Bind` if the listening socket cannot be set up, `Io` if accepting
    /// fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;
        let bind_error = |source| Error::Bind {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        #[cfg(not(windows))]
        {
            socket.set_reuseport(true).map_err(bind_error)?;
        }
        socket.bind(addr).map_err(bind_error)?;

        let listener = socket.listen(1024).map_err(bind_error)?;

        info!("Server listening on http://{}", addr);

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);

                    let app = Arc::clone(&self.app);
                    let active = Arc::clone(&active);

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service_fn(move |req| {
                                let app = Arc::clone(&app);
                                async move {
                                    let method = req.method().clone();
                                    let path = req.uri().path().to_string();
                                    let version = format!("{:?}", req.version());

                                    let response = handle_request(req, app, remote_addr, max_body_size).await;
                                    info!("    {} - \"{} {} {}\" {}",
                                        remote_addr,
                                        method,
                                        path,
                                        version,
                                        response.status()
                                    );
                                    Ok::<_, std::convert::Infallible>(response)
                                }
                            }))
                            .await
                        {
                            error!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = shutdown_signal() => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout;
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            info!(
                open = active.load(Ordering::Relaxed),
                "Drain timeout elapsed, closing remaining connections"
            );
        }
        Ok(())
    }

    /// Execute a test request directly without network stack
    pub async fn test_request(&self, request: Request) -> Response {
        let size = request.body_bytes().map_or(0, <[u8]>::len);
        if size > self.config.max_body_size {
            return Response::from_error(
                &Error::PayloadTooLarge {
                    limit: self.config.max_body_size,
                    actual: size,
                },
                self.app.debug(),
            );
        }
        let mut request = request;
        request.set_header("x-client-ip", "test");
        run_blocking(Arc::clone(&self.app), request).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Dispatch on the blocking pool; the pipeline is synchronous
async fn run_blocking(app: Arc<Application>, request: Request) -> Response {
    match tokio::task::spawn_blocking(move || app.handle(request)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Dispatch task failed: {}", e);
            Response::error(500, "Internal Server Error")
        }
    }
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    app: Arc<Application>,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> hyper::Response<Full<Bytes>> {
    let mut request = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(r) => r,
        Err(e @ Error::PayloadTooLarge { .. }) => {
            return into_hyper(Response::from_error(&e, app.debug()));
        }
        Err(e) => {
            error!("Failed to parse request: {}", e);
            return into_hyper(Response::error(400, "Bad Request"));
        }
    };

    request.set_header("x-client-ip", &remote_addr.ip().to_string());
    into_hyper(run_blocking(app, request).await)
}

/// Convert to hyper Response
fn into_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = hyper::Response::builder()
        .status(status)
        .header("Content-Type", &response.content_type);
    for (k, v) in &response.headers {
        builder = builder.header(k.as_str(), v.as_str());
    }

    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|e| {
            error!("Invalid response header: {}", e);
            let mut fallback = hyper::Response::new(Full::new(Bytes::from("Internal Server Error")));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}
