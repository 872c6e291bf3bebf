//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection. Connections are
//! tracked by a graceful-shutdown watcher so a signal drains in-flight
//! requests before the process exits.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::roots::RootRegistry;
use crate::routes;
use crate::server::tls;
use crate::types::CaError;

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub registry: RootRegistry,
    /// Bounds concurrent signing requests
    pub admission: Semaphore,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, registry: RootRegistry) -> Self {
        let admission = Semaphore::new(args.max_in_flight);
        Self {
            args,
            registry,
            admission,
            started_at: Instant::now(),
        }
    }
}

/// Bind the configured address and serve until SIGINT/SIGTERM
pub async fn run(state: Arc<AppState>) -> Result<(), CaError> {
    let addr = state.args.listen;
    let listener = TcpListener::bind(addr).await.map_err(|e| CaError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), CaError> {
    let acceptor = match (&state.args.tls_cert, &state.args.tls_key) {
        (Some(cert), Some(key)) => Some(tls::acceptor(cert, key)?),
        _ => None,
    };

    let local = listener.local_addr()?;
    info!(
        "multirootca listening on {}://{} with {} root(s): {}",
        if acceptor.is_some() { "https" } else { "http" },
        local,
        state.registry.len(),
        state.registry.labels().join(", ")
    );
    match state.args.default_label() {
        Some(label) if state.registry.lookup(label).is_none() => {
            warn!("Default label '{}' does not name a loaded root", label);
        }
        Some(label) => info!("Default label: {}", label),
        None => info!("No default label; requests must name a root"),
    }

    let graceful = GracefulShutdown::new();
    let mut shutdown = std::pin::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("Error accepting connection: {:?}", e);
                        continue;
                    }
                };

                let state = Arc::clone(&state);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(state, addr, req).await }
                });
                let watcher = graceful.watcher();
                let acceptor = acceptor.clone();

                tokio::spawn(async move {
                    let result = match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                let conn = http1::Builder::new()
                                    .serve_connection(TokioIo::new(tls_stream), service);
                                watcher.watch(conn).await
                            }
                            Err(e) => {
                                debug!("TLS handshake with {} failed: {}", addr, e);
                                return;
                            }
                        },
                        None => {
                            let conn = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service);
                            watcher.watch(conn).await
                        }
                    };
                    if let Err(err) = result {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    drop(listener);
    let grace = Duration::from_secs(state.args.shutdown_grace_secs);
    tokio::select! {
        _ = graceful.shutdown() => info!("All connections closed"),
        _ = tokio::time::sleep(grace) => {
            warn!("Shutdown grace period of {:?} elapsed with connections still open", grace);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::POST, "/api/v1/cfssl/authsign") => match read_body(req.into_body()).await {
            Ok(body) => routes::authsign::handle(&state, addr.ip(), &body).await,
            Err(e) => routes::error_response(&e),
        },
        (method, "/api/v1/cfssl/authsign") => routes::error_response(&CaError::MethodNotAllowed(
            format!("{} not allowed on /api/v1/cfssl/authsign", method),
        )),

        (Method::GET, "/api/v1/cfssl/info") => {
            let query = req.uri().query().unwrap_or("").to_string();
            routes::info::handle_query(&state, &query)
        }
        (Method::POST, "/api/v1/cfssl/info") => match read_body(req.into_body()).await {
            Ok(body) => routes::info::handle_body(&state, &body),
            Err(e) => routes::error_response(&e),
        },
        (method, "/api/v1/cfssl/info") => routes::error_response(&CaError::MethodNotAllowed(
            format!("{} not allowed on /api/v1/cfssl/info", method),
        )),

        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health::health_check(&state),

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// Collect a request body, refusing anything over `MAX_BODY_BYTES`
async fn read_body(body: Incoming) -> Result<Bytes, CaError> {
    Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| CaError::MalformedRequest(format!("cannot read request body: {}", e)))
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    routes::json_response(StatusCode::NOT_FOUND, &body)
}
