//! HTTP gateway.
//!
//! Accepts every method and path via an axum fallback route, resolves the
//! request's scope from its URI path, buffers the body and runs the request
//! through the pipeline. The handler waits for the terminal reply; if the
//! client goes away first, dropping the handler future terminates the
//! pipeline request. Shutdown terminates every in-flight request, and their
//! clients receive 503.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DEFAULT_MAX_BODY_SIZE, Result};
use crate::config::ScopeTree;
use crate::error::TransportError;
use crate::expr::RequestContext;
use crate::observability::metrics;
use crate::pipeline::{Pipeline, Reply, Request};

/// Configuration for the HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Address to bind to, e.g. `"0.0.0.0:8080"`.
    pub bind_addr: String,
    /// Maximum buffered request body in bytes.
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: crate::config::schema::DEFAULT_LISTEN.to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Shared state between the axum handler and `HttpGateway`.
struct GatewayState {
    pipeline: Arc<Pipeline>,
    scopes: Arc<ScopeTree>,
    inflight: Arc<DashMap<u64, Arc<Request>>>,
    next_request_id: AtomicU64,
    max_body_size: usize,
    cancel: CancellationToken,
}

impl GatewayState {
    fn new(
        pipeline: Arc<Pipeline>,
        scopes: Arc<ScopeTree>,
        max_body_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            scopes,
            inflight: Arc::new(DashMap::new()),
            next_request_id: AtomicU64::new(1),
            max_body_size,
            cancel,
        }
    }
}

/// RAII guard that untracks a request and terminates it on drop.
///
/// Termination is a no-op for a request that already produced its reply,
/// so this only has an effect when the handler future is dropped early
/// (client disconnect).
struct InflightGuard {
    inflight: Arc<DashMap<u64, Arc<Request>>>,
    request: Arc<Request>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.request.id());
        self.request.terminate();
    }
}

/// A bound HTTP gateway serving in the background.
pub struct HttpGateway {
    shared: Arc<GatewayState>,
    server_handle: JoinHandle<Result<()>>,
}

impl HttpGateway {
    /// Binds the gateway to the configured address and starts serving.
    ///
    /// Returns the gateway and the actual bound address (useful when binding
    /// to port 0 in tests). Cancelling `cancel` shuts the gateway down.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the TCP listener cannot bind.
    pub async fn bind(
        config: HttpConfig,
        pipeline: Arc<Pipeline>,
        scopes: Arc<ScopeTree>,
        cancel: CancellationToken,
    ) -> Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {e}", config.bind_addr)))?;

        let bound_addr = listener.local_addr()?;

        let shared = Arc::new(GatewayState::new(
            pipeline,
            scopes,
            config.max_body_size,
            cancel.clone(),
        ));

        let router = router_with_state(Arc::clone(&shared));
        let service = router.into_make_service_with_connect_info::<SocketAddr>();

        let inflight = Arc::clone(&shared.inflight);
        let server_handle = tokio::spawn(async move {
            info!(%bound_addr, "HTTP gateway listening");
            let result = axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                    terminate_all(&inflight);
                })
                .await;
            debug!("HTTP gateway shut down");
            result.map_err(TransportError::Io)
        });

        Ok((
            Self {
                shared,
                server_handle,
            },
            bound_addr,
        ))
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.shared.inflight.len()
    }

    /// Starts a graceful shutdown.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    /// Waits until the server loop has stopped.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the server loop failed or panicked.
    pub async fn wait(self) -> Result<()> {
        self.server_handle
            .await
            .map_err(|e| TransportError::Serve(e.to_string()))?
    }
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("inflight", &self.shared.inflight.len())
            .finish_non_exhaustive()
    }
}

fn terminate_all(inflight: &DashMap<u64, Arc<Request>>) {
    let requests: Vec<Arc<Request>> = inflight.iter().map(|e| Arc::clone(e.value())).collect();
    if !requests.is_empty() {
        info!(count = requests.len(), "terminating in-flight requests");
    }
    for request in requests {
        request.terminate();
    }
}

// ============================================================================
// Axum Router
// ============================================================================

/// Builds a standalone router serving `pipeline`.
///
/// The caller must provide `ConnectInfo<SocketAddr>`, either through
/// `into_make_service_with_connect_info` or a `MockConnectInfo` layer.
pub fn build_router(pipeline: Arc<Pipeline>, scopes: Arc<ScopeTree>, max_body_size: usize) -> Router {
    router_with_state(Arc::new(GatewayState::new(
        pipeline,
        scopes,
        max_body_size,
        CancellationToken::new(),
    )))
}

fn router_with_state(shared: Arc<GatewayState>) -> Router {
    // Overrides axum's 2MB default; bodies beyond the limit get 413
    let body_limit = DefaultBodyLimit::max(shared.max_body_size);

    Router::new()
        .fallback(handle_request)
        .layer(body_limit)
        .with_state(shared)
}

/// Fallback handler for every method and path.
async fn handle_request(
    State(shared): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    parts: Parts,
    body: Bytes,
) -> Response {
    if shared.cancel.is_cancelled() {
        return Reply::status(StatusCode::SERVICE_UNAVAILABLE).into_response();
    }

    let id = shared.next_request_id.fetch_add(1, Ordering::SeqCst);
    let context = RequestContext::from_parts(&parts, addr);
    let scope = shared.scopes.resolve(context.path());
    debug!(
        request = id,
        request_id = %context.request_id,
        method = %context.method,
        uri = %context.uri,
        "request received"
    );

    let (request, reply_rx) = Request::new(id, context, body, scope);
    shared.inflight.insert(id, Arc::clone(&request));
    let _guard = InflightGuard {
        inflight: Arc::clone(&shared.inflight),
        request: Arc::clone(&request),
    };

    // Shutdown may have swept the in-flight map before the insert
    if shared.cancel.is_cancelled() {
        request.terminate();
    } else {
        shared.pipeline.start(&request);
    }

    let reply = reply_rx
        .await
        .unwrap_or_else(|_| Reply::status(StatusCode::SERVICE_UNAVAILABLE));
    metrics::record_request(reply.status.as_u16(), request.received_at().elapsed());
    reply.into_response()
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses a bind address string into a full `host:port` form.
///
/// Accepts:
/// - `:8080` → `0.0.0.0:8080`
/// - `8080` → `0.0.0.0:8080`
/// - `1.2.3.4:8080` → as-is
///
/// # Errors
///
/// Returns [`TransportError::InvalidAddress`] if the result cannot be
/// parsed as a valid socket address.
pub fn parse_bind_addr(input: &str) -> Result<String> {
    let addr = if input.starts_with(':') {
        format!("0.0.0.0{input}")
    } else if input.parse::<u16>().is_ok() {
        format!("0.0.0.0:{input}")
    } else {
        input.to_string()
    };
    addr.parse::<SocketAddr>().map_err(|e| {
        TransportError::InvalidAddress(format!("invalid bind address \"{input}\": {e}"))
    })?;
    Ok(addr)
}

// ============================================================================
// Tests
// ============================================================================
