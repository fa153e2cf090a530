//! Content-phase handlers.
//!
//! [`StaticContent`] answers every request with a configured response.
//! [`UpstreamProxy`] forwards the request to an upstream base URL on a
//! spawned task; the task holds its own outstanding-work reference, and
//! termination aborts it through a cleanup hook.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;
use reqwest::Url;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::schema::StaticResponse;
use crate::error::TransportError;
use crate::observability::metrics;
use crate::pipeline::{PhaseContext, PhaseHandler, PhaseOutcome, Pipeline, Reply, Request};

/// Hop-by-hop headers, never forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// ============================================================================
// Static content
// ============================================================================

/// Serves a fixed response.
#[derive(Debug, Clone)]
pub struct StaticContent {
    reply: Reply,
}

impl StaticContent {
    /// Builds the handler from the configured response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] if the status is not a
    /// valid status code or the content type is not a valid header value.
    pub fn new(response: &StaticResponse) -> Result<Self, TransportError> {
        let status = StatusCode::from_u16(response.status).map_err(|e| {
            TransportError::InvalidAddress(format!("static status {}: {e}", response.status))
        })?;

        let mut headers = HeaderMap::new();
        if let Some(content_type) = &response.content_type {
            let value = HeaderValue::from_str(content_type).map_err(|e| {
                TransportError::InvalidAddress(format!("content type '{content_type}': {e}"))
            })?;
            headers.insert(header::CONTENT_TYPE, value);
        }

        Ok(Self {
            reply: Reply::new(status, headers, Bytes::from(response.body.clone())),
        })
    }
}

impl Default for StaticContent {
    fn default() -> Self {
        Self {
            reply: Reply::new(StatusCode::OK, HeaderMap::new(), Bytes::new()),
        }
    }
}

impl PhaseHandler for StaticContent {
    fn name(&self) -> &'static str {
        "static_content"
    }

    fn handle(&self, _cx: &PhaseContext<'_>) -> PhaseOutcome {
        PhaseOutcome::Complete(self.reply.clone())
    }
}

// ============================================================================
// Upstream proxy
// ============================================================================

/// Forwards requests to an upstream server.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    client: reqwest::Client,
    base: Url,
}

impl UpstreamProxy {
    /// Creates a proxy for `base` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] if the HTTP client cannot
    /// be built.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::InvalidAddress(format!("upstream client: {e}")))?;
        Ok(Self { client, base })
    }

    /// Upstream URL for a request path and query.
    #[must_use]
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{base_path}{path}"));
        url.set_query(query);
        url
    }

    async fn forward(&self, request: &Request) -> Result<Reply, reqwest::Error> {
        let ctx = request.context();
        let url = self.target_url(ctx.path(), ctx.uri.query());

        let mut headers = strip_hop_by_hop(&ctx.headers);
        headers.remove(header::HOST);

        let response = self
            .client
            .request(ctx.method.clone(), url)
            .headers(headers)
            .body(request.body().clone())
            .send()
            .await?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response.bytes().await?;
        Ok(Reply::new(status, headers, body))
    }
}

impl PhaseHandler for UpstreamProxy {
    fn name(&self) -> &'static str {
        "upstream_proxy"
    }

    fn handle(&self, cx: &PhaseContext<'_>) -> PhaseOutcome {
        let Ok(runtime) = Handle::try_current() else {
            warn!(request = cx.request.id(), "no runtime available for upstream proxy");
            return PhaseOutcome::Finalize(StatusCode::INTERNAL_SERVER_ERROR);
        };

        let request = Arc::clone(cx.request);
        request.retain();
        let hold = Outstanding(Arc::clone(&request));
        let proxy = self.clone();

        let task = runtime.spawn(async move {
            let _hold = hold;
            match proxy.forward(&request).await {
                Ok(reply) => {
                    debug!(
                        request = request.id(),
                        status = reply.status.as_u16(),
                        "upstream responded"
                    );
                    request.complete(reply);
                }
                Err(e) => {
                    let (kind, status) = classify(&e);
                    warn!(request = request.id(), error = %e, kind, "upstream request failed");
                    metrics::record_upstream_error(kind);
                    Pipeline::finalize(&request, status);
                }
            }
        });

        let abort = task.abort_handle();
        cx.request.add_cleanup(move |_| abort.abort());
        PhaseOutcome::Pending
    }
}

/// Releases one outstanding-work reference when dropped, including when
/// the owning task is aborted.
struct Outstanding(Arc<Request>);

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn classify(error: &reqwest::Error) -> (&'static str, StatusCode) {
    if error.is_timeout() {
        ("timeout", StatusCode::GATEWAY_TIMEOUT)
    } else if error.is_connect() {
        ("connect", StatusCode::BAD_GATEWAY)
    } else {
        ("other", StatusCode::BAD_GATEWAY)
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(HeaderName::from_static(name));
    }
    out
}
