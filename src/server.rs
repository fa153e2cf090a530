//! Gateway runtime.
//!
//! The [`Server`] wires a loaded configuration into a pipeline (the delay
//! and block entry point at the rewrite phase, then upstream proxying or
//! static content) and serves it over the HTTP gateway until cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ScopeTree;
use crate::config::schema::{DEFAULT_LISTEN, DEFAULT_UPSTREAM_TIMEOUT, GatewayConfig};
use crate::engine::{self, TokioTimer};
use crate::error::{ConfigError, StallgateError};
use crate::expr::VariableEvaluator;
use crate::pipeline::content::{StaticContent, UpstreamProxy};
use crate::pipeline::{Phase, Pipeline, PipelineBuilder};
use crate::transport::http::{HttpConfig, HttpGateway, parse_bind_addr};
use crate::transport::DEFAULT_MAX_BODY_SIZE;

/// Options for constructing a [`Server`].
pub struct ServerOptions {
    /// Frozen configuration.
    pub config: Arc<GatewayConfig>,
    /// Compiled scopes.
    pub scopes: Arc<ScopeTree>,
    /// CLI override for `server.listen`.
    pub listen: Option<String>,
    /// CLI override for `server.upstream`.
    pub upstream: Option<String>,
    /// Cancellation token for cooperative shutdown.
    pub cancel: CancellationToken,
}

/// A running gateway.
pub struct Server {
    gateway: HttpGateway,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Server {
    /// Builds the pipeline and binds the listener.
    ///
    /// # Errors
    ///
    /// Returns a config error for an unusable override, upstream URL or
    /// timeout, or a transport error if binding fails.
    pub async fn start(opts: ServerOptions) -> Result<Self, StallgateError> {
        let settings = &opts.config.server;

        let listen = opts
            .listen
            .as_deref()
            .or(settings.listen.as_deref())
            .unwrap_or(DEFAULT_LISTEN);
        let bind_addr = parse_bind_addr(listen)?;

        let upstream = opts.upstream.as_deref().or(settings.upstream.as_deref());
        let pipeline = build_pipeline(&opts.config, upstream)?;

        let http_config = HttpConfig {
            bind_addr,
            max_body_size: settings.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE),
        };
        let (gateway, local_addr) =
            HttpGateway::bind(http_config, pipeline, opts.scopes, opts.cancel.clone()).await?;

        Ok(Self {
            gateway,
            local_addr,
            cancel: opts.cancel,
        })
    }

    /// Address the gateway is listening on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.gateway.inflight()
    }

    /// Serves until the cancellation token fires, then drains.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the server loop fails.
    pub async fn run(self) -> Result<(), StallgateError> {
        self.cancel.cancelled().await;
        info!("shutting down gateway");
        self.gateway.wait().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Builds the request pipeline for `config`.
///
/// `upstream` takes precedence over `config.server.upstream`; without
/// either, the configured static response (or an empty 200) is served.
///
/// # Errors
///
/// Returns a config error if the upstream URL, upstream timeout or static
/// response is unusable.
pub fn build_pipeline(
    config: &GatewayConfig,
    upstream: Option<&str>,
) -> Result<Arc<Pipeline>, StallgateError> {
    let mut builder = PipelineBuilder::new();
    engine::install(
        &mut builder,
        Arc::new(VariableEvaluator),
        Arc::new(TokioTimer),
    );

    let settings = &config.server;
    let upstream = upstream.or(settings.upstream.as_deref());
    if let Some(upstream) = upstream {
        let base = parse_upstream(upstream)?;
        let timeout = parse_timeout(
            settings
                .upstream_timeout
                .as_deref()
                .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT),
        )?;
        info!(upstream = %base, ?timeout, "proxying to upstream");
        builder.register(Phase::Content, Arc::new(UpstreamProxy::new(base, timeout)?));
    } else {
        let content = match &settings.response {
            Some(response) => StaticContent::new(response)?,
            None => StaticContent::default(),
        };
        builder.register(Phase::Content, Arc::new(content));
    }

    Ok(builder.build())
}

fn parse_upstream(value: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        field: "server.upstream".to_string(),
        value: value.to_string(),
        expected: "an http or https URL".to_string(),
    };
    let url = Url::parse(value).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    Ok(url)
}

fn parse_timeout(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "server.upstream_timeout".to_string(),
            value: value.to_string(),
            expected: "a non-zero duration such as \"30s\"".to_string(),
        })
}
