//! `serve` command.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::args::ServeArgs;
use crate::config::schema::GatewayConfig;
use crate::config::{ConfigLoader, LoadResult, ScopeTree};
use crate::error::StallgateError;
use crate::server::{Server, ServerOptions};

/// Start the gateway and serve until `cancel` fires.
///
/// # Errors
///
/// Returns a config error if the configuration cannot be loaded, or a
/// transport error if the gateway cannot bind or fails while serving.
pub async fn run(args: &ServeArgs, cancel: CancellationToken) -> Result<(), StallgateError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let loaded = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "loading configuration");
            ConfigLoader::with_defaults().load(path)?
        }
        None => {
            info!("no configuration given, passing every request through");
            LoadResult {
                config: Arc::new(GatewayConfig::default()),
                scopes: Arc::new(ScopeTree::default()),
                warnings: Vec::new(),
            }
        }
    };

    for warning in &loaded.warnings {
        warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    info!(
        locations = loaded.scopes.location_count(),
        "configuration loaded"
    );

    let server = Server::start(ServerOptions {
        config: loaded.config,
        scopes: loaded.scopes,
        listen: args.listen.clone(),
        upstream: args.upstream.clone(),
        cancel,
    })
    .await?;

    server.run().await
}
