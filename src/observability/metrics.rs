//! Metrics collection for `stallgate`.
//!
//! Prometheus-compatible metrics with label cardinality protection and
//! typed convenience functions for recording measurements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::StallgateError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Status codes kept verbatim as label values.
///
/// Block statuses come from request data, so anything else is bucketed as
/// `"other"` to keep label cardinality bounded.
const KNOWN_STATUSES: [u16; 22] = [
    200, 201, 204, 301, 302, 304, 400, 401, 403, 404, 405, 408, 409, 413, 418, 429, 500, 501,
    502, 503, 504, 507,
];

/// Where a block decision took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStage {
    /// Finalized at the entry point, without sleeping.
    Immediate,
    /// Finalized when the delay elapsed.
    AfterSleep,
}

impl BlockStage {
    const fn as_label(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::AfterSleep => "after_sleep",
        }
    }
}

/// Sanitizes a status code for use as a metrics label.
#[must_use]
pub fn sanitize_status_label(status: u16) -> String {
    if KNOWN_STATUSES.contains(&status) {
        status.to_string()
    } else {
        "other".to_string()
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint.
///
/// # Errors
///
/// Returns `StallgateError::Io` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), StallgateError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| StallgateError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "stallgate_requests_total",
        "Total number of requests answered, by status"
    );
    describe_counter!("stallgate_sleeps_total", "Requests parked by a delay");
    describe_counter!(
        "stallgate_blocks_total",
        "Requests short-circuited by a block rule"
    );
    describe_counter!(
        "stallgate_sleeps_aborted_total",
        "Parked requests terminated before their delay elapsed"
    );
    describe_counter!(
        "stallgate_eval_failures_total",
        "Directive values skipped because they failed to evaluate or parse"
    );
    describe_counter!(
        "stallgate_upstream_errors_total",
        "Upstream proxy failures by kind"
    );
    describe_gauge!(
        "stallgate_requests_suspended",
        "Requests currently parked on a timer"
    );
    describe_histogram!(
        "stallgate_sleep_duration_ms",
        "Time requests actually spent parked in milliseconds"
    );
    describe_histogram!(
        "stallgate_request_duration_ms",
        "End-to-end request duration in milliseconds"
    );
}

/// Records an answered request.
pub fn record_request(status: u16, duration: Duration) {
    counter!("stallgate_requests_total", "status" => sanitize_status_label(status)).increment(1);
    histogram!("stallgate_request_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Records a request being parked.
pub fn record_sleep_started() {
    counter!("stallgate_sleeps_total").increment(1);
    gauge!("stallgate_requests_suspended").increment(1.0);
}

/// Records a parked request waking up after `elapsed`.
pub fn record_sleep_finished(elapsed: Duration) {
    gauge!("stallgate_requests_suspended").decrement(1.0);
    histogram!("stallgate_sleep_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

/// Records a parked request being terminated early.
pub fn record_sleep_aborted() {
    gauge!("stallgate_requests_suspended").decrement(1.0);
    counter!("stallgate_sleeps_aborted_total").increment(1);
}

/// Records a block decision.
pub fn record_block(status: u16, stage: BlockStage) {
    counter!(
        "stallgate_blocks_total",
        "status" => sanitize_status_label(status),
        "stage" => stage.as_label(),
    )
    .increment(1);
}

/// Records a skipped directive value; `kind` is a fixed engine label.
pub fn record_eval_failure(kind: &'static str) {
    counter!("stallgate_eval_failures_total", "kind" => kind).increment(1);
}

/// Records an upstream failure; `kind` is a fixed proxy label.
pub fn record_upstream_error(kind: &'static str) {
    counter!("stallgate_upstream_errors_total", "kind" => kind).increment(1);
}
