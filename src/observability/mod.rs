//! Observability
//!
//! Logging and metrics for the gateway and the deferral engine.

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
