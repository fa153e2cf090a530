//! `stallgate` - latency and failure injection gateway
//!
//! An HTTP gateway that, per request, evaluates configured conditions to
//! hold the request for a while, short-circuit it with a status code, or
//! both, before proxying it upstream or serving a static response.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod transport;
