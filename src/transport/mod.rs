//! Front-end transport.
//!
//! The HTTP gateway turns every incoming HTTP request into a pipeline
//! [`Request`](crate::pipeline::Request) and maps the terminal reply back.

pub mod http;

pub use http::{HttpConfig, HttpGateway, build_router, parse_bind_addr};

use crate::error::TransportError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Default maximum buffered request body in bytes (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
