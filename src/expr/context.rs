//! Request context exposed to expressions.
//!
//! A snapshot of the request line, headers and peer taken when the request
//! enters the gateway. Values that depend on the clock (`$msec`) are read at
//! evaluation time, not stored here.

use std::net::SocketAddr;

use axum::http::{HeaderMap, Method, Uri, header, request::Parts};

use crate::error::EvalError;

/// Request data visible to the expression evaluator.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier (`$request_id`).
    pub request_id: String,
    /// Request method.
    pub method: Method,
    /// Request target.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Peer address, when known.
    pub remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    /// Creates a context with no headers and no peer address.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            method,
            uri,
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }

    /// Builds a context from the parts of an incoming HTTP request.
    #[must_use]
    pub fn from_parts(parts: &Parts, remote_addr: SocketAddr) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone())
            .with_headers(parts.headers.clone())
            .with_remote_addr(remote_addr)
    }

    /// Replaces the request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the peer address.
    #[must_use]
    pub const fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, or `""`.
    #[must_use]
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    /// Path and query as sent by the client.
    #[must_use]
    pub fn request_uri(&self) -> &str {
        self.uri
            .path_and_query()
            .map_or_else(|| self.uri.path(), |pq| pq.as_str())
    }

    /// Host name without port, lowercased.
    ///
    /// Prefers the host from an absolute request target over the `Host`
    /// header.
    #[must_use]
    pub fn host(&self) -> String {
        if let Some(host) = self.uri.host() {
            return host.to_ascii_lowercase();
        }
        self.headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|v| strip_port(v).to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Value of the first query argument named `name` (case-insensitive).
    ///
    /// The value is returned as sent, without percent-decoding.
    #[must_use]
    pub fn query_arg(&self, name: &str) -> Option<&str> {
        self.query().split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            key.eq_ignore_ascii_case(name).then_some(value)
        })
    }

    /// All values of header `name`, joined by `", "`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::NonUtf8Header`] if any value is not UTF-8.
    pub fn header(&self, name: &str) -> Result<Option<String>, EvalError> {
        let mut values = self.headers.get_all(name).iter().peekable();
        if values.peek().is_none() {
            return Ok(None);
        }
        let mut joined = Vec::new();
        for value in values {
            let text = value.to_str().map_err(|_| EvalError::NonUtf8Header {
                header: name.to_string(),
            })?;
            joined.push(text);
        }
        Ok(Some(joined.join(", ")))
    }

    /// Value of cookie `name` (case-insensitive) across all `Cookie` headers.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::NonUtf8Header`] if a `Cookie` header is not UTF-8.
    pub fn cookie(&self, name: &str) -> Result<Option<String>, EvalError> {
        for value in self.headers.get_all(header::COOKIE) {
            let text = value.to_str().map_err(|_| EvalError::NonUtf8Header {
                header: header::COOKIE.as_str().to_string(),
            })?;
            let found = text.split(';').find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                key.eq_ignore_ascii_case(name).then(|| value.to_string())
            });
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }
}

/// Strips a `:port` suffix, leaving bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}
