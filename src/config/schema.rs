//! Configuration schema
//!
//! Serde types for the YAML directive surface. Scope directives (`sleep_ms`,
//! `block`) may appear at the top level and inside any `locations` entry;
//! nested locations inherit directives they do not set themselves.

use serde::{Deserialize, Serialize};

/// Default listen address when neither the file nor the CLI sets one.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default upstream request timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT: &str = "30s";

/// Status used by a block directive without an explicit status.
pub const DEFAULT_BLOCK_STATUS: &str = "503";

// ============================================================================
// Root
// ============================================================================

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listener and content settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Top-level delay expressions in milliseconds.
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub sleep_ms: OneOrMany<Scalar>,

    /// Top-level block rules.
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub block: OneOrMany<BlockDirective>,

    /// Nested location scopes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<LocationConfig>,
}

/// Listener, upstream and fallback response settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Bind address (`host:port`, `:port` or `port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Base URL requests are forwarded to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Upstream timeout as a humantime duration (e.g. `"30s"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_timeout: Option<String>,

    /// Maximum buffered request body in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_body_size: Option<usize>,

    /// Response served when no upstream is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<StaticResponse>,
}

/// A fixed response served by the content phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticResponse {
    /// Response status code.
    #[serde(default = "default_static_status")]
    pub status: u16,

    /// Response body.
    #[serde(default)]
    pub body: String,

    /// `Content-Type` header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Default for StaticResponse {
    fn default() -> Self {
        Self {
            status: default_static_status(),
            body: String::new(),
            content_type: None,
        }
    }
}

const fn default_static_status() -> u16 {
    200
}

// ============================================================================
// Scopes
// ============================================================================

/// A nested location scope matched by URI path prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    /// Path prefix; must begin with `/` and with the parent's prefix.
    pub path: String,

    /// Delay expressions in milliseconds; the largest valid value wins.
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub sleep_ms: OneOrMany<Scalar>,

    /// Block rules, first match wins.
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub block: OneOrMany<BlockDirective>,

    /// Nested location scopes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Self>,
}

/// A block directive: condition and optional status expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockDirective {
    /// Condition; blocks when it evaluates to a non-zero integer.
    pub when: Scalar,

    /// Status expression, `"503"` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Scalar>,
}

// ============================================================================
// Helpers
// ============================================================================

/// A YAML scalar accepted where an expression is expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Integer literal, e.g. `sleep_ms: 100`.
    Integer(i64),
    /// Expression text, e.g. `sleep_ms: "$arg_delay"`.
    Text(String),
}

impl Scalar {
    /// Returns the expression text.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Integer(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// A directive that may be written once or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value.
    One(T),
    /// A list of values.
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    /// Returns the values as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }

    /// Returns `true` if no value is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config: GatewayConfig = serde_yaml::from_str("sleep_ms: 100\n").unwrap();
        assert_eq!(config.sleep_ms.as_slice(), &[Scalar::Integer(100)]);
        assert!(config.block.is_empty());
        assert!(config.locations.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
server:
  listen: ":9090"
  upstream: "http://127.0.0.1:9000"
  upstream_timeout: "5s"
sleep_ms: ["$arg_sleep", 50]
block:
  - when: "$http_x_block"
    status: 429
  - when: "$arg_fail"
locations:
  - path: /api/
    sleep_ms: 300
    locations:
      - path: /api/v2/
        block:
          when: "1"
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen.as_deref(), Some(":9090"));
        assert_eq!(config.sleep_ms.len(), 2);
        assert_eq!(config.block.len(), 2);
        assert_eq!(
            config.block.as_slice()[0].status,
            Some(Scalar::Integer(429))
        );
        assert!(config.block.as_slice()[1].status.is_none());

        let api = &config.locations[0];
        assert_eq!(api.path, "/api/");
        assert_eq!(api.sleep_ms.as_slice(), &[Scalar::Integer(300)]);
        assert_eq!(api.locations[0].block.len(), 1);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result: Result<GatewayConfig, _> = serde_yaml::from_str("sleep: 100\n");
        assert!(result.is_err());
    }

    #[test]
    fn static_response_defaults() {
        let response = StaticResponse::default();
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }

    #[test]
    fn scalar_text() {
        assert_eq!(Scalar::Integer(-5).as_text(), "-5");
        assert_eq!(Scalar::Text("$uri".into()).as_text(), "$uri");
    }
}
