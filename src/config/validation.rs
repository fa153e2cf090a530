//! Configuration validation
//!
//! Schema and semantic validation for gateway configurations, performed on
//! the fully deserialized [`GatewayConfig`] before scopes are compiled.
//!
//! Validation collects ALL errors (doesn't stop at first) to provide
//! comprehensive feedback to users.

use crate::config::loader::ConfigLimits;
use crate::config::schema::{BlockDirective, GatewayConfig, LocationConfig, OneOrMany, Scalar};
use crate::engine::decision::{parse_decimal, parse_status};
use crate::error::{Severity, ValidationIssue};
use crate::expr::CompiledExpr;
use crate::transport::http::parse_bind_addr;

use std::collections::HashSet;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    seen_paths: HashSet<String>,
    location_count: usize,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns the result.
    ///
    /// This method collects all errors and warnings rather than stopping
    /// at the first issue.
    pub fn validate(&mut self, config: &GatewayConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();
        self.seen_paths.clear();
        self.location_count = 0;

        self.validate_server(config);
        self.validate_scope(&config.sleep_ms, &config.block, "", limits);
        self.validate_locations(&config.locations, "", "locations", 1, limits);

        if self.location_count > limits.max_locations {
            self.add_error(
                "locations",
                &format!(
                    "Too many locations: {} (maximum: {}). \
                     Set STALLGATE_MAX_LOCATIONS to increase the limit.",
                    self.location_count, limits.max_locations
                ),
            );
        }

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Server Settings
    // ========================================================================

    fn validate_server(&mut self, config: &GatewayConfig) {
        let server = &config.server;

        if let Some(listen) = &server.listen {
            if let Err(e) = parse_bind_addr(listen) {
                self.add_error("server.listen", &e.to_string());
            }
        }

        if let Some(upstream) = &server.upstream {
            match reqwest::Url::parse(upstream) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => self.add_error(
                    "server.upstream",
                    &format!("Unsupported upstream scheme '{}'", url.scheme()),
                ),
                Err(e) => self.add_error(
                    "server.upstream",
                    &format!("Invalid upstream URL '{upstream}': {e}"),
                ),
            }
        }

        if let Some(timeout) = &server.upstream_timeout {
            match humantime::parse_duration(timeout) {
                Ok(d) if d.is_zero() => {
                    self.add_error("server.upstream_timeout", "Upstream timeout must be non-zero");
                }
                Ok(_) => {}
                Err(e) => self.add_error(
                    "server.upstream_timeout",
                    &format!("Invalid duration '{timeout}': {e}"),
                ),
            }
        }

        if server.max_body_size == Some(0) {
            self.add_warning(
                "server.max_body_size",
                "max_body_size is 0; every request with a body is rejected with 413",
            );
        }

        if let Some(response) = &server.response {
            if !(100..=599).contains(&response.status) {
                self.add_error(
                    "server.response.status",
                    &format!(
                        "Invalid response status {}: expected 100-599",
                        response.status
                    ),
                );
            }
            if server.upstream.is_some() {
                self.add_warning(
                    "server.response",
                    "Static response is ignored when an upstream is configured",
                );
            }
        }
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    fn validate_locations(
        &mut self,
        locations: &[LocationConfig],
        parent_path: &str,
        base_path: &str,
        depth: usize,
        limits: &ConfigLimits,
    ) {
        if !locations.is_empty() && depth > limits.max_nesting {
            self.add_error(
                base_path,
                &format!(
                    "Locations nested too deeply: depth {depth} (maximum: {}). \
                     Set STALLGATE_MAX_NESTING to increase the limit.",
                    limits.max_nesting
                ),
            );
            return;
        }

        for (i, location) in locations.iter().enumerate() {
            let path = format!("{base_path}[{i}]");
            self.location_count += 1;

            if !location.path.starts_with('/') {
                self.add_error(
                    &format!("{path}.path"),
                    &format!("Location path '{}' must start with '/'", location.path),
                );
            } else if !location.path.starts_with(parent_path) {
                self.add_error(
                    &format!("{path}.path"),
                    &format!(
                        "Nested location '{}' must start with its parent's path '{parent_path}'",
                        location.path
                    ),
                );
            }

            if !self.seen_paths.insert(location.path.clone()) {
                self.add_error(
                    &format!("{path}.path"),
                    &format!("Duplicate location path '{}'", location.path),
                );
            }

            self.validate_scope(&location.sleep_ms, &location.block, &path, limits);
            self.validate_locations(
                &location.locations,
                &location.path,
                &format!("{path}.locations"),
                depth + 1,
                limits,
            );
        }
    }

    fn validate_scope(
        &mut self,
        sleep_ms: &OneOrMany<Scalar>,
        block: &OneOrMany<BlockDirective>,
        base_path: &str,
        limits: &ConfigLimits,
    ) {
        let prefix = if base_path.is_empty() {
            String::new()
        } else {
            format!("{base_path}.")
        };

        let directive_count = sleep_ms.len() + block.len();
        if directive_count > limits.max_directives {
            self.add_error(
                base_path,
                &format!(
                    "Too many directives in scope: {directive_count} (maximum: {}). \
                     Set STALLGATE_MAX_DIRECTIVES to increase the limit.",
                    limits.max_directives
                ),
            );
        }

        for (i, value) in sleep_ms.as_slice().iter().enumerate() {
            let path = format!("{prefix}sleep_ms[{i}]");
            if let Some(expr) = self.compile(value, &path) {
                if expr.is_literal() && parse_decimal(expr.source()).is_none() {
                    self.add_warning(
                        &path,
                        &format!(
                            "sleep_ms '{}' is not a non-negative integer and never delays",
                            expr.source()
                        ),
                    );
                }
            }
        }

        for (i, directive) in block.as_slice().iter().enumerate() {
            let when_path = format!("{prefix}block[{i}].when");
            if let Some(expr) = self.compile(&directive.when, &when_path) {
                if expr.is_literal() && parse_decimal(expr.source()).is_none_or(|n| n == 0) {
                    self.add_warning(
                        &when_path,
                        &format!("block condition '{}' never matches", expr.source()),
                    );
                }
            }

            if let Some(status) = &directive.status {
                let status_path = format!("{prefix}block[{i}].status");
                if let Some(expr) = self.compile(status, &status_path) {
                    if expr.is_literal() && parse_status(expr.source()).is_none() {
                        self.add_warning(
                            &status_path,
                            &format!(
                                "block status '{}' is not a valid status code; 503 is used",
                                expr.source()
                            ),
                        );
                    }
                }
            }
        }
    }

    fn compile(&mut self, value: &Scalar, path: &str) -> Option<CompiledExpr> {
        match CompiledExpr::compile(&value.as_text()) {
            Ok(expr) => Some(expr),
            Err(e) => {
                self.add_error(path, &e.to_string());
                None
            }
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
