//! Error types for `stallgate`
//!
//! One top-level error aggregates the domain errors and maps each of them to
//! a process exit code. Request-time failures of the engine never surface
//! here: they degrade inside the decision aggregator or finalize the single
//! affected request.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `stallgate` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (bind failed, server error)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Engine error (timer facility unavailable)
    pub const ENGINE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `stallgate` operations.
#[derive(Debug, Error)]
pub enum StallgateError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP front end error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Deferral engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StallgateError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Engine(_) => ExitCode::ENGINE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },

    /// A directive argument failed to compile
    #[error("invalid expression at {location}: {source}")]
    InvalidExpression {
        /// Location in the configuration (e.g., "locations[0].block[1].when")
        location: String,
        /// Compile error
        source: ExprError,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "locations[2].sleep_ms[0]")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - validation failure that prevents configuration from being used
    Error,
    /// Warning - potential issue that does not prevent configuration loading
    Warning,
}

// ============================================================================
// Expression Errors
// ============================================================================

/// Errors raised while compiling a directive argument.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    /// `$` not followed by a usable variable name
    #[error("invalid variable name at offset {offset} in \"{source_text}\"")]
    InvalidVariable {
        /// Byte offset of the `$`
        offset: usize,
        /// Full expression text
        source_text: String,
    },

    /// Variable name is not known
    #[error("unknown variable \"${name}\"{}", .suggestion.as_ref().map(|s| format!(" (did you mean \"${s}\"?)")).unwrap_or_default())]
    UnknownVariable {
        /// Variable name without the `$`
        name: String,
        /// Closest known variable, if any is close enough
        suggestion: Option<String>,
    },
}

/// Errors raised while evaluating a compiled expression against a request.
///
/// The engine never propagates these: an expression that fails to evaluate
/// is treated as not applicable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    /// Header value is not valid UTF-8
    #[error("header '{header}' is not valid UTF-8")]
    NonUtf8Header {
        /// Header name
        header: String,
    },

    /// System clock is before the Unix epoch
    #[error("system clock error: {0}")]
    Clock(String),
}

// ============================================================================
// Transport Errors
// ============================================================================

/// HTTP front end errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during transport operations
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind the listener
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// Invalid bind address or upstream URL
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Server loop failed
    #[error("server error: {0}")]
    Serve(String),
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Deferral engine errors.
///
/// These are fatal for a single request only: the entry point converts them
/// into a 500 finalization.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No timer facility is available to park the request
    #[error("timer unavailable: {0}")]
    TimerUnavailable(String),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `stallgate` operations.
pub type Result<T> = std::result::Result<T, StallgateError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::TRANSPORT_ERROR, 4);
        assert_eq!(ExitCode::ENGINE_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_engine_error_exit_code() {
        let err: StallgateError = EngineError::TimerUnavailable("no runtime".to_string()).into();
        assert_eq!(err.exit_code(), ExitCode::ENGINE_ERROR);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: StallgateError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_transport_error_exit_code() {
        let err: StallgateError = TransportError::BindFailed("in use".to_string()).into();
        assert_eq!(err.exit_code(), ExitCode::TRANSPORT_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: StallgateError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "locations[0].path".to_string(),
            message: "path must start with '/'".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(
            issue.to_string(),
            "error: path must start with '/' at locations[0].path"
        );
    }

    #[test]
    fn test_unknown_variable_display_with_suggestion() {
        let err = ExprError::UnknownVariable {
            name: "ur".to_string(),
            suggestion: Some("uri".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "unknown variable \"$ur\" (did you mean \"$uri\"?)"
        );
    }

    #[test]
    fn test_unknown_variable_display_without_suggestion() {
        let err = ExprError::UnknownVariable {
            name: "zzzzzzzz".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown variable \"$zzzzzzzz\"");
    }

    #[test]
    fn test_config_error_env_var_display() {
        let err = ConfigError::EnvVarNotSet {
            var: "UPSTREAM".to_string(),
            location: "server.upstream".to_string(),
        };
        assert!(err.to_string().contains("UPSTREAM"));
        assert!(err.to_string().contains("server.upstream"));
    }
}
