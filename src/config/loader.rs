//! Configuration loader
//!
//! Loading pipeline:
//! 1. Size check and UTF-8 BOM stripping
//! 2. Environment variable expansion (pre-parse, on raw text)
//! 3. YAML parsing
//! 4. Deserialization to typed config
//! 5. Validation (collects every issue)
//! 6. Scope compilation and inheritance
//! 7. Freeze with `Arc`

use crate::config::schema::GatewayConfig;
use crate::config::scope::ScopeTree;
use crate::config::validation::Validator;
use crate::error::ConfigError;

use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Limits for configuration size.
    pub config_limits: ConfigLimits,
}

/// Limits for configuration size to prevent resource exhaustion.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of location scopes, at any depth.
    pub max_locations: usize,

    /// Maximum number of `sleep_ms` and `block` entries in one scope.
    pub max_directives: usize,

    /// Maximum location nesting depth.
    pub max_nesting: usize,

    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_locations: env_or("STALLGATE_MAX_LOCATIONS", 1000),
            max_directives: env_or("STALLGATE_MAX_DIRECTIVES", 64),
            max_nesting: env_or("STALLGATE_MAX_NESTING", 16),
            max_config_size: env_or("STALLGATE_MAX_CONFIG_SIZE", 1024 * 1024),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<GatewayConfig>,

    /// Compiled scopes, ready for request-time lookup.
    pub scopes: Arc<ScopeTree>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) if !location.is_empty() => write!(f, "{} ({location})", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Configuration loader.
///
/// Handles the full loading pipeline from YAML file to frozen
/// [`GatewayConfig`] and [`ScopeTree`].
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a new configuration loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Creates a new configuration loader with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LoaderOptions::default())
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or exceeds the size limit
    /// - A required environment variable is unset
    /// - YAML parsing or deserialization fails
    /// - Validation fails
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size =
            usize::try_from(metadata.len()).unwrap_or(self.options.config_limits.max_config_size);
        self.check_size(file_size)?;

        let raw_content = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_str(&raw_content, path)
    }

    /// Loads configuration from YAML text; `origin` is used in messages.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigLoader::load`], except for file access errors.
    pub fn load_str(&self, raw_content: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        let mut warnings = Vec::new();

        self.check_size(raw_content.len())?;

        // Handle UTF-8 BOM
        let raw_content = raw_content.strip_prefix('\u{feff}').unwrap_or(raw_content);

        // Stage 1: Environment variable substitution (before YAML parsing)
        let mut env_sub = EnvSubstitution::new();
        let substituted = env_sub.substitute(raw_content, origin)?;
        warnings.extend(env_sub.warnings);

        // Stage 2: YAML parsing
        let root: serde_yaml::Value =
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        // An empty document is a valid pass-through gateway
        let config: GatewayConfig = if root.is_null() {
            GatewayConfig::default()
        } else {
            // Stage 3: Deserialize to typed config
            serde_yaml::from_value(root).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: format!("failed to deserialize configuration: {e}"),
            })?
        };

        // Stage 4: Validation
        let mut validator = Validator::new();
        let validation_result = validator.validate(&config, &self.options.config_limits);

        if validation_result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: validation_result.errors,
            });
        }

        for issue in validation_result.warnings {
            warnings.push(LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            });
        }

        // Stage 5: Scope compilation
        let scopes = ScopeTree::build(&config)?;

        // Stage 6: Freeze
        Ok(LoadResult {
            config: Arc::new(config),
            scopes: Arc::new(scopes),
            warnings,
        })
    }

    fn check_size(&self, size: usize) -> Result<(), ConfigError> {
        let max = self.options.config_limits.max_config_size;
        if size > max {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{size} bytes"),
                expected: format!("at most {max} bytes"),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Pre-parse environment variable substitution.
///
/// Runs on raw YAML text BEFORE parsing to preserve type inference. A `$`
/// that is not followed by `{` or `$` is kept, so `$arg_delay` reaches the
/// expression compiler untouched.
struct EnvSubstitution {
    warnings: Vec<LoadWarning>,
}

impl EnvSubstitution {
    const fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Substitutes environment variables in raw YAML text.
    ///
    /// Supports:
    /// - `${VAR}` - expand to value (empty string if unset with warning)
    /// - `${VAR:-default}` - expand to default if unset
    /// - `${VAR:?message}` - fail if unset
    /// - `$$` - literal `$`
    fn substitute(&mut self, raw_yaml: &str, source_path: &Path) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(raw_yaml.len());
        let mut chars = raw_yaml.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                result.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let (var_name, default, error_msg) = Self::parse_var_spec(&mut chars)?;

                    match std::env::var(&var_name) {
                        Ok(value) => result.push_str(&value),
                        Err(_) => {
                            if let Some(default_val) = default {
                                result.push_str(&default_val);
                            } else if let Some(msg) = error_msg {
                                return Err(ConfigError::EnvVarNotSet {
                                    var: var_name,
                                    location: msg,
                                });
                            } else {
                                self.warnings.push(LoadWarning {
                                    message: format!(
                                        "environment variable '{var_name}' is not set, using empty string"
                                    ),
                                    location: Some(source_path.display().to_string()),
                                });
                            }
                        }
                    }
                }
                _ => result.push(c),
            }
        }

        Ok(result)
    }

    /// Parses a variable specification from `${...}`.
    ///
    /// Returns (`var_name`, `default_value`, `error_message`).
    fn parse_var_spec(
        chars: &mut std::iter::Peekable<std::str::Chars>,
    ) -> Result<(String, Option<String>, Option<String>), ConfigError> {
        let mut var_name = String::new();

        while let Some(&c) = chars.peek() {
            chars.next();
            match c {
                '}' => return Ok((var_name, None, None)),
                ':' => match chars.peek() {
                    Some('-') => {
                        chars.next();
                        let default = Self::read_until_close(chars)?;
                        return Ok((var_name, Some(default), None));
                    }
                    Some('?') => {
                        chars.next();
                        let msg = Self::read_until_close(chars)?;
                        return Ok((var_name, None, Some(msg)));
                    }
                    _ => var_name.push(':'),
                },
                _ => var_name.push(c),
            }
        }

        Err(ConfigError::ParseError {
            path: PathBuf::new(),
            line: None,
            message: format!("unclosed environment variable reference: ${{{var_name}"),
        })
    }

    /// Reads content until the closing `}`, handling nested braces.
    fn read_until_close(
        chars: &mut std::iter::Peekable<std::str::Chars>,
    ) -> Result<String, ConfigError> {
        let mut value = String::new();
        let mut depth = 1;

        for c in chars.by_ref() {
            match c {
                '{' => {
                    depth += 1;
                    value.push(c);
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(value);
                    }
                    value.push(c);
                }
                _ => value.push(c),
            }
        }

        Err(ConfigError::ParseError {
            path: PathBuf::new(),
            line: None,
            message: "unclosed environment variable reference".to_string(),
        })
    }
}

/// Parses an environment variable with a default value.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
