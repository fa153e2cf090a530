//! `validate` command.
//!
//! Loads every file through the full loader pipeline and reports all errors
//! and warnings per file. With `--strict`, warnings fail validation too.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::ConfigLoader;
use crate::error::{ConfigError, Severity, StallgateError, ValidationIssue};

/// Validation outcome for one file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// File path as given.
    pub path: PathBuf,
    /// Whether the file passed.
    pub valid: bool,
    /// Errors, each with its location.
    pub errors: Vec<IssueReport>,
    /// Warnings, each with its location.
    pub warnings: Vec<IssueReport>,
}

/// A single reported issue.
#[derive(Debug, Serialize)]
pub struct IssueReport {
    /// Field path, empty when the issue concerns the whole file.
    pub location: String,
    /// Description.
    pub message: String,
}

impl From<ValidationIssue> for IssueReport {
    fn from(issue: ValidationIssue) -> Self {
        Self {
            location: issue.path,
            message: issue.message,
        }
    }
}

/// Validate configuration files without starting the gateway.
///
/// # Errors
///
/// Returns a config error naming the first failing file once every file
/// has been reported, or a JSON error if the report cannot be rendered.
pub fn run(args: &ValidateArgs) -> Result<(), StallgateError> {
    let loader = ConfigLoader::with_defaults();
    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|path| validate_file(&loader, path, args.strict))
        .collect();

    match args.format {
        OutputFormat::Human => print_human(&reports),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    match reports.into_iter().find(|r| !r.valid) {
        Some(failed) => Err(ConfigError::ValidationError {
            path: failed.path.display().to_string(),
            errors: failed
                .errors
                .into_iter()
                .map(|issue| ValidationIssue {
                    path: issue.location,
                    message: issue.message,
                    severity: Severity::Error,
                })
                .collect(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Validates one file.
#[must_use]
pub fn validate_file(loader: &ConfigLoader, path: &Path, strict: bool) -> FileReport {
    tracing::info!(file = %path.display(), "validating configuration");

    let (mut errors, warnings): (Vec<IssueReport>, Vec<IssueReport>) = match loader.load(path) {
        Ok(loaded) => (
            Vec::new(),
            loaded
                .warnings
                .into_iter()
                .map(|w| IssueReport {
                    location: w.location.unwrap_or_default(),
                    message: w.message,
                })
                .collect(),
        ),
        Err(ConfigError::ValidationError { errors, .. }) => {
            (errors.into_iter().map(IssueReport::from).collect(), Vec::new())
        }
        Err(e) => (
            vec![IssueReport {
                location: String::new(),
                message: e.to_string(),
            }],
            Vec::new(),
        ),
    };

    let warnings = if strict {
        errors.extend(warnings);
        Vec::new()
    } else {
        warnings
    };

    FileReport {
        path: path.to_path_buf(),
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn print_human(reports: &[FileReport]) {
    for report in reports {
        let verdict = if report.valid { "ok" } else { "FAILED" };
        println!("{}: {verdict}", report.path.display());
        for issue in &report.errors {
            println!("  error: {}", format_issue(issue));
        }
        for issue in &report.warnings {
            println!("  warning: {}", format_issue(issue));
        }
    }
}

fn format_issue(issue: &IssueReport) -> String {
    if issue.location.is_empty() {
        issue.message.clone()
    } else {
        format!("{} at {}", issue.message, issue.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn valid_file_passes() {
        let file = write_config("sleep_ms: 100\n");
        let report = validate_file(&ConfigLoader::with_defaults(), file.path(), false);
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn validation_errors_are_listed() {
        let file = write_config("locations:\n  - path: nope\n  - path: nope\n");
        let report = validate_file(&ConfigLoader::with_defaults(), file.path(), false);
        assert!(!report.valid);
        assert!(report.errors.len() >= 2);
        assert!(report.errors.iter().all(|e| e.location.starts_with("locations[")));
    }

    #[test]
    fn strict_turns_warnings_into_errors() {
        let file = write_config("sleep_ms: soon\n");
        let loader = ConfigLoader::with_defaults();

        let lenient = validate_file(&loader, file.path(), false);
        assert!(lenient.valid);
        assert_eq!(lenient.warnings.len(), 1);

        let strict = validate_file(&loader, file.path(), true);
        assert!(!strict.valid);
        assert!(strict.warnings.is_empty());
        assert_eq!(strict.errors.len(), 1);
    }

    #[test]
    fn missing_file_is_reported() {
        let report = validate_file(
            &ConfigLoader::with_defaults(),
            Path::new("/nonexistent/stallgate.yaml"),
            false,
        );
        assert!(!report.valid);
        assert_eq!(report.errors[0].location, "");
    }
}
