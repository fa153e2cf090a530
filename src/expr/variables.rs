//! Variable names recognised by the expression compiler.
//!
//! A variable is either one of the fixed names below or one of the prefixed
//! families (`arg_NAME`, `http_NAME`, `cookie_NAME`) whose suffix selects a
//! query argument, request header or cookie.

use crate::error::ExprError;

/// Fixed variable names.
const KNOWN_VARIABLES: [&str; 10] = [
    "uri",
    "request_uri",
    "args",
    "query_string",
    "request_method",
    "host",
    "remote_addr",
    "request_id",
    "msec",
    "time_iso8601",
];

/// Prefixes of the variable families.
const KNOWN_PREFIXES: [&str; 3] = ["arg_", "http_", "cookie_"];

/// Maximum edit distance for a "did you mean" suggestion.
const SUGGESTION_DISTANCE: usize = 3;

/// A variable reference resolved at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable {
    /// Request path without the query string.
    Uri,
    /// Request path with the query string.
    RequestUri,
    /// Raw query string (`args` and `query_string`).
    Args,
    /// Request method.
    Method,
    /// Host name without port.
    Host,
    /// Client IP address.
    RemoteAddr,
    /// Unique request identifier.
    RequestId,
    /// Current time in seconds with millisecond resolution.
    Msec,
    /// Current local time in ISO 8601 format.
    TimeIso8601,
    /// Query argument, matched case-insensitively.
    Arg(String),
    /// Request header; underscores in the name match dashes.
    Header(String),
    /// Cookie value.
    Cookie(String),
}

impl Variable {
    /// Resolves a variable name (without the leading `$`).
    ///
    /// # Errors
    ///
    /// Returns [`ExprError::UnknownVariable`] when the name is not a known
    /// variable, with the closest known name as a suggestion.
    pub fn parse(name: &str) -> Result<Self, ExprError> {
        let fixed = match name {
            "uri" => Some(Self::Uri),
            "request_uri" => Some(Self::RequestUri),
            "args" | "query_string" => Some(Self::Args),
            "request_method" => Some(Self::Method),
            "host" => Some(Self::Host),
            "remote_addr" => Some(Self::RemoteAddr),
            "request_id" => Some(Self::RequestId),
            "msec" => Some(Self::Msec),
            "time_iso8601" => Some(Self::TimeIso8601),
            _ => None,
        };
        if let Some(variable) = fixed {
            return Ok(variable);
        }

        if let Some(suffix) = name.strip_prefix("arg_").filter(|s| !s.is_empty()) {
            return Ok(Self::Arg(suffix.to_string()));
        }
        if let Some(suffix) = name.strip_prefix("http_").filter(|s| !s.is_empty()) {
            return Ok(Self::Header(suffix.replace('_', "-").to_ascii_lowercase()));
        }
        if let Some(suffix) = name.strip_prefix("cookie_").filter(|s| !s.is_empty()) {
            return Ok(Self::Cookie(suffix.to_string()));
        }

        Err(ExprError::UnknownVariable {
            name: name.to_string(),
            suggestion: suggest(name),
        })
    }
}

/// Returns `true` if `name` is a syntactically valid variable name.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Finds the closest known variable name for an unknown one.
fn suggest(name: &str) -> Option<String> {
    let candidates = KNOWN_VARIABLES.iter().copied().chain(KNOWN_PREFIXES.iter().map(|p| {
        // Compare against the bare prefix so "htp_x" still points at "http_"
        p.trim_end_matches('_')
    }));

    candidates
        .map(|candidate| (strsim::levenshtein(name, candidate), candidate))
        .filter(|(distance, _)| *distance <= SUGGESTION_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| {
            if KNOWN_VARIABLES.contains(&candidate) {
                candidate.to_string()
            } else {
                format!("{candidate}_NAME")
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_names() {
        assert_eq!(Variable::parse("uri").unwrap(), Variable::Uri);
        assert_eq!(Variable::parse("args").unwrap(), Variable::Args);
        assert_eq!(Variable::parse("query_string").unwrap(), Variable::Args);
        assert_eq!(Variable::parse("msec").unwrap(), Variable::Msec);
    }

    #[test]
    fn parses_prefixed_families() {
        assert_eq!(
            Variable::parse("arg_delay").unwrap(),
            Variable::Arg("delay".to_string())
        );
        assert_eq!(
            Variable::parse("http_X_Chaos_Block").unwrap(),
            Variable::Header("x-chaos-block".to_string())
        );
        assert_eq!(
            Variable::parse("cookie_session").unwrap(),
            Variable::Cookie("session".to_string())
        );
    }

    #[test]
    fn bare_prefix_is_unknown() {
        assert!(matches!(
            Variable::parse("arg_"),
            Err(ExprError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn unknown_name_suggests_closest() {
        match Variable::parse("request_metod") {
            Err(ExprError::UnknownVariable { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("request_method"));
            }
            other => panic!("expected unknown variable, got {other:?}"),
        }
    }

    #[test]
    fn far_name_has_no_suggestion() {
        match Variable::parse("completely_unrelated_name") {
            Err(ExprError::UnknownVariable { suggestion, .. }) => assert!(suggestion.is_none()),
            other => panic!("expected unknown variable, got {other:?}"),
        }
    }

    #[test]
    fn valid_names() {
        assert!(is_valid_name("arg_x1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("arg-x"));
    }
}
