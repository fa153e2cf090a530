//! Directive expressions.
//!
//! Directive arguments are literal text with embedded `$name` or `${name}`
//! variable references. They are compiled once when the configuration is
//! loaded and evaluated per request by an [`Evaluator`].

pub mod context;
pub mod variables;

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

pub use context::RequestContext;
pub use variables::Variable;

use crate::error::{EvalError, ExprError};

/// Matches `${name}` or `$name`; an empty capture marks an invalid reference.
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:\{([^}]*)\}|([A-Za-z0-9_]*))").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(Variable),
}

/// A directive argument compiled into literal and variable segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledExpr {
    source: String,
    segments: Vec<Segment>,
}

impl CompiledExpr {
    /// Compiles an expression.
    ///
    /// # Errors
    ///
    /// Returns [`ExprError::InvalidVariable`] for a `$` that is not followed
    /// by a valid name, and [`ExprError::UnknownVariable`] for a name that is
    /// not a known variable.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in VARIABLE_RE.captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            if !variables::is_valid_name(name) {
                return Err(ExprError::InvalidVariable {
                    offset: whole.start(),
                    source_text: source.to_string(),
                });
            }

            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Variable(Variable::parse(name)?));
            last = whole.end();
        }

        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Creates an expression that always evaluates to `value`.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        let value = value.into();
        let segments = if value.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Literal(value.clone())]
        };
        Self {
            source: value,
            segments,
        }
    }

    /// The expression text as written in the configuration.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression contains no variables.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }
}

impl std::fmt::Display for CompiledExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Produces the string value of a compiled expression for a request.
pub trait Evaluator: Send + Sync {
    /// Evaluates `expr` against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an [`EvalError`] when a variable cannot be read.
    fn evaluate(&self, expr: &CompiledExpr, ctx: &RequestContext) -> Result<String, EvalError>;
}

/// Evaluator resolving the built-in variables against the request context.
///
/// Missing values (absent header, argument or cookie) evaluate to `""`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableEvaluator;

impl VariableEvaluator {
    fn resolve(variable: &Variable, ctx: &RequestContext) -> Result<String, EvalError> {
        let value = match variable {
            Variable::Uri => ctx.path().to_string(),
            Variable::RequestUri => ctx.request_uri().to_string(),
            Variable::Args => ctx.query().to_string(),
            Variable::Method => ctx.method.as_str().to_string(),
            Variable::Host => ctx.host(),
            Variable::RemoteAddr => ctx
                .remote_addr
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
            Variable::RequestId => ctx.request_id.clone(),
            Variable::Msec => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|e| EvalError::Clock(e.to_string()))?;
                format!("{}.{:03}", now.as_secs(), now.subsec_millis())
            }
            Variable::TimeIso8601 => chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%:z")
                .to_string(),
            Variable::Arg(name) => ctx.query_arg(name).unwrap_or_default().to_string(),
            Variable::Header(name) => ctx.header(name)?.unwrap_or_default(),
            Variable::Cookie(name) => ctx.cookie(name)?.unwrap_or_default(),
        };
        Ok(value)
    }
}

impl Evaluator for VariableEvaluator {
    fn evaluate(&self, expr: &CompiledExpr, ctx: &RequestContext) -> Result<String, EvalError> {
        let mut out = String::new();
        for segment in &expr.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(variable) => out.push_str(&Self::resolve(variable, ctx)?),
            }
        }
        Ok(out)
    }
}
