//! Decision aggregation.
//!
//! Folds the delay expressions and block rules of a scope into one
//! [`Decision`] for a request. Evaluation never fails as a whole: a value
//! that cannot be evaluated or parsed only takes its own directive out of
//! play.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tracing::{debug, warn};

use crate::config::{BlockRule, ScopeConfig};
use crate::expr::{CompiledExpr, Evaluator, RequestContext};
use crate::observability::metrics;

/// Status used when a block status is unusable.
pub const FALLBACK_BLOCK_STATUS: StatusCode = StatusCode::SERVICE_UNAVAILABLE;

/// A block outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Terminal status.
    pub status: StatusCode,
}

/// The combined outcome of a scope's directives for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    /// Delay in milliseconds; 0 means none.
    pub delay_ms: u64,
    /// Matching block rule outcome, if any.
    pub block: Option<Block>,
}

/// What the entry point does with a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do.
    Decline,
    /// Finalize now with the status.
    Block(StatusCode),
    /// Park the request; the block is re-checked on wake.
    Suspend {
        /// How long to park.
        delay: Duration,
        /// Block outcome at entry time, informational only.
        pending_block: Option<StatusCode>,
    },
}

impl Decision {
    /// Resolution order: a delay always suspends first; a block without a
    /// delay finalizes at once.
    #[must_use]
    pub const fn action(&self) -> Action {
        if self.delay_ms > 0 {
            return Action::Suspend {
                delay: Duration::from_millis(self.delay_ms),
                pending_block: match self.block {
                    Some(block) => Some(block.status),
                    None => None,
                },
            };
        }
        match self.block {
            Some(block) => Action::Block(block.status),
            None => Action::Decline,
        }
    }
}

/// Evaluates scope directives against a request.
#[derive(Clone)]
pub struct DecisionAggregator {
    evaluator: Arc<dyn Evaluator>,
}

impl DecisionAggregator {
    /// Creates an aggregator using `evaluator` for every expression.
    #[must_use]
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Computes the decision for `ctx` under `scope`.
    #[must_use]
    pub fn evaluate(&self, scope: &ScopeConfig, ctx: &RequestContext) -> Decision {
        Decision {
            delay_ms: self.aggregate_delay(scope.delay_expressions(), ctx),
            block: self.resolve_block(scope.block_rules(), ctx),
        }
    }

    /// Largest valid delay among `expressions`, or 0.
    #[must_use]
    pub fn aggregate_delay(&self, expressions: &[CompiledExpr], ctx: &RequestContext) -> u64 {
        let mut delay = 0;
        for expr in expressions {
            let Some(value) = self.evaluate_value(expr, ctx, "sleep_ms") else {
                continue;
            };
            match parse_decimal(&value) {
                Some(ms) => {
                    debug!(request_id = %ctx.request_id, "sleep_ms: evaluated value '{value}' -> {ms}");
                    delay = delay.max(ms);
                }
                None => {
                    warn!(
                        request_id = %ctx.request_id,
                        expression = expr.source(),
                        "sleep_ms: ignoring malformed value '{value}'"
                    );
                    metrics::record_eval_failure("malformed");
                }
            }
        }
        delay
    }

    /// Outcome of the first rule whose condition is a non-zero integer.
    ///
    /// Later rules are not evaluated once one matches.
    #[must_use]
    pub fn resolve_block(&self, rules: &[BlockRule], ctx: &RequestContext) -> Option<Block> {
        rules.iter().find_map(|rule| {
            let value = self.evaluate_value(&rule.condition, ctx, "block")?;
            if !parse_decimal(&value).is_some_and(|n| n != 0) {
                return None;
            }
            Some(Block {
                status: self.resolve_status(&rule.status, ctx),
            })
        })
    }

    fn resolve_status(&self, expr: &CompiledExpr, ctx: &RequestContext) -> StatusCode {
        let value = self.evaluate_value(expr, ctx, "block status");
        match value.as_deref().and_then(parse_status) {
            Some(status) => status,
            None => {
                warn!(
                    request_id = %ctx.request_id,
                    expression = expr.source(),
                    value = value.as_deref().unwrap_or_default(),
                    "block: invalid status, using {}",
                    FALLBACK_BLOCK_STATUS.as_u16()
                );
                metrics::record_eval_failure("status");
                FALLBACK_BLOCK_STATUS
            }
        }
    }

    /// Evaluated value, or `None` when the expression is not applicable.
    fn evaluate_value(
        &self,
        expr: &CompiledExpr,
        ctx: &RequestContext,
        directive: &'static str,
    ) -> Option<String> {
        match self.evaluator.evaluate(expr, ctx) {
            Ok(value) if value.is_empty() => {
                debug!(request_id = %ctx.request_id, expression = expr.source(), "{directive}: empty value");
                None
            }
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    expression = expr.source(),
                    error = %e,
                    "{directive}: evaluation failed"
                );
                metrics::record_eval_failure("eval");
                None
            }
        }
    }
}

impl std::fmt::Debug for DecisionAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionAggregator").finish_non_exhaustive()
    }
}

/// Parses a strict non-negative decimal: ASCII digits only, fitting `u64`.
#[must_use]
pub fn parse_decimal(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Parses a block status; zero and values outside 100..=999 are rejected.
#[must_use]
pub fn parse_status(text: &str) -> Option<StatusCode> {
    let code = u16::try_from(parse_decimal(text)?).ok()?;
    StatusCode::from_u16(code).ok()
}
