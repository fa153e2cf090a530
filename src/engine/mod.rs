//! Request deferral and conditional short-circuit engine.
//!
//! [`DelayBlockHandler`] is the pipeline entry point. Per request it folds
//! the scope's `sleep_ms` and `block` directives into a decision, then
//! declines, finalizes with the block status, or parks the request on a
//! timer through the [`SuspensionController`].

pub mod decision;
pub mod resume;
pub mod suspension;
pub mod timer;

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, error, info};

pub use decision::{Action, Block, Decision, DecisionAggregator};
pub use resume::Resumption;
pub use suspension::{SuspensionController, SuspensionOutcome, SuspensionState};
pub use timer::{Timer, TimerHandle, TokioTimer, WakeCallback};

use crate::expr::Evaluator;
use crate::observability::metrics::{self, BlockStage};
use crate::pipeline::{Phase, PhaseContext, PhaseHandler, PhaseOutcome, PipelineBuilder};

/// Name the entry point registers under.
pub const HANDLER_NAME: &str = "delay_block";

/// Phase the entry point runs at.
pub const INSTALL_PHASE: Phase = Phase::Rewrite;

/// Pipeline entry point for the delay and block directives.
#[derive(Debug, Clone)]
pub struct DelayBlockHandler {
    aggregator: DecisionAggregator,
    controller: SuspensionController,
}

impl DelayBlockHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(evaluator: Arc<dyn Evaluator>, timer: Arc<dyn Timer>) -> Self {
        let aggregator = DecisionAggregator::new(evaluator);
        Self {
            controller: SuspensionController::new(aggregator.clone(), timer),
            aggregator,
        }
    }
}

impl PhaseHandler for DelayBlockHandler {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    fn handle(&self, cx: &PhaseContext<'_>) -> PhaseOutcome {
        let request = cx.request;
        let scope = request.scope();
        if scope.is_noop() {
            return PhaseOutcome::Declined;
        }

        // One suspension per request, also after it resumed
        if request.module_ctx::<Arc<SuspensionState>>().is_some() {
            debug!(request_id = %request.context().request_id, "already suspended once, declining");
            return PhaseOutcome::Declined;
        }

        let decision = self.aggregator.evaluate(scope, request.context());
        match decision.action() {
            Action::Decline => PhaseOutcome::Declined,
            Action::Block(status) => {
                metrics::record_block(status.as_u16(), BlockStage::Immediate);
                info!(
                    request_id = %request.context().request_id,
                    status = status.as_u16(),
                    "blocking"
                );
                PhaseOutcome::Finalize(status)
            }
            Action::Suspend {
                delay,
                pending_block,
            } => {
                if let Some(status) = pending_block {
                    debug!(
                        request_id = %request.context().request_id,
                        status = status.as_u16(),
                        "block matched, re-checked after sleeping"
                    );
                }
                match self.controller.suspend(cx, delay) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(
                            request_id = %request.context().request_id,
                            error = %e,
                            "failed to suspend request"
                        );
                        PhaseOutcome::Finalize(StatusCode::INTERNAL_SERVER_ERROR)
                    }
                }
            }
        }
    }
}

/// Registers the entry point at the rewrite phase.
///
/// Returns `false` without registering if it is already installed.
pub fn install(
    builder: &mut PipelineBuilder,
    evaluator: Arc<dyn Evaluator>,
    timer: Arc<dyn Timer>,
) -> bool {
    if builder.is_registered(INSTALL_PHASE, HANDLER_NAME) {
        return false;
    }
    builder.register(
        INSTALL_PHASE,
        Arc::new(DelayBlockHandler::new(evaluator, timer)),
    );
    true
}
