//! Pipeline resumption adapter.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::pipeline::{Pipeline, Request};

/// What a woken request does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    /// Run the handlers after the one that parked the request.
    Continue,
    /// End the request with this status.
    FinalizeWith(StatusCode),
}

/// Re-enters the pipeline right after `resume_point`.
pub fn resume(pipeline: &Arc<Pipeline>, request: &Arc<Request>, resume_point: usize) {
    pipeline.run(request, resume_point + 1);
}

/// Short-circuits every remaining handler with `status`.
pub fn finalize(request: &Request, status: StatusCode) {
    Pipeline::finalize(request, status);
}

/// Carries out `resumption`.
pub fn apply(
    pipeline: &Arc<Pipeline>,
    request: &Arc<Request>,
    resume_point: usize,
    resumption: Resumption,
) {
    match resumption {
        Resumption::Continue => resume(pipeline, request, resume_point),
        Resumption::FinalizeWith(status) => finalize(request, status),
    }
}
