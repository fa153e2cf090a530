//! Suspension controller.
//!
//! A parked request owns one [`SuspensionState`], stored in its module
//! context slot. The state moves `IDLE -> ARMED -> {RESUMED, ABORTED}`:
//! the timer callback and the request's cleanup hook both race for the
//! `cleaned_up` flag, and only the winner touches the outstanding-work
//! counter. The flag is claimed before the winner does anything else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::decision::DecisionAggregator;
use crate::engine::resume::{self, Resumption};
use crate::engine::timer::{Timer, TimerHandle};
use crate::error::EngineError;
use crate::observability::metrics::{self, BlockStage};
use crate::pipeline::{PhaseContext, PhaseOutcome, Pipeline, Request};

/// Which path ended a suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionOutcome {
    /// The timer fired and the request went on.
    Resumed,
    /// The request ended first; the timer was cancelled.
    Aborted,
}

/// Per-request suspension bookkeeping.
#[derive(Debug)]
pub struct SuspensionState {
    resume_point: usize,
    delay: Duration,
    armed_at: Instant,
    cleaned_up: AtomicBool,
    outcome: OnceLock<SuspensionOutcome>,
    timer: Mutex<Option<TimerHandle>>,
}

impl SuspensionState {
    fn new(resume_point: usize, delay: Duration) -> Self {
        Self {
            resume_point,
            delay,
            armed_at: Instant::now(),
            cleaned_up: AtomicBool::new(false),
            outcome: OnceLock::new(),
            timer: Mutex::new(None),
        }
    }

    /// Index of the handler that parked the request.
    #[must_use]
    pub const fn resume_point(&self) -> usize {
        self.resume_point
    }

    /// Requested delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether the wake or cleanup path already ran.
    #[must_use]
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::Acquire)
    }

    /// How the suspension ended, once it has.
    #[must_use]
    pub fn outcome(&self) -> Option<SuspensionOutcome> {
        self.outcome.get().copied()
    }

    /// Sets `cleaned_up`; returns `true` for the single caller that flipped it.
    fn claim(&self, outcome: SuspensionOutcome) -> bool {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.outcome.set(outcome);
        true
    }

    fn install_timer(&self, handle: TimerHandle) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_cleaned_up() {
            handle.cancel();
        } else {
            *slot = Some(handle);
        }
    }

    fn cancel_timer(&self) {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }
}

/// Parks requests on a timer and resumes or aborts them exactly once.
#[derive(Clone)]
pub struct SuspensionController {
    aggregator: DecisionAggregator,
    timer: Arc<dyn Timer>,
}

impl SuspensionController {
    /// Creates a controller; `aggregator` re-resolves blocks at wake time.
    #[must_use]
    pub fn new(aggregator: DecisionAggregator, timer: Arc<dyn Timer>) -> Self {
        Self { aggregator, timer }
    }

    /// Parks the request for `delay`.
    ///
    /// Returns [`PhaseOutcome::Declined`] if the request already owns a
    /// suspension, otherwise [`PhaseOutcome::Pending`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TimerUnavailable`] if the timer cannot be
    /// armed; the outstanding-work counter is left balanced.
    pub fn suspend(
        &self,
        cx: &PhaseContext<'_>,
        delay: Duration,
    ) -> Result<PhaseOutcome, EngineError> {
        let request = cx.request;
        let state = Arc::new(SuspensionState::new(cx.index, delay));
        if !request.set_module_ctx(Arc::clone(&state)) {
            debug!(request_id = %request.context().request_id, "suspension already exists");
            return Ok(PhaseOutcome::Declined);
        }

        // The reference is taken first: the hook runs right away on a
        // request that was terminated concurrently and gives it back.
        request.retain();
        metrics::record_sleep_started();
        let hook_state = Arc::clone(&state);
        request.add_cleanup(move |req| abort(&hook_state, req));
        if state.is_cleaned_up() {
            debug!(request_id = %request.context().request_id, "request ended before sleeping");
            return Ok(PhaseOutcome::Pending);
        }

        let controller = self.clone();
        let pipeline = Arc::clone(cx.pipeline);
        let wake_request = Arc::clone(request);
        let wake_state = Arc::clone(&state);
        let armed = self.timer.arm(
            delay,
            Box::new(move || controller.wake(&pipeline, &wake_request, &wake_state)),
        );

        match armed {
            Ok(handle) => {
                state.install_timer(handle);
                info!(
                    request_id = %request.context().request_id,
                    delay_ms = duration_ms(delay),
                    "sleeping"
                );
                Ok(PhaseOutcome::Pending)
            }
            Err(e) => {
                if state.claim(SuspensionOutcome::Aborted) {
                    metrics::record_sleep_aborted();
                    request.release();
                }
                Err(e)
            }
        }
    }

    /// Timer path: re-checks the block rules and resumes or finalizes.
    fn wake(&self, pipeline: &Arc<Pipeline>, request: &Arc<Request>, state: &SuspensionState) {
        if !state.claim(SuspensionOutcome::Resumed) {
            debug!(request_id = %request.context().request_id, "timer fired after cleanup");
            return;
        }

        let elapsed = state.armed_at.elapsed();
        metrics::record_sleep_finished(elapsed);
        info!(
            request_id = %request.context().request_id,
            delay_ms = duration_ms(state.delay),
            elapsed_ms = duration_ms(elapsed),
            "finished sleeping"
        );

        let block = self
            .aggregator
            .resolve_block(request.scope().block_rules(), request.context());
        let resumption = match block {
            Some(block) => {
                metrics::record_block(block.status.as_u16(), BlockStage::AfterSleep);
                info!(
                    request_id = %request.context().request_id,
                    status = block.status.as_u16(),
                    "blocking after sleep"
                );
                Resumption::FinalizeWith(block.status)
            }
            None => Resumption::Continue,
        };

        resume::apply(pipeline, request, state.resume_point, resumption);
        request.release();
    }
}

impl std::fmt::Debug for SuspensionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspensionController")
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

/// Cleanup path: runs when the request ends while parked.
fn abort(state: &SuspensionState, request: &Request) {
    if !state.claim(SuspensionOutcome::Aborted) {
        return;
    }
    state.cancel_timer();
    metrics::record_sleep_aborted();
    info!(
        request_id = %request.context().request_id,
        delay_ms = duration_ms(state.delay),
        elapsed_ms = duration_ms(state.armed_at.elapsed()),
        "sleep aborted"
    );
    request.release();
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let state = SuspensionState::new(0, Duration::from_millis(10));
        assert!(state.claim(SuspensionOutcome::Aborted));
        assert!(!state.claim(SuspensionOutcome::Resumed));
        assert!(state.is_cleaned_up());
        assert_eq!(state.outcome(), Some(SuspensionOutcome::Aborted));
    }

    #[test]
    fn timer_installed_after_claim_is_cancelled() {
        let state = SuspensionState::new(0, Duration::from_millis(10));
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        state.claim(SuspensionOutcome::Aborted);
        state.install_timer(TimerHandle::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(250)), 250);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
