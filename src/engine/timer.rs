//! Timer facility.
//!
//! Arming a timer never blocks: [`TokioTimer`] spawns a task that sleeps and
//! then runs the callback. The returned [`TimerHandle`] cancels the task;
//! cancelling is idempotent and a no-op once the callback has started.

use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::EngineError;

/// Callback run when a timer fires.
pub type WakeCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules one-shot callbacks.
pub trait Timer: Send + Sync {
    /// Runs `callback` once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TimerUnavailable`] when the timer cannot be
    /// armed; `callback` is dropped without running.
    fn arm(&self, delay: Duration, callback: WakeCallback) -> Result<TimerHandle, EngineError>;
}

/// Cancels an armed timer.
pub struct TimerHandle {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl TimerHandle {
    /// Wraps a cancel action; it runs at most once.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Cancels by aborting a tokio task.
    #[must_use]
    pub fn from_abort(handle: AbortHandle) -> Self {
        Self::new(move || handle.abort())
    }

    /// Cancels the timer. Later calls do nothing.
    pub fn cancel(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let armed = self
            .cancel
            .lock()
            .map(|c| c.is_some())
            .unwrap_or_default();
        f.debug_struct("TimerHandle").field("armed", &armed).finish()
    }
}

/// Timer backed by the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn arm(&self, delay: Duration, callback: WakeCallback) -> Result<TimerHandle, EngineError> {
        let runtime =
            Handle::try_current().map_err(|e| EngineError::TimerUnavailable(e.to_string()))?;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Ok(TimerHandle::from_abort(task.abort_handle()))
    }
}
