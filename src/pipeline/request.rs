//! In-flight request state owned by the host pipeline.
//!
//! A [`Request`] carries the outstanding-work counter, the per-module
//! context slot and the cleanup hooks. The counter starts at 1, the front
//! end's hold, which is released exactly once by [`Request::complete`] or by
//! [`Request::terminate`]. Every module that keeps working on the request
//! after its phase handler returns takes its own reference with
//! [`Request::retain`] and gives it back with [`Request::release`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use axum::http::{Extensions, HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::ScopeConfig;
use crate::expr::RequestContext;

/// A cleanup hook, run when the request is terminated or destroyed.
pub type CleanupHook = Box<dyn FnOnce(&Request) + Send>;

// ============================================================================
// Reply
// ============================================================================

/// Terminal response produced by the pipeline.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    pub const fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Creates a plain-text reply carrying the status's canonical reason.
    #[must_use]
    pub fn status(status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("Unknown Status");
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::new(
            status,
            headers,
            Bytes::from(format!("{} {reason}\n", status.as_u16())),
        )
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

// ============================================================================
// Request
// ============================================================================

/// A request travelling through the pipeline.
pub struct Request {
    id: u64,
    context: RequestContext,
    body: Bytes,
    scope: Arc<ScopeConfig>,
    received_at: Instant,
    outstanding: AtomicUsize,
    finalized: AtomicBool,
    terminated: AtomicBool,
    destroyed: AtomicBool,
    status: OnceLock<StatusCode>,
    module_ctx: Mutex<Extensions>,
    cleanups: Mutex<Vec<CleanupHook>>,
    responder: Mutex<Option<oneshot::Sender<Reply>>>,
}

impl Request {
    /// Creates a request with one outstanding reference (the front end's).
    ///
    /// The receiver yields the terminal reply, or an error if the request is
    /// terminated before one is produced.
    #[must_use]
    pub fn new(
        id: u64,
        context: RequestContext,
        body: Bytes,
        scope: Arc<ScopeConfig>,
    ) -> (Arc<Self>, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let request = Arc::new(Self {
            id,
            context,
            body,
            scope,
            received_at: Instant::now(),
            outstanding: AtomicUsize::new(1),
            finalized: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            status: OnceLock::new(),
            module_ctx: Mutex::new(Extensions::new()),
            cleanups: Mutex::new(Vec::new()),
            responder: Mutex::new(Some(tx)),
        });
        (request, rx)
    }

    /// Gateway-local request number.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Request data visible to expressions.
    #[must_use]
    pub const fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Buffered request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Directives of the scope this request resolved to.
    #[must_use]
    pub fn scope(&self) -> &ScopeConfig {
        &self.scope
    }

    /// When the front end accepted the request.
    #[must_use]
    pub const fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Current outstanding-work count.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Whether a terminal reply was produced or the request was terminated.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Whether the request ended through [`Request::terminate`].
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Whether the counter reached zero and the request was torn down.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Status of the terminal reply, if one was produced.
    #[must_use]
    pub fn final_status(&self) -> Option<StatusCode> {
        self.status.get().copied()
    }

    /// Takes an outstanding-work reference.
    pub fn retain(&self) {
        let previous = self.outstanding.fetch_add(1, Ordering::AcqRel);
        trace!(request = self.id, count = previous + 1, "retain");
    }

    /// Gives back an outstanding-work reference; the last one destroys the
    /// request.
    pub fn release(&self) {
        let result = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match result {
            Ok(1) => self.destroy(),
            Ok(previous) => trace!(request = self.id, count = previous - 1, "release"),
            Err(_) => debug!(request = self.id, "release on a drained request ignored"),
        }
    }

    /// Delivers the terminal reply and releases the front end's hold.
    ///
    /// Returns `false`, leaving the request untouched, if the request was
    /// already finalized or terminated.
    pub fn complete(&self, reply: Reply) -> bool {
        if self.finalized.swap(true, Ordering::AcqRel) {
            debug!(
                request = self.id,
                status = reply.status.as_u16(),
                "duplicate finalization ignored"
            );
            return false;
        }
        let _ = self.status.set(reply.status);

        let responder = self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = responder {
            // The receiver is gone when the client went away first
            let _ = tx.send(reply);
        }

        self.release();
        true
    }

    /// Ends the request early: runs the cleanup hooks (last registered
    /// first), then releases the front end's hold.
    ///
    /// A no-op after finalization.
    pub fn terminate(&self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        self.terminated.store(true, Ordering::Release);
        debug!(request = self.id, "request terminated");

        drop(
            self.responder
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        self.run_cleanups();
        self.release();
    }

    /// Registers a hook that runs once, on termination or destruction.
    ///
    /// On a request that is already terminated or destroyed the hook runs
    /// immediately.
    pub fn add_cleanup(&self, hook: impl FnOnce(&Self) + Send + 'static) {
        let mut hooks = self.cleanups.lock().unwrap_or_else(PoisonError::into_inner);
        if self.terminated.load(Ordering::Acquire) || self.destroyed.load(Ordering::Acquire) {
            drop(hooks);
            trace!(request = self.id, "cleanup added after teardown, running now");
            hook(self);
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Returns a clone of the module context of type `T`, if set.
    #[must_use]
    pub fn module_ctx<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.module_ctx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .cloned()
    }

    /// Stores the module context of type `T`.
    ///
    /// Returns `false`, leaving the existing value in place, if one is
    /// already set.
    pub fn set_module_ctx<T>(&self, value: T) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut slot = self.module_ctx.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.get::<T>().is_some() {
            return false;
        }
        slot.insert(value);
        true
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.run_cleanups();
        trace!(request = self.id, "request destroyed");
    }

    fn run_cleanups(&self) {
        let hooks = std::mem::take(
            &mut *self.cleanups.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks.into_iter().rev() {
            hook(self);
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("uri", &self.context.uri)
            .field("outstanding", &self.outstanding())
            .field("finalized", &self.is_done())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}
