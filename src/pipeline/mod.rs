//! Host phase pipeline.
//!
//! Handlers are registered per [`Phase`] on a [`PipelineBuilder`] once at
//! startup; [`PipelineBuilder::build`] flattens them into an immutable,
//! ordered handler list. A request walks that list from a given index until
//! a handler does something other than decline.

pub mod content;
pub mod request;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, trace};

pub use request::{CleanupHook, Reply, Request};

/// Processing phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// URI rewriting and early decisions.
    Rewrite,
    /// Access control.
    Access,
    /// Response generation.
    Content,
}

impl Phase {
    /// Lowercase phase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::Access => "access",
            Self::Content => "content",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a phase handler did with the request.
#[derive(Debug)]
pub enum PhaseOutcome {
    /// Not applicable; run the next handler.
    Declined,
    /// The handler keeps the request and will drive it on later.
    Pending,
    /// Short-circuit with a status reply.
    Finalize(StatusCode),
    /// Short-circuit with a complete reply.
    Complete(Reply),
}

/// Per-invocation view handed to a phase handler.
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    /// The pipeline running the request, for handlers that resume it later.
    pub pipeline: &'a Arc<Pipeline>,
    /// The request being processed.
    pub request: &'a Arc<Request>,
    /// Position of the invoked handler in the flattened list.
    pub index: usize,
    /// Phase the invoked handler is registered at.
    pub phase: Phase,
}

/// A pipeline stage.
pub trait PhaseHandler: Send + Sync {
    /// Short handler name for logs.
    fn name(&self) -> &'static str;

    /// Processes the request at this stage.
    fn handle(&self, cx: &PhaseContext<'_>) -> PhaseOutcome;
}

// ============================================================================
// Builder
// ============================================================================

/// Collects handler registrations before the pipeline is frozen.
#[derive(Default)]
pub struct PipelineBuilder {
    phases: BTreeMap<Phase, Vec<Arc<dyn PhaseHandler>>>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to `phase`.
    pub fn register(&mut self, phase: Phase, handler: Arc<dyn PhaseHandler>) -> &mut Self {
        debug!(phase = %phase, handler = handler.name(), "registering phase handler");
        self.phases.entry(phase).or_default().push(handler);
        self
    }

    /// Whether a handler named `name` is registered at `phase`.
    #[must_use]
    pub fn is_registered(&self, phase: Phase, name: &str) -> bool {
        self.phases
            .get(&phase)
            .is_some_and(|handlers| handlers.iter().any(|h| h.name() == name))
    }

    /// Freezes the registrations in phase order.
    #[must_use]
    pub fn build(self) -> Arc<Pipeline> {
        let handlers = self
            .phases
            .into_iter()
            .flat_map(|(phase, handlers)| handlers.into_iter().map(move |h| (phase, h)))
            .collect();
        Arc::new(Pipeline { handlers })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("handlers", &self.phases.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Immutable, ordered list of phase handlers.
pub struct Pipeline {
    handlers: Vec<(Phase, Arc<dyn PhaseHandler>)>,
}

impl Pipeline {
    /// Runs a new request from the first handler.
    pub fn start(self: &Arc<Self>, request: &Arc<Request>) {
        self.run(request, 0);
    }

    /// Runs `request` from handler index `from`.
    ///
    /// Falls through to a 404 when every remaining handler declines. Does
    /// nothing once the request is finalized or terminated.
    pub fn run(self: &Arc<Self>, request: &Arc<Request>, from: usize) {
        for (index, (phase, handler)) in self.handlers.iter().enumerate().skip(from) {
            if request.is_done() {
                trace!(request = request.id(), "request already finished");
                return;
            }

            let cx = PhaseContext {
                pipeline: self,
                request,
                index,
                phase: *phase,
            };
            match handler.handle(&cx) {
                PhaseOutcome::Declined => {}
                PhaseOutcome::Pending => {
                    trace!(request = request.id(), handler = handler.name(), "pending");
                    return;
                }
                PhaseOutcome::Finalize(status) => {
                    Self::finalize(request, status);
                    return;
                }
                PhaseOutcome::Complete(reply) => {
                    request.complete(reply);
                    return;
                }
            }
        }

        if !request.is_done() {
            Self::finalize(request, StatusCode::NOT_FOUND);
        }
    }

    /// Ends `request` with a status reply, skipping all further handlers.
    pub fn finalize(request: &Request, status: StatusCode) {
        debug!(request = request.id(), status = status.as_u16(), "finalizing request");
        request.complete(Reply::status(status));
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Names of the registered handlers, in execution order.
    #[must_use]
    pub fn handler_names(&self) -> Vec<(Phase, &'static str)> {
        self.handlers.iter().map(|(p, h)| (*p, h.name())).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handler_names())
            .finish()
    }
}
