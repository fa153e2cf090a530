//! Shared integration-test harness: a manually driven timer, a recording
//! content handler, request builders, and a helper that runs the
//! `stallgate` binary as a child process.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use stallgate::config::{ConfigLoader, ScopeTree};
use stallgate::engine::{self, Timer, TimerHandle, TokioTimer, WakeCallback};
use stallgate::error::{EngineError, EvalError};
use stallgate::expr::{CompiledExpr, Evaluator, RequestContext, VariableEvaluator};
use stallgate::pipeline::{
    Phase, PhaseContext, PhaseHandler, PhaseOutcome, Pipeline, PipelineBuilder, Reply, Request,
};

/// Default timeout for waiting on a child process.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Timers
// ============================================================================

struct Armed {
    delay: Duration,
    callback: Option<WakeCallback>,
    cancelled: Arc<AtomicBool>,
}

/// Timer whose callbacks run only when the test fires them.
#[derive(Default)]
pub struct ManualTimer {
    armed: Mutex<Vec<Armed>>,
}

impl ManualTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of timers armed so far.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().unwrap().len()
    }

    /// Delay of the `index`-th armed timer.
    pub fn delay(&self, index: usize) -> Duration {
        self.armed.lock().unwrap()[index].delay
    }

    /// Whether the `index`-th timer was cancelled.
    pub fn is_cancelled(&self, index: usize) -> bool {
        self.armed.lock().unwrap()[index].cancelled.load(Ordering::SeqCst)
    }

    /// Runs the `index`-th callback, as an expiry would, even if it was
    /// cancelled. Returns `false` if it already ran.
    pub fn fire_even_if_cancelled(&self, index: usize) -> bool {
        let callback = self.armed.lock().unwrap()[index].callback.take();
        callback.map(|cb| cb()).is_some()
    }

    /// Runs the `index`-th callback unless it was cancelled or already ran.
    pub fn fire(&self, index: usize) -> bool {
        if self.is_cancelled(index) {
            return false;
        }
        self.fire_even_if_cancelled(index)
    }
}

impl Timer for ManualTimer {
    fn arm(&self, delay: Duration, callback: WakeCallback) -> Result<TimerHandle, EngineError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        self.armed.lock().unwrap().push(Armed {
            delay,
            callback: Some(callback),
            cancelled,
        });
        Ok(TimerHandle::new(move || flag.store(true, Ordering::SeqCst)))
    }
}

/// Timer that can never be armed.
pub struct FailingTimer;

impl Timer for FailingTimer {
    fn arm(&self, _delay: Duration, _callback: WakeCallback) -> Result<TimerHandle, EngineError> {
        Err(EngineError::TimerUnavailable("no timer slots".to_string()))
    }
}

// ============================================================================
// Evaluators
// ============================================================================

/// Evaluator that answers one expression from a script, a value per call,
/// and resolves everything else with [`VariableEvaluator`].
///
/// Once the script runs out the scripted expression evaluates to `""`.
pub struct ScriptedEvaluator {
    source: String,
    answers: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedEvaluator {
    pub fn new(source: &str, answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            source: source.to_string(),
            answers: Mutex::new(answers.iter().map(ToString::to_string).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    /// How often the scripted expression was evaluated.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&self, expr: &CompiledExpr, ctx: &RequestContext) -> Result<String, EvalError> {
        if expr.source() != self.source {
            return VariableEvaluator.evaluate(expr, ctx);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or_default())
    }
}

// ============================================================================
// Content
// ============================================================================

/// Content handler that counts how often it ran.
#[derive(Default)]
pub struct RecordingContent {
    hits: AtomicUsize,
}

impl RecordingContent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl PhaseHandler for RecordingContent {
    fn name(&self) -> &'static str {
        "recording_content"
    }

    fn handle(&self, _cx: &PhaseContext<'_>) -> PhaseOutcome {
        self.hits.fetch_add(1, Ordering::SeqCst);
        PhaseOutcome::Complete(Reply::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"content"),
        ))
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Pipeline with the delay/block entry point and `content`.
pub fn pipeline(timer: Arc<dyn Timer>, content: Arc<RecordingContent>) -> Arc<Pipeline> {
    pipeline_with(Arc::new(VariableEvaluator), timer, content)
}

/// Same as [`pipeline`] with a custom evaluator.
pub fn pipeline_with(
    evaluator: Arc<dyn Evaluator>,
    timer: Arc<dyn Timer>,
    content: Arc<RecordingContent>,
) -> Arc<Pipeline> {
    let mut builder = PipelineBuilder::new();
    engine::install(&mut builder, evaluator, timer);
    builder.register(Phase::Content, content);
    builder.build()
}

/// Same as [`pipeline`] with the tokio timer.
pub fn tokio_pipeline(content: Arc<RecordingContent>) -> Arc<Pipeline> {
    pipeline(Arc::new(TokioTimer), content)
}

/// Compiles `yaml` into scopes.
pub fn scopes(yaml: &str) -> Arc<ScopeTree> {
    ConfigLoader::with_defaults()
        .load_str(yaml, Path::new("test.yaml"))
        .expect("test config should load")
        .scopes
}

/// A request for `uri` with `headers`, scoped through `scopes`.
pub fn request(
    scopes: &ScopeTree,
    uri: &str,
    headers: &[(&str, &str)],
) -> (Arc<Request>, oneshot::Receiver<Reply>) {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    let context = RequestContext::new(Method::GET, uri.parse().unwrap()).with_headers(map);
    let scope = scopes.resolve(context.path());
    Request::new(1, context, Bytes::new(), scope)
}

// ============================================================================
// Process harness
// ============================================================================

/// A running `stallgate serve` process on an ephemeral port.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
pub struct GatewayProcess {
    child: Child,
    pub base_url: String,
}

impl GatewayProcess {
    /// Spawns `stallgate serve` and waits for the listening line on stderr.
    pub async fn start(config_path: &Path, extra_args: &[&str]) -> Self {
        let mut args = vec![
            "-v",
            "--color",
            "never",
            "serve",
            "--config",
            config_path.to_str().expect("non-UTF-8 config path"),
            "--listen",
            "127.0.0.1:0",
        ];
        args.extend_from_slice(extra_args);

        let mut child = Command::new(env!("CARGO_BIN_EXE_stallgate"))
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn stallgate");

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        let port = tokio::time::timeout(DEFAULT_TIMEOUT, async {
            loop {
                line.clear();
                let n = reader.read_line(&mut line).await.expect("failed to read stderr");
                assert!(n > 0, "gateway exited before printing listening address");
                if line.contains("HTTP gateway listening") {
                    if let Some(port) = parse_port(&line) {
                        return port;
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for gateway startup");

        // Keep draining stderr so the child never blocks on a full pipe
        tokio::spawn(async move {
            let mut sink = String::new();
            while reader.read_line(&mut sink).await.is_ok_and(|n| n > 0) {
                sink.clear();
            }
        });

        Self {
            child,
            base_url: format!("http://127.0.0.1:{port}"),
        }
    }

    /// Sends SIGTERM-equivalent shutdown by killing the child and waiting.
    pub async fn shutdown(mut self) {
        let _ = self.child.start_kill();
        let _ = tokio::time::timeout(DEFAULT_TIMEOUT, self.child.wait()).await;
    }

    /// Runs `stallgate` with `args` to completion.
    pub fn run_command(args: &[&str]) -> std::process::Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_stallgate"))
            .args(args)
            .output()
            .expect("failed to run stallgate")
    }

    /// Returns the path to a test fixture.
    #[must_use]
    pub fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }
}

fn parse_port(line: &str) -> Option<u16> {
    let start = line.find("127.0.0.1:")? + "127.0.0.1:".len();
    let digits: String = line[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
