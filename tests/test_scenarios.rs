mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::time::Instant;

use common::RecordingContent;
use stallgate::engine::{DecisionAggregator, SuspensionOutcome, SuspensionState};
use stallgate::expr::{RequestContext, VariableEvaluator};

#[tokio::test(start_paused = true)]
async fn scenario_a_delay_then_content() {
    let content = RecordingContent::new();
    let pipeline = common::tokio_pipeline(Arc::clone(&content));
    let scopes = common::scopes("sleep_ms: 100\n");
    let (request, rx) = common::request(&scopes, "/", &[]);

    let start = Instant::now();
    pipeline.start(&request);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!request.is_done(), "still held at 50ms");
    assert_eq!(content.hits(), 0);

    let reply = rx.await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.as_ref(), b"content");
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(content.hits(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_block_without_delay_is_immediate() {
    let content = RecordingContent::new();
    let pipeline = common::tokio_pipeline(Arc::clone(&content));
    let scopes = common::scopes("block:\n  when: 1\n");
    let (request, mut rx) = common::request(&scopes, "/", &[]);

    pipeline.start(&request);

    assert_eq!(rx.try_recv().unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(content.hits(), 0);
    assert_eq!(request.outstanding(), 0);
    assert!(request.module_ctx::<Arc<SuspensionState>>().is_none());
}

#[tokio::test(start_paused = true)]
async fn scenario_c_sleep_then_block() {
    let content = RecordingContent::new();
    let pipeline = common::tokio_pipeline(Arc::clone(&content));
    let scopes = common::scopes("sleep_ms: 200\nblock:\n  when: 1\n  status: 429\n");
    let (request, rx) = common::request(&scopes, "/", &[]);

    let start = Instant::now();
    pipeline.start(&request);
    let reply = rx.await.unwrap();

    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(content.hits(), 0);
    assert_eq!(request.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_largest_delay_wins() {
    let content = RecordingContent::new();
    let pipeline = common::tokio_pipeline(Arc::clone(&content));
    let scopes = common::scopes("sleep_ms:\n  - 100\n  - \"$arg_delay\"\n");
    let (request, rx) = common::request(&scopes, "/?delay=300", &[]);

    let start = Instant::now();
    pipeline.start(&request);
    let reply = rx.await.unwrap();

    assert_eq!(reply.status, StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[test]
fn scenario_e_first_true_rule_wins() {
    let scopes = common::scopes(
        "block:\n  - when: 0\n    status: 401\n  - when: 1\n    status: 418\n  - when: 1\n    status: 500\n",
    );
    let ctx = RequestContext::new(axum::http::Method::GET, "/".parse().unwrap());
    let decision = DecisionAggregator::new(Arc::new(VariableEvaluator)).evaluate(&scopes.resolve("/"), &ctx);
    assert_eq!(decision.delay_ms, 0);
    assert_eq!(decision.block.map(|b| b.status), Some(StatusCode::IM_A_TEAPOT));
}

#[tokio::test(start_paused = true)]
async fn scenario_f_disconnect_during_sleep() {
    let content = RecordingContent::new();
    let pipeline = common::tokio_pipeline(Arc::clone(&content));
    let scopes = common::scopes("sleep_ms: 500\n");
    let (request, rx) = common::request(&scopes, "/", &[]);

    pipeline.start(&request);
    assert_eq!(request.outstanding(), 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    request.terminate();
    assert_eq!(request.outstanding(), 0);
    assert!(request.is_destroyed());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(content.hits(), 0, "no resumption after cancel");
    assert_eq!(request.outstanding(), 0);
    assert!(rx.await.is_err());

    let state = request.module_ctx::<Arc<SuspensionState>>().unwrap();
    assert_eq!(state.outcome(), Some(SuspensionOutcome::Aborted));
}

#[tokio::test(start_paused = true)]
async fn malformed_delay_passes_through() {
    let content = RecordingContent::new();
    let pipeline = common::tokio_pipeline(Arc::clone(&content));
    let scopes = common::scopes("sleep_ms: \"$arg_delay\"\n");
    let (request, mut rx) = common::request(&scopes, "/?delay=abc", &[]);

    pipeline.start(&request);

    assert_eq!(rx.try_recv().unwrap().status, StatusCode::OK);
    assert_eq!(content.hits(), 1);
}

#[tokio::test(start_paused = true)]
async fn nested_location_overrides_delay() {
    let content = RecordingContent::new();
    let pipeline = common::tokio_pipeline(Arc::clone(&content));
    let scopes = common::scopes(
        "sleep_ms: 1000\nblock:\n  when: \"$http_x_fail\"\n  status: 502\nlocations:\n  - path: /fast\n    sleep_ms: 10\n",
    );

    let (request, rx) = common::request(&scopes, "/fast/ping", &[("x-fail", "1")]);
    let start = Instant::now();
    pipeline.start(&request);
    let reply = rx.await.unwrap();

    assert_eq!(reply.status, StatusCode::BAD_GATEWAY, "block inherited");
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_millis(1000), "own delay, not the parent's");
}
