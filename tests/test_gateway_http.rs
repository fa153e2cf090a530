use std::path::Path;
use std::time::{Duration, Instant};

use axum::Router;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::any;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use stallgate::config::ConfigLoader;
use stallgate::server::{Server, ServerOptions};

/// A gateway running in-process on an ephemeral port.
struct TestGateway {
    base_url: String,
    cancel: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    inflight: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl TestGateway {
    async fn start(yaml: &str, upstream: Option<String>) -> Self {
        let loaded = ConfigLoader::with_defaults()
            .load_str(yaml, Path::new("test.yaml"))
            .expect("test config should load");
        let cancel = CancellationToken::new();
        let server = Server::start(ServerOptions {
            config: loaded.config,
            scopes: loaded.scopes,
            listen: Some("127.0.0.1:0".to_string()),
            upstream,
            cancel: cancel.clone(),
        })
        .await
        .expect("gateway should start");

        let base_url = format!("http://{}", server.local_addr());
        let inflight = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let probe = std::sync::Arc::clone(&inflight);
        let probe_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            let watch = async {
                loop {
                    probe.store(server.inflight(), std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            };
            tokio::select! {
                () = watch => {}
                () = probe_cancel.cancelled() => {}
            }
            server.run().await.expect("gateway should stop cleanly");
        });

        Self {
            base_url,
            cancel,
            server,
            inflight,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn inflight(&self) -> usize {
        self.inflight.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("gateway should stop in time")
            .unwrap();
    }
}

/// An upstream that echoes the request line and selected headers.
async fn echo_upstream() -> String {
    async fn echo(uri: Uri, headers: HeaderMap) -> (StatusCode, [(&'static str, String); 1], String) {
        let custom = headers
            .get("x-custom")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (
            StatusCode::ACCEPTED,
            [("x-saw-custom", custom)],
            uri.to_string(),
        )
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(5)).await;
        "late"
    }

    let app = Router::new()
        .route("/slow", any(slow))
        .fallback(echo);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn delay_from_header_holds_request() {
    let gateway = TestGateway::start(
        "sleep_ms: \"$http_x_delay\"\nserver:\n  response:\n    status: 200\n    body: hello\n",
        None,
    )
    .await;
    let client = reqwest::Client::new();

    let start = Instant::now();
    let resp = client
        .get(gateway.url("/"))
        .header("x-delay", "200")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(resp.text().await.unwrap(), "hello");

    let start = Instant::now();
    let resp = client.get(gateway.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(start.elapsed() < Duration::from_millis(200));

    gateway.stop().await;
}

#[tokio::test]
async fn block_status_from_query() {
    let gateway = TestGateway::start(
        "block:\n  when: \"$arg_fail\"\n  status: \"$arg_status\"\n",
        None,
    )
    .await;

    let resp = reqwest::get(gateway.url("/any?fail=1&status=418"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);

    let resp = reqwest::get(gateway.url("/any?fail=1&status=nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = reqwest::get(gateway.url("/any?fail=0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn proxies_to_upstream_after_delay() {
    let upstream = echo_upstream().await;
    let gateway = TestGateway::start("sleep_ms: 50\n", Some(upstream)).await;

    let start = Instant::now();
    let resp = reqwest::Client::new()
        .get(gateway.url("/api/items?page=2"))
        .header("x-custom", "kept")
        .send()
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(resp.headers()["x-saw-custom"], "kept");
    assert_eq!(resp.text().await.unwrap(), "/api/items?page=2");

    gateway.stop().await;
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    // Bind and drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let gateway = TestGateway::start("{}", Some(format!("http://127.0.0.1:{port}"))).await;

    let resp = reqwest::get(gateway.url("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    gateway.stop().await;
}

#[tokio::test]
async fn slow_upstream_is_504() {
    let upstream = echo_upstream().await;
    let gateway =
        TestGateway::start("server:\n  upstream_timeout: 100ms\n", Some(upstream)).await;

    let resp = reqwest::get(gateway.url("/slow")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);

    gateway.stop().await;
}

#[tokio::test]
async fn client_disconnect_releases_request() {
    let gateway = TestGateway::start("sleep_ms: 10000\n", None).await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let result = client.get(gateway.url("/")).send().await;
    assert!(result.is_err(), "client should time out first");

    // Far ahead of the timer, so only the disconnect can drain the request
    let deadline = Instant::now() + Duration::from_secs(1);
    while gateway.inflight() != 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.inflight(), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn shutdown_answers_parked_requests_with_503() {
    let gateway = TestGateway::start("sleep_ms: 10000\n", None).await;
    let url = gateway.url("/");
    let pending = tokio::spawn(async move { reqwest::get(url).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    gateway.stop().await;

    let resp = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("client should be answered on shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
