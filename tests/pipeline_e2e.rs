//! End-to-end tests for the admission pipeline.
//!
//! Each test stands up a real backend (mock axum server), a real proxy on an
//! ephemeral port, and drives traffic through with reqwest. Assertions cover
//! both sides: what the client got back and what the backend actually saw.

mod helpers;

use std::net::SocketAddr;
use std::sync::Arc;

use bouncer::config::parse_bouncers;
use bouncer::decider::DeciderRegistry;
use bouncer::proxy::PipelineProxy;
use bouncer::transport::install_rules;
use helpers::mock_backend::MockBackend;
use hyper::Uri;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Start a proxy for the given backend with rules parsed from YAML.
/// Returns the proxy address, a handle to the running proxy, and the
/// shutdown token.
async fn spawn_proxy(
    backend: SocketAddr,
    rules_yaml: &str,
) -> (SocketAddr, Arc<PipelineProxy>, CancellationToken) {
    let registry = DeciderRegistry::with_builtins();
    let bouncers = parse_bouncers(rules_yaml, &registry).unwrap();

    let backend_uri: Uri = format!("http://{backend}").parse().unwrap();
    let proxy = Arc::new(PipelineProxy::new(&backend_uri, bouncers, None).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let serve_proxy = proxy.clone();
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        serve_proxy.serve(listener, serve_shutdown).await.unwrap();
    });

    (addr, proxy, shutdown)
}

const ADMIN_GATE: &str = r#"
bouncers:
  - method: GET
    uriRegex: "^/admin"
    deciders:
      - name: header_equals
        config:
          header: X-Role
          value: admin
"#;

#[tokio::test]
async fn test_rejected_request_never_reaches_backend() {
    let (backend_addr, backend) = MockBackend::new().start().await;
    let (addr, _proxy, shutdown) = spawn_proxy(backend_addr, ADMIN_GATE).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/admin/users"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    let body = response.text().await.unwrap();
    assert!(body.contains("X-Role"));
    assert_eq!(backend.request_count().await, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_accepted_request_is_forwarded() {
    let (backend_addr, backend) = MockBackend::new().with_body("backend says hi").start().await;
    let (addr, _proxy, shutdown) = spawn_proxy(backend_addr, ADMIN_GATE).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/admin/users"))
        .header("X-Role", "admin")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "backend says hi");
    assert_eq!(backend.request_count().await, 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_non_matching_request_streams_through() {
    let (backend_addr, backend) = MockBackend::new().start().await;
    let (addr, _proxy, shutdown) = spawn_proxy(backend_addr, ADMIN_GATE).await;

    // POST does not match the GET rule, and neither does the path.
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/public/data"))
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(backend.request_count().await, 1);
    assert_eq!(&backend.last_body().await[..], b"payload");

    shutdown.cancel();
}

#[tokio::test]
async fn test_dry_run_logs_but_forwards() {
    let rules = r#"
bouncers:
  - method: GET
    uriRegex: "^/admin"
    dryrun: true
    deciders:
      - name: deny_all
"#;
    let (backend_addr, backend) = MockBackend::new().start().await;
    let (addr, _proxy, shutdown) = spawn_proxy(backend_addr, rules).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/admin/users"))
        .send()
        .await
        .unwrap();

    // deny_all would reject, but dry-run mode forwards anyway.
    assert_eq!(response.status(), 200);
    assert_eq!(backend.request_count().await, 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_body_limit_rejects_large_upload() {
    let rules = r#"
bouncers:
  - method: POST
    uriRegex: "^/upload"
    deciders:
      - name: allow_all
      - name: max_body_size
        config:
          limit: "1024"
          status: "403"
"#;
    let (backend_addr, backend) = MockBackend::new().start().await;
    let (addr, _proxy, shutdown) = spawn_proxy(backend_addr, rules).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/upload"))
        .body(vec![b'x'; 2000])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert_eq!(backend.request_count().await, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_matched_request_body_is_replayed_to_backend() {
    let rules = r#"
bouncers:
  - method: POST
    uriRegex: "^/upload"
    deciders:
      - name: max_body_size
        config:
          limit: "1048576"
"#;
    let (backend_addr, backend) = MockBackend::new().start().await;
    let (addr, _proxy, shutdown) = spawn_proxy(backend_addr, rules).await;

    let payload = "a".repeat(5000);
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/upload"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    // The decider consumed the body, yet the backend sees all of it.
    assert_eq!(response.status(), 200);
    assert_eq!(&backend.last_body().await[..], payload.as_bytes());

    shutdown.cancel();
}

#[tokio::test]
async fn test_first_rejection_wins_across_chain() {
    let rules = r#"
bouncers:
  - method: GET
    uriRegex: "^/secure"
    deciders:
      - name: deny_all
        config:
          status: "401"
          reason: "no credentials"
      - name: deny_all
        config:
          status: "403"
"#;
    let (backend_addr, backend) = MockBackend::new().start().await;
    let (addr, _proxy, shutdown) = spawn_proxy(backend_addr, rules).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/secure"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(response.text().await.unwrap(), "no credentials");
    assert_eq!(backend.request_count().await, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_rule_swap_on_running_proxy() {
    let (backend_addr, backend) = MockBackend::new().start().await;
    let (addr, proxy, shutdown) = spawn_proxy(backend_addr, "bouncers: []\n").await;

    let client = reqwest::Client::new();

    // Empty rule set forwards everything.
    let response = client
        .get(format!("http://{addr}/admin"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(backend.request_count().await, 1);

    // Swap in a deny rule through the generic installer, no restart.
    let registry = DeciderRegistry::with_builtins();
    let deny = parse_bouncers(
        "bouncers:\n  - method: GET\n    uriRegex: \"^/admin\"\n    deciders:\n      - name: deny_all\n",
        &registry,
    )
    .unwrap();
    install_rules(proxy.pipeline().as_ref(), deny).unwrap();

    let response = client
        .get(format!("http://{addr}/admin"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(backend.request_count().await, 1);

    shutdown.cancel();
}
