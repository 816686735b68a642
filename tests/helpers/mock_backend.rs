//! Mock HTTP backend for integration testing.
//!
//! A configurable origin server that records what the proxy forwarded to it,
//! so tests can assert whether a request survived the bouncer chain and what
//! body the backend actually saw.
//!
//! Note: Some methods are provided for future test expansion and may not
//! be used yet. They are marked with `#[allow(dead_code)]`.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock backend server for testing.
///
/// Allows configuring the status code and body it answers with; every
/// received request is recorded for later assertions.
#[derive(Debug, Clone)]
pub struct MockBackend {
    status: StatusCode,
    response_body: String,
}

/// A single request as the backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Shared state for the mock server.
#[derive(Debug)]
struct BackendState {
    status: StatusCode,
    response_body: String,
    request_count: RwLock<u32>,
    last_request: RwLock<Option<RecordedRequest>>,
}

impl MockBackend {
    /// Create a mock backend that answers 200 "ok" to everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            response_body: "ok".to_string(),
        }
    }

    /// Override the response status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Override the response body.
    #[must_use]
    pub fn with_body(mut self, body: &str) -> Self {
        self.response_body = body.to_string();
        self
    }

    /// Start the mock server and return its address and handle.
    pub async fn start(self) -> (SocketAddr, MockBackendHandle) {
        let state = Arc::new(BackendState {
            status: self.status,
            response_body: self.response_body,
            request_count: RwLock::new(0),
            last_request: RwLock::new(None),
        });

        let app = Router::new()
            .route("/", any(handle_request))
            .route("/{*path}", any(handle_request))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (
            addr,
            MockBackendHandle {
                state,
                _handle: handle,
            },
        )
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the running mock backend.
pub struct MockBackendHandle {
    state: Arc<BackendState>,
    _handle: JoinHandle<()>,
}

impl MockBackendHandle {
    /// Number of requests that reached the backend.
    pub async fn request_count(&self) -> u32 {
        *self.state.request_count.read().await
    }

    /// The last request the backend received, if any.
    pub async fn last_request(&self) -> Option<RecordedRequest> {
        self.state.last_request.read().await.clone()
    }

    /// Body of the last request, or empty when none arrived.
    pub async fn last_body(&self) -> Bytes {
        self.state
            .last_request
            .read()
            .await
            .as_ref()
            .map(|r| r.body.clone())
            .unwrap_or_default()
    }
}

/// Record the request and answer with the configured response.
async fn handle_request(
    State(state): State<Arc<BackendState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    {
        let mut count = state.request_count.write().await;
        *count += 1;
    }
    {
        let mut last = state.last_request.write().await;
        *last = Some(RecordedRequest {
            method,
            path: uri.path().to_string(),
            headers,
            body,
        });
    }

    (state.status, state.response_body.clone())
}
