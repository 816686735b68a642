//! Single-host reverse proxy wired through the pipeline transport.

use std::convert::Infallible;
use std::sync::Arc;

use http::header::{HeaderValue, HOST};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderName, Request, Response, StatusCode, Uri};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bouncer::Bouncer;
use crate::error::{ProxyError, ProxyResult};
use crate::transport::{
    full_body, stream_body, HttpTransport, PipelineTransport, ProxyBody, Transport,
};

/// A reverse proxy pointed at a single backend, running the bouncer
/// pipeline on every request it forwards.
///
/// Callers hold the concrete [`PipelineTransport`] handle through
/// [`PipelineProxy::pipeline`] for runtime rule-set swaps.
pub struct PipelineProxy {
    backend_scheme: Scheme,
    backend_authority: Authority,
    pipeline: Arc<PipelineTransport>,
}

impl PipelineProxy {
    /// Build a proxy for `backend`, seeded with `bouncers`.
    ///
    /// `backing` is the transport used for the actual forward; when `None`,
    /// a default pooled [`HttpTransport`] is used. The backend URI must
    /// carry a scheme and an authority.
    pub fn new(
        backend: &Uri,
        bouncers: Vec<Bouncer>,
        backing: Option<Arc<dyn Transport>>,
    ) -> ProxyResult<Self> {
        let backend_scheme = backend
            .scheme()
            .cloned()
            .ok_or_else(|| ProxyError::InvalidBackend(format!("'{backend}' has no scheme")))?;
        let backend_authority = backend
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::InvalidBackend(format!("'{backend}' has no authority")))?;

        let backing = backing.unwrap_or_else(|| Arc::new(HttpTransport::new()));

        Ok(Self {
            backend_scheme,
            backend_authority,
            pipeline: Arc::new(PipelineTransport::new(backing, bouncers)),
        })
    }

    /// Override the buffered-body cap on the underlying pipeline.
    ///
    /// Only meaningful before the proxy starts serving.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        let pipeline = Arc::into_inner(self.pipeline)
            .expect("pipeline is unshared during construction")
            .with_max_body_bytes(max_body_bytes);
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Handle to the pipeline transport, for rule-set swaps.
    pub fn pipeline(&self) -> Arc<PipelineTransport> {
        self.pipeline.clone()
    }

    /// Handle one inbound request: rewrite it for the backend and run it
    /// through the pipeline.
    pub async fn handle(&self, req: Request<Incoming>) -> ProxyResult<Response<ProxyBody>> {
        let req = self.rewrite(req.map(stream_body))?;
        self.pipeline.intercept(req).await
    }

    /// Point the request at the backend: swap in the backend's scheme and
    /// authority (keeping path+query), rewrite `Host`, and strip hop-by-hop
    /// headers.
    fn rewrite(&self, req: Request<ProxyBody>) -> ProxyResult<Request<ProxyBody>> {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        parts.uri = Uri::builder()
            .scheme(self.backend_scheme.clone())
            .authority(self.backend_authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::InvalidBackend(e.to_string()))?;

        let hop_by_hop: Vec<HeaderName> = parts
            .headers
            .keys()
            .filter(|name| is_hop_by_hop_header(name.as_str()))
            .cloned()
            .collect();
        for name in hop_by_hop {
            parts.headers.remove(name);
        }

        let host = HeaderValue::from_str(self.backend_authority.as_str())
            .map_err(|e| ProxyError::InvalidBackend(e.to_string()))?;
        parts.headers.insert(HOST, host);

        Ok(Request::from_parts(parts, body))
    }

    /// Accept connections until the token is cancelled, serving each through
    /// the pipeline.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> ProxyResult<()> {
        info!(
            backend = %self.backend_authority,
            "pipeline proxy serving"
        );

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("pipeline proxy shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };

            debug!(peer = %peer_addr, "accepted connection");
            let proxy = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let proxy = proxy.clone();
                    async move {
                        match proxy.handle(req).await {
                            Ok(response) => Ok::<_, Infallible>(response),
                            Err(err) => {
                                error!(error = %err, "forwarding failed");
                                Ok(bad_gateway())
                            }
                        }
                    }
                });

                if let Err(err) = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(error = %err, "connection closed with error");
                }
            });
        }
    }
}

/// The response served when the backend is unreachable or the forward
/// itself fails.
fn bad_gateway() -> Response<ProxyBody> {
    let mut response = Response::new(full_body("upstream unavailable"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

/// Hop-by-hop headers are connection-scoped and must not be forwarded.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
