//! The pipeline transport: the outbound hop that runs the bouncer chain.
//!
//! [`PipelineTransport`] wraps a backing [`Transport`] and intercepts every
//! outbound request. Matching bouncers run in declaration order; the first
//! rejection is answered with a synthetic response and the backend is never
//! contacted. The active rule set is held in an [`ArcSwap`] so an
//! administrative [`PipelineTransport::install`] replaces it atomically while
//! requests are in flight: a concurrent reader sees the old state in full or
//! the new state in full, never a mix, and no per-request lock is taken.
//!
//! # Body replay
//!
//! A request body is a single-consume stream, but each decider may need to
//! inspect it independently. Once at least one target matches, the body is
//! collected into an immutable [`Bytes`] buffer (bounded by
//! `max_body_bytes`); every decider receives a fresh view of that buffer and
//! the eventual forward to the backend replays it from a cheap clone. A
//! request matched by no bouncer streams through without buffering.

use std::any::Any;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use opentelemetry::Context;

use crate::bouncer::{BounceOutcome, Bouncer};
use crate::decider::Verdict;
use crate::error::{ProxyError, ProxyResult, SwapError};
use crate::metrics::{self, REQUESTS_TOTAL};

/// Default cap on the buffered request body: 2 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Body type flowing through the pipeline, for both directions.
pub type ProxyBody = BoxBody<Bytes, ProxyError>;

/// A body made from an in-memory buffer.
pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// An empty body.
pub fn empty_body() -> ProxyBody {
    full_body(Bytes::new())
}

/// Box a hyper `Incoming` body into the pipeline body type.
pub fn stream_body(body: Incoming) -> ProxyBody {
    body.map_err(ProxyError::from).boxed()
}

/// A rejection coupled with the HTTP status to answer with.
///
/// This is the pipeline's verdict carrier, convertible into the synthetic
/// response sent back to the client: status from the error, body from the
/// message, no other headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    /// Status for the synthetic response.
    pub status: StatusCode,
    /// Reason text; becomes the UTF-8 response body.
    pub message: String,
}

impl HttpError {
    /// Build an error from a status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Promote a decider verdict into the servable rejection.
    pub fn from_verdict(verdict: Verdict) -> Self {
        Self {
            status: verdict.status,
            message: verdict.reason,
        }
    }

    /// Convert into the synthetic HTTP response sent to the client.
    pub fn into_response(self) -> Response<ProxyBody> {
        let mut response = Response::new(full_body(Bytes::from(self.message)));
        *response.status_mut() = self.status;
        response
    }
}

/// An outbound transport: one hop that turns a request into a response.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Forward the request and produce a response.
    async fn round_trip(&self, req: Request<ProxyBody>) -> ProxyResult<Response<ProxyBody>>;

    /// Downcast support for [`install_rules`].
    fn as_any(&self) -> &dyn Any;
}

/// The default backing transport: a pooled hyper client.
pub struct HttpTransport {
    client: Client<HttpConnector, ProxyBody>,
}

impl HttpTransport {
    /// Build a client with connection pooling and permissive HTTP/1 header
    /// handling.
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_title_case_headers(true)
            .http2_keep_alive_while_idle(true)
            .build_http::<ProxyBody>();
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, req: Request<ProxyBody>) -> ProxyResult<Response<ProxyBody>> {
        let response = self.client.request(req).await?;
        Ok(response.map(stream_body))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The full value replaced on every rule-set install.
///
/// The backing transport and the bouncer list travel together so a reader
/// can never observe fields from two different installs.
struct PipelineState {
    backing: Arc<dyn Transport>,
    bouncers: Arc<[Bouncer]>,
}

/// The transport wrapper running the admission pipeline.
pub struct PipelineTransport {
    state: ArcSwap<PipelineState>,
    max_body_bytes: usize,
}

impl PipelineTransport {
    /// Wrap a backing transport with an initial rule set.
    pub fn new(backing: Arc<dyn Transport>, bouncers: Vec<Bouncer>) -> Self {
        Self {
            state: ArcSwap::from_pointee(PipelineState {
                backing,
                bouncers: bouncers.into(),
            }),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Override the buffered-body cap.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Atomically replace the active rule set.
    ///
    /// Publishes a whole new state (keeping the backing transport handle) in
    /// a single store. In-flight intercepts that already loaded the old
    /// state finish against it; new intercepts see the new rule set.
    pub fn install(&self, bouncers: Vec<Bouncer>) {
        let backing = self.state.load().backing.clone();
        self.state.store(Arc::new(PipelineState {
            backing,
            bouncers: bouncers.into(),
        }));
    }

    /// Number of bouncers in the currently installed rule set.
    pub fn bouncer_count(&self) -> usize {
        self.state.load().bouncers.len()
    }

    /// Run the admission pipeline for one request.
    ///
    /// Every decision for this request is made against a single snapshot of
    /// the installed state, loaded once here.
    pub async fn intercept(&self, req: Request<ProxyBody>) -> ProxyResult<Response<ProxyBody>> {
        let state = self.state.load_full();
        let (parts, body) = req.into_parts();
        let cx = Context::current();

        // Non-matching traffic streams through without the buffering cost.
        if !state.bouncers.iter().any(|b| b.target.matches(&parts)) {
            REQUESTS_TOTAL
                .with_label_values(&[metrics::OUTCOME_FORWARDED])
                .inc();
            return state.backing.round_trip(Request::from_parts(parts, body)).await;
        }

        let buffered = match buffer_body(body, self.max_body_bytes).await {
            Ok(buffered) => buffered,
            Err(err) => {
                REQUESTS_TOTAL
                    .with_label_values(&[metrics::OUTCOME_REJECTED])
                    .inc();
                return Ok(err.into_response());
            }
        };

        // Each request counts toward exactly one outcome: a dry-run
        // downgrade anywhere in the chain classifies the whole request as
        // dry_run instead of forwarded.
        let mut dry_run_hit = false;
        for bouncer in state.bouncers.iter() {
            match bouncer.bounce(&parts, &buffered, &cx).await {
                BounceOutcome::Rejected(err) => {
                    REQUESTS_TOTAL
                        .with_label_values(&[metrics::OUTCOME_REJECTED])
                        .inc();
                    return Ok(err.into_response());
                }
                BounceOutcome::DryRunAllowed => dry_run_hit = true,
                BounceOutcome::Allowed => {}
            }
        }

        let outcome = if dry_run_hit {
            metrics::OUTCOME_DRY_RUN
        } else {
            metrics::OUTCOME_FORWARDED
        };
        REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
        let req = Request::from_parts(parts, full_body(buffered));
        state.backing.round_trip(req).await
    }
}

#[async_trait]
impl Transport for PipelineTransport {
    async fn round_trip(&self, req: Request<ProxyBody>) -> ProxyResult<Response<ProxyBody>> {
        self.intercept(req).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Install a rule set on a transport that may or may not be a pipeline.
///
/// This is the probe-style shape of the swap operation: it fails without
/// altering any state when the transport is not a [`PipelineTransport`].
/// Callers holding a concrete pipeline handle should prefer
/// [`PipelineTransport::install`].
pub fn install_rules(transport: &dyn Transport, bouncers: Vec<Bouncer>) -> Result<(), SwapError> {
    let pipeline = transport
        .as_any()
        .downcast_ref::<PipelineTransport>()
        .ok_or(SwapError::NotPipelineTransport)?;
    pipeline.install(bouncers);
    Ok(())
}

/// Collect the request body into an immutable buffer, bounded by `limit`.
async fn buffer_body(body: ProxyBody, limit: usize) -> Result<Bytes, HttpError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(HttpError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "request body exceeds the buffer limit",
        )),
        Err(_) => Err(HttpError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to read body from request",
        )),
    }
}
