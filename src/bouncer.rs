//! The decision pipeline: a target bound to an ordered decider chain.

use std::sync::Arc;

use bytes::Bytes;
use http::request::Parts;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use tracing::info;

use crate::decider::Decider;
use crate::target::Target;
use crate::telemetry;
use crate::transport::HttpError;

/// Result of evaluating one bouncer against a request.
#[derive(Debug)]
pub enum BounceOutcome {
    /// The target did not match, or every decider allowed the request.
    Allowed,
    /// At least one decider produced a verdict, but the bouncer runs in
    /// dry-run mode so the verdict was downgraded to a log line.
    DryRunAllowed,
    /// A decider rejected; the request must be answered with this error.
    Rejected(HttpError),
}

/// A coupling of a [`Target`] and an ordered list of deciders.
///
/// Immutable after construction. A full rule set is an ordered
/// `Vec<Bouncer>`: earlier bouncers whose target matches run first, and
/// within a bouncer deciders run in listed order with first-rejection-wins.
///
/// With `dry_run` set, verdicts are logged but never enforced; every decider
/// in the chain still runs.
pub struct Bouncer {
    /// Predicate selecting the requests this bouncer applies to.
    pub target: Target,
    /// Policy checks, evaluated in order.
    pub deciders: Vec<Arc<dyn Decider>>,
    /// Log verdicts instead of enforcing them.
    pub dry_run: bool,
}

impl Bouncer {
    /// Build a bouncer from its parts.
    pub fn new(target: Target, deciders: Vec<Arc<dyn Decider>>, dry_run: bool) -> Self {
        Self {
            target,
            deciders,
            dry_run,
        }
    }

    /// Evaluate the decider chain against a request.
    ///
    /// A non-matching target returns immediately: no span is opened and
    /// nothing is logged. For a matching target, each decider receives a
    /// fresh view of the buffered body; the first verdict short-circuits the
    /// chain unless `dry_run` is set, in which case it is downgraded to a
    /// logged observation and evaluation continues. The caller learns about
    /// downgraded verdicts through [`BounceOutcome::DryRunAllowed`].
    pub async fn bounce(&self, parts: &Parts, body: &Bytes, parent: &Context) -> BounceOutcome {
        if !self.target.matches(parts) {
            return BounceOutcome::Allowed;
        }

        let bcx = telemetry::bouncer_span_cx(parent, &self.target, self.dry_run);
        let mut downgraded = false;

        for decider in &self.deciders {
            let dcx = telemetry::decider_span_cx(&bcx, decider.name());
            // Every decider gets its own unconsumed view of the body.
            let verdict = decider.decide(parts, body, &dcx).await;

            match verdict {
                Some(verdict) => {
                    dcx.span().add_event(telemetry::EVENT_REJECTED, vec![]);
                    dcx.span().end();

                    if self.dry_run {
                        downgraded = true;
                        info!(
                            method = %parts.method,
                            uri = %parts.uri,
                            decider = decider.name(),
                            status = verdict.status.as_u16(),
                            reason = %verdict.reason,
                            "would have rejected request (dry-run)"
                        );
                    } else {
                        info!(
                            method = %parts.method,
                            uri = %parts.uri,
                            decider = decider.name(),
                            status = verdict.status.as_u16(),
                            reason = %verdict.reason,
                            "rejected request"
                        );
                        bcx.span().end();
                        return BounceOutcome::Rejected(HttpError::from_verdict(verdict));
                    }
                }
                None => {
                    dcx.span().add_event(telemetry::EVENT_ACCEPTED, vec![]);
                    dcx.span().end();
                }
            }
        }

        bcx.span().end();
        if downgraded {
            BounceOutcome::DryRunAllowed
        } else {
            BounceOutcome::Allowed
        }
    }
}
