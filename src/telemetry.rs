//! Span instrumentation for the decision pipeline.
//!
//! One span is opened per matching bouncer evaluation and one per decider
//! invocation within it, parented through OpenTelemetry `Context`s so a
//! decider's own outbound work lands under its decider span.

use opentelemetry::{
    global,
    trace::{Span, TraceContextExt, Tracer},
    Context, KeyValue,
};

use crate::target::Target;

/// HTTP method of the target that matched.
pub const TARGET_METHOD: &str = "bouncer.target.method";

/// Source text of the target's URI pattern.
pub const TARGET_PATTERN: &str = "bouncer.target.pattern";

/// Whether the bouncer was evaluated in dry-run mode.
pub const DRY_RUN: &str = "bouncer.dry_run";

/// Name of the decider being invoked.
pub const DECIDER_NAME: &str = "decider.name";

/// Event added when a decider allows the request.
pub const EVENT_ACCEPTED: &str = "decider.accepted";

/// Event added when a decider produces a verdict.
pub const EVENT_REJECTED: &str = "decider.rejected";

const TRACER_NAME: &str = "bouncer";

/// Open a `bouncer` span for a matching target and return the child context
/// carrying it.
///
/// The caller ends the span through the returned context
/// (`cx.span().end()`).
pub fn bouncer_span_cx(parent: &Context, target: &Target, dry_run: bool) -> Context {
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder("bouncer")
        .with_attributes([
            KeyValue::new(TARGET_METHOD, target.method().to_string()),
            KeyValue::new(TARGET_PATTERN, target.pattern().to_string()),
            KeyValue::new(DRY_RUN, dry_run),
        ])
        .start_with_context(&tracer, parent);
    parent.with_span(span)
}

/// Open a `decider` span under the bouncer context and return the child
/// context carrying it. This context is also what the decider receives as
/// its evaluation context.
pub fn decider_span_cx(parent: &Context, name: &str) -> Context {
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder("decider")
        .with_attributes([KeyValue::new(DECIDER_NAME, name.to_string())])
        .start_with_context(&tracer, parent);
    parent.with_span(span)
}
