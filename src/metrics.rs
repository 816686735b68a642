//! Prometheus counters for the decision pipeline.
//!
//! Registered on the default registry so the admin server's `/metrics`
//! endpoint can gather them without extra plumbing.

use std::sync::LazyLock;

use prometheus::{register_int_counter_vec, IntCounterVec};

/// Requests seen by the pipeline transport, labelled by outcome:
/// `forwarded`, `rejected`, or `dry_run` (a verdict was only logged).
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "bouncer_requests_total",
        "Requests processed by the bouncing pipeline, by outcome",
        &["outcome"]
    )
    .expect("metric registration")
});

/// Rule-set reload attempts, labelled `ok` or `error`.
pub static RULE_RELOADS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "bouncer_rule_reloads_total",
        "Rule-set reload attempts, by result",
        &["result"]
    )
    .expect("metric registration")
});

/// Outcome label for a request that was forwarded to the backend.
pub const OUTCOME_FORWARDED: &str = "forwarded";
/// Outcome label for a request answered with a synthetic rejection.
pub const OUTCOME_REJECTED: &str = "rejected";
/// Outcome label for a request that would have been rejected but passed
/// because its bouncer runs in dry-run mode.
pub const OUTCOME_DRY_RUN: &str = "dry_run";
