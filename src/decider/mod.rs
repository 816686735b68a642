//! Deciders: pluggable policy checks producing allow/reject verdicts.
//!
//! A decider is a unit of policy logic. Given the head of a request, a view
//! of its buffered body, and a tracing context, it either allows the request
//! (returns `None`) or rejects it with a [`Verdict`] carrying an HTTP status
//! and a human-readable reason.
//!
//! # Chain semantics
//!
//! - Deciders run in the order they are listed on a bouncer.
//! - The first verdict wins: later deciders never execute (unless the
//!   bouncer is in dry-run mode, where every decider runs and verdicts are
//!   only logged).
//! - Every decider receives an identical, unconsumed view of the request
//!   body, independent of what earlier deciders did with theirs.
//!
//! Deciders are resolved by name through a [`DeciderRegistry`] at rule-load
//! time; the registry is an explicit value handed to the loader, never
//! process-global state, so tests and independent pipelines stay isolated.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::request::Parts;
use http::StatusCode;
use opentelemetry::Context;

use crate::error::ConfigError;

/// A rejection verdict: the HTTP status to answer with and the reason why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Status code for the synthetic response.
    pub status: StatusCode,
    /// Human-readable reason; becomes the response body.
    pub reason: String,
}

impl Verdict {
    /// Build a verdict from a status and reason.
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// A single policy check in a bouncer's chain.
///
/// Implementations must be safe to invoke once per request per bouncer
/// evaluation. The `body` slice is a fresh view of the buffered request body
/// for this invocation only; reading it cannot starve later deciders or the
/// eventual forward to the backend.
///
/// The OpenTelemetry `Context` carries the decider's span, so any outbound
/// work a decider performs can be parented correctly. Cancellation is the
/// usual async contract: if the client goes away the evaluation future is
/// dropped mid-await.
///
/// A decider that panics is a defect of the decider, not of the pipeline;
/// panics are not caught here.
#[async_trait]
pub trait Decider: Send + Sync {
    /// Unique name, used in logs and spans.
    fn name(&self) -> &str;

    /// Evaluate the request. `None` means allow.
    async fn decide(&self, parts: &Parts, body: &[u8], cx: &Context) -> Option<Verdict>;
}

impl std::fmt::Debug for dyn Decider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decider").field("name", &self.name()).finish()
    }
}

/// Constructor for a named decider plus the config keys it insists on.
pub struct DeciderTemplate {
    /// Config keys that must be present for [`DeciderTemplate::build`] to be
    /// invoked. Checked by the registry before construction.
    pub required_config: &'static [&'static str],
    /// Construct the runnable decider from its string config map.
    pub build: fn(&HashMap<String, String>) -> Result<Arc<dyn Decider>, ConfigError>,
}

/// An explicit mapping from decider names to their templates.
///
/// Handed to the rule loader; looked up only during configuration loading,
/// never on the request path.
#[derive(Default)]
pub struct DeciderRegistry {
    templates: HashMap<&'static str, DeciderTemplate>,
}

impl DeciderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the builtin deciders.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register a template under a name, replacing any previous entry.
    pub fn register(&mut self, name: &'static str, template: DeciderTemplate) {
        self.templates.insert(name, template);
    }

    /// Whether a template with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Resolve `name` and construct a decider from `config`.
    ///
    /// Fails with `UnknownDecider` for an unregistered name and
    /// `MissingConfigVar` if any declared required key is absent, before the
    /// template's constructor ever runs.
    pub fn build(
        &self,
        name: &str,
        config: &HashMap<String, String>,
    ) -> Result<Arc<dyn Decider>, ConfigError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDecider {
                name: name.to_string(),
            })?;

        for key in template.required_config {
            if !config.contains_key(*key) {
                return Err(ConfigError::MissingConfigVar {
                    decider: name.to_string(),
                    key: (*key).to_string(),
                });
            }
        }

        (template.build)(config)
    }
}
