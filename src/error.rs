//! Error types for the bouncer proxy.
//!
//! Three distinct taxonomies live here:
//!
//! - [`ConfigError`] - rule-set load failures. Always fatal for the whole
//!   load; a partially valid rule set is never installed.
//! - [`ProxyError`] - transport faults while forwarding. Surfaced to the
//!   client as a 502 by the server layer.
//! - [`SwapError`] - a rule-set install aimed at the wrong transport kind.
//!
//! Rejections themselves are *not* errors: a decider verdict is a first-class
//! outcome carried by [`crate::transport::HttpError`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading and compiling a rule set.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The rules file could not be read.
    #[error("failed to read rules file {path}: {source}")]
    Io {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The rules file was empty or whitespace-only.
    #[error("rules file is empty")]
    EmptyRulesFile,

    /// The rules file was not valid YAML for the expected schema.
    #[error("failed to parse rules file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A target's URI pattern did not compile.
    #[error("invalid URI pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern string
        pattern: String,
        /// Compile error from the regex engine
        source: regex::Error,
    },

    /// A rule referenced a decider name the registry does not know.
    #[error("no decider named '{name}' is registered")]
    UnknownDecider {
        /// The unresolved decider name
        name: String,
    },

    /// A decider's declared required config variable was absent.
    #[error("decider '{decider}' requires config variable '{key}'")]
    MissingConfigVar {
        /// Decider name
        decider: String,
        /// The missing key
        key: String,
    },

    /// A config variable was present but unusable.
    #[error("invalid config for decider '{decider}': {message}")]
    InvalidDeciderConfig {
        /// Decider name
        decider: String,
        /// What was wrong with the value
        message: String,
    },
}

/// Transport-level faults while forwarding to the backend.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The outbound client failed (connect, pool, protocol).
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// A body stream errored mid-flight.
    #[error("body stream error: {0}")]
    Body(#[from] hyper::Error),

    /// The configured backend URL is unusable as a forward target.
    #[error("invalid backend URL: {0}")]
    InvalidBackend(String),

    /// Listener or connection I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for transport operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors from the rule-set swap operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwapError {
    /// The given transport is not a pipeline transport; the rule set that
    /// was active before the call remains active.
    #[error("given transport is not a pipeline transport")]
    NotPipelineTransport,
}
