//! Request targets: the predicate selecting which requests a bouncer
//! applies to.

use http::request::Parts;
use regex::Regex;

use crate::error::ConfigError;

/// A potential target for an HTTP request: a method plus a regex matched
/// against the request's path and query string.
///
/// Immutable once constructed. Construction fails if the pattern does not
/// compile, so a `Target` always holds a valid regex.
#[derive(Debug, Clone)]
pub struct Target {
    method: String,
    uri_regex: Regex,
}

impl Target {
    /// Compile a target from a method name and a URI pattern string.
    pub fn new(method: impl Into<String>, pattern: &str) -> Result<Self, ConfigError> {
        let uri_regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            method: method.into(),
            uri_regex,
        })
    }

    /// Whether this target matches the given request head.
    ///
    /// True iff the method matches case-insensitively and the compiled
    /// pattern matches the request's path+query. No side effects.
    pub fn matches(&self, parts: &Parts) -> bool {
        let method_matches = parts.method.as_str().eq_ignore_ascii_case(&self.method);
        let request_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path());
        method_matches && self.uri_regex.is_match(request_uri)
    }

    /// The configured method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The source text of the compiled URI pattern.
    pub fn pattern(&self) -> &str {
        self.uri_regex.as_str()
    }
}
