//! Builtin decider templates.
//!
//! These cover the common admission checks so a useful rule set needs no
//! external code: header equality, body-size limits, and unconditional
//! allow/deny. All of them accept an optional `status` config variable
//! overriding the rejection status code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::request::Parts;
use http::StatusCode;
use opentelemetry::Context;

use crate::error::ConfigError;

use super::{Decider, DeciderRegistry, DeciderTemplate, Verdict};

/// Register every builtin template on the given registry.
pub fn register(registry: &mut DeciderRegistry) {
    registry.register(
        "header_equals",
        DeciderTemplate {
            required_config: &["header", "value"],
            build: build_header_equals,
        },
    );
    registry.register(
        "max_body_size",
        DeciderTemplate {
            required_config: &["limit"],
            build: build_max_body_size,
        },
    );
    registry.register(
        "deny_all",
        DeciderTemplate {
            required_config: &[],
            build: build_deny_all,
        },
    );
    registry.register(
        "allow_all",
        DeciderTemplate {
            required_config: &[],
            build: build_allow_all,
        },
    );
}

fn parse_status(
    decider: &str,
    config: &HashMap<String, String>,
    default: StatusCode,
) -> Result<StatusCode, ConfigError> {
    match config.get("status") {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| ConfigError::InvalidDeciderConfig {
                decider: decider.to_string(),
                message: format!("'{raw}' is not a valid HTTP status code"),
            }),
    }
}

/// Rejects requests whose named header is absent or differs from the
/// configured value.
struct HeaderEquals {
    header: String,
    value: String,
    status: StatusCode,
}

#[async_trait]
impl Decider for HeaderEquals {
    fn name(&self) -> &str {
        "header_equals"
    }

    async fn decide(&self, parts: &Parts, _body: &[u8], _cx: &Context) -> Option<Verdict> {
        let matches = parts
            .headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == self.value)
            .unwrap_or(false);

        if matches {
            None
        } else {
            Some(Verdict::new(
                self.status,
                format!("header '{}' does not have the required value", self.header),
            ))
        }
    }
}

fn build_header_equals(config: &HashMap<String, String>) -> Result<Arc<dyn Decider>, ConfigError> {
    // required_config guarantees presence of both keys
    let header = config["header"].clone();
    let value = config["value"].clone();
    let status = parse_status("header_equals", config, StatusCode::FORBIDDEN)?;
    Ok(Arc::new(HeaderEquals {
        header,
        value,
        status,
    }))
}

/// Rejects requests whose buffered body exceeds a byte limit.
struct MaxBodySize {
    limit: usize,
    status: StatusCode,
}

#[async_trait]
impl Decider for MaxBodySize {
    fn name(&self) -> &str {
        "max_body_size"
    }

    async fn decide(&self, _parts: &Parts, body: &[u8], _cx: &Context) -> Option<Verdict> {
        if body.len() > self.limit {
            Some(Verdict::new(
                self.status,
                format!(
                    "request body of {} bytes exceeds the limit of {} bytes",
                    body.len(),
                    self.limit
                ),
            ))
        } else {
            None
        }
    }
}

fn build_max_body_size(config: &HashMap<String, String>) -> Result<Arc<dyn Decider>, ConfigError> {
    let raw = &config["limit"];
    let limit = raw
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidDeciderConfig {
            decider: "max_body_size".to_string(),
            message: format!("'{raw}' is not a valid byte count"),
        })?;
    let status = parse_status("max_body_size", config, StatusCode::PAYLOAD_TOO_LARGE)?;
    Ok(Arc::new(MaxBodySize { limit, status }))
}

/// Rejects every matching request. Useful for maintenance fences and as a
/// dry-run probe.
struct DenyAll {
    status: StatusCode,
    reason: String,
}

#[async_trait]
impl Decider for DenyAll {
    fn name(&self) -> &str {
        "deny_all"
    }

    async fn decide(&self, _parts: &Parts, _body: &[u8], _cx: &Context) -> Option<Verdict> {
        Some(Verdict::new(self.status, self.reason.clone()))
    }
}

fn build_deny_all(config: &HashMap<String, String>) -> Result<Arc<dyn Decider>, ConfigError> {
    let status = parse_status("deny_all", config, StatusCode::FORBIDDEN)?;
    let reason = config
        .get("reason")
        .cloned()
        .unwrap_or_else(|| "request denied".to_string());
    Ok(Arc::new(DenyAll { status, reason }))
}

/// Allows every request unconditionally.
struct AllowAll;

#[async_trait]
impl Decider for AllowAll {
    fn name(&self) -> &str {
        "allow_all"
    }

    async fn decide(&self, _parts: &Parts, _body: &[u8], _cx: &Context) -> Option<Verdict> {
        None
    }
}

fn build_allow_all(_config: &HashMap<String, String>) -> Result<Arc<dyn Decider>, ConfigError> {
    Ok(Arc::new(AllowAll))
}
