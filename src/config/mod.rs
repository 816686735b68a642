//! Rule-set configuration: the YAML schema and its compilation into
//! runnable bouncers.
//!
//! A rules file looks like:
//!
//! ```yaml
//! bouncers:
//!   - method: GET
//!     uriRegex: "^/admin"
//!     dryrun: false
//!     deciders:
//!       - name: header_equals
//!         config: { header: X-Role, value: admin }
//! ```

pub mod loader;

pub use loader::{load_bouncers, parse_bouncers, RuleReloader};

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level rules file.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesFile {
    /// Bouncers in declaration order; earlier entries are evaluated first.
    #[serde(default)]
    pub bouncers: Vec<BouncerSpec>,
}

/// One serialized bouncer rule.
#[derive(Debug, Clone, Deserialize)]
pub struct BouncerSpec {
    /// HTTP method the target matches (case-insensitive).
    pub method: String,
    /// Regex matched against the request's path+query.
    #[serde(rename = "uriRegex")]
    pub uri_regex: String,
    /// Decider chain, evaluated in listed order.
    #[serde(default)]
    pub deciders: Vec<DeciderSpec>,
    /// Log verdicts instead of enforcing them.
    #[serde(default, rename = "dryrun")]
    pub dry_run: bool,
}

/// One serialized decider reference.
#[derive(Debug, Clone, Deserialize)]
pub struct DeciderSpec {
    /// Name looked up in the decider registry.
    pub name: String,
    /// String configuration handed to the decider's constructor.
    #[serde(default)]
    pub config: HashMap<String, String>,
}
