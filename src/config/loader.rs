//! Loading and compiling rule sets.
//!
//! Loading is all-or-nothing: any pattern compile failure, unknown decider
//! name, or missing required config variable rejects the whole file, so a
//! partial rule set is never installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::RulesFile;
use crate::bouncer::Bouncer;
use crate::decider::DeciderRegistry;
use crate::error::ConfigError;
use crate::metrics::RULE_RELOADS_TOTAL;
use crate::target::Target;
use crate::transport::PipelineTransport;

/// Parse a YAML document into runnable bouncers, resolving decider names
/// through the given registry.
pub fn parse_bouncers(
    contents: &str,
    registry: &DeciderRegistry,
) -> Result<Vec<Bouncer>, ConfigError> {
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyRulesFile);
    }

    let file: RulesFile = serde_yaml::from_str(contents)?;

    let mut bouncers = Vec::with_capacity(file.bouncers.len());
    for spec in &file.bouncers {
        let target = Target::new(spec.method.clone(), &spec.uri_regex)?;

        let mut deciders = Vec::with_capacity(spec.deciders.len());
        for decider_spec in &spec.deciders {
            deciders.push(registry.build(&decider_spec.name, &decider_spec.config)?);
        }

        bouncers.push(Bouncer::new(target, deciders, spec.dry_run));
    }

    Ok(bouncers)
}

/// Read a rules file from disk and compile it.
pub fn load_bouncers(
    path: &Path,
    registry: &DeciderRegistry,
) -> Result<Vec<Bouncer>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bouncers(&contents, registry)
}

/// Re-reads the rules file and installs the result atomically.
///
/// Invoked by SIGHUP and the admin reload endpoint. On any load failure the
/// previously installed rule set stays active.
pub struct RuleReloader {
    path: PathBuf,
    registry: Arc<DeciderRegistry>,
    pipeline: Arc<PipelineTransport>,
}

impl RuleReloader {
    /// Wire a reloader to a rules file and a live pipeline.
    pub fn new(
        path: PathBuf,
        registry: Arc<DeciderRegistry>,
        pipeline: Arc<PipelineTransport>,
    ) -> Self {
        Self {
            path,
            registry,
            pipeline,
        }
    }

    /// Reload and install, returning the number of installed bouncers.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        match load_bouncers(&self.path, &self.registry) {
            Ok(bouncers) => {
                let count = bouncers.len();
                self.pipeline.install(bouncers);
                RULE_RELOADS_TOTAL.with_label_values(&["ok"]).inc();
                info!(path = %self.path.display(), bouncers = count, "installed rule set");
                Ok(count)
            }
            Err(err) => {
                RULE_RELOADS_TOTAL.with_label_values(&["error"]).inc();
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "rule reload failed, keeping previous rule set"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_RULES: &str = r#"
bouncers:
  - method: GET
    uriRegex: "^/admin"
    deciders:
      - name: header_equals
        config:
          header: X-Role
          value: admin
"#;

    fn registry() -> DeciderRegistry {
        DeciderRegistry::with_builtins()
    }

    #[test]
    fn test_parse_minimal_rules() {
        let bouncers = parse_bouncers(MINIMAL_RULES, &registry()).unwrap();
        assert_eq!(bouncers.len(), 1);
        assert_eq!(bouncers[0].target.method(), "GET");
        assert_eq!(bouncers[0].target.pattern(), "^/admin");
        assert_eq!(bouncers[0].deciders.len(), 1);
        assert!(!bouncers[0].dry_run);
    }

    #[test]
    fn test_dryrun_flag_and_empty_decider_chain() {
        let yaml = r#"
bouncers:
  - method: POST
    uriRegex: "^/upload"
    dryrun: true
"#;
        let bouncers = parse_bouncers(yaml, &registry()).unwrap();
        assert!(bouncers[0].dry_run);
        assert!(bouncers[0].deciders.is_empty());
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let result = parse_bouncers("   \n", &registry());
        assert!(matches!(result, Err(ConfigError::EmptyRulesFile)));
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        let yaml = r#"
bouncers:
  - method: GET
    uriRegex: "^/admin("
"#;
        let result = parse_bouncers(yaml, &registry());
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_unknown_decider_is_fatal() {
        let yaml = r#"
bouncers:
  - method: GET
    uriRegex: "^/admin"
    deciders:
      - name: nonexistent
"#;
        let result = parse_bouncers(yaml, &registry());
        assert!(matches!(
            result,
            Err(ConfigError::UnknownDecider { name }) if name == "nonexistent"
        ));
    }

    #[test]
    fn test_missing_required_config_var_is_fatal() {
        let yaml = r#"
bouncers:
  - method: GET
    uriRegex: "^/admin"
    deciders:
      - name: header_equals
        config:
          header: X-Role
"#;
        let result = parse_bouncers(yaml, &registry());
        assert!(matches!(
            result,
            Err(ConfigError::MissingConfigVar { decider, key })
                if decider == "header_equals" && key == "value"
        ));
    }

    #[test]
    fn test_load_is_all_or_nothing() {
        // First rule is fine; the second must sink the whole load.
        let yaml = r#"
bouncers:
  - method: GET
    uriRegex: "^/ok"
  - method: GET
    uriRegex: "^/bad"
    deciders:
      - name: nonexistent
"#;
        let result = parse_bouncers(yaml, &registry());
        assert!(result.is_err());
    }

    #[test]
    fn test_declaration_order_is_preserved() {
        let yaml = r#"
bouncers:
  - method: GET
    uriRegex: "^/first"
  - method: GET
    uriRegex: "^/second"
"#;
        let bouncers = parse_bouncers(yaml, &registry()).unwrap();
        assert_eq!(bouncers[0].target.pattern(), "^/first");
        assert_eq!(bouncers[1].target.pattern(), "^/second");
    }

    #[test]
    fn test_load_bouncers_missing_file() {
        let result = load_bouncers(Path::new("/nonexistent/rules.yaml"), &registry());
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
