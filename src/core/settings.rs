//! YAML configuration: state directory, aliases, pre-supplied holes, policies.
//!
//! A missing config file yields defaults. `validate_settings` checks:
//! - Version must be "1.0"
//! - Alias names and hole names are valid template tokens
//! - Alias targets are literal template values

use super::error::Error;
use super::parser::{parse_value, ValidationError};
use super::resolver::RedeclarationPolicy;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name.
pub const DEFAULT_CONFIG: &str = "kumo.yaml";

/// Top-level kumo.yaml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,

    /// Records, sandbox state and the event log live here
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// `@name` → identifier
    #[serde(default)]
    pub aliases: IndexMap<String, String>,

    /// `{hole}` → value, used before prompting
    #[serde(default)]
    pub holes: IndexMap<String, String>,

    #[serde(default)]
    pub policy: Policy,
}

/// Run policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    #[serde(default)]
    pub redeclaration: RedeclarationPolicy,

    /// Append run events to `<state_dir>/events.jsonl`
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            redeclaration: RedeclarationPolicy::default(),
            event_log: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            state_dir: default_state_dir(),
            aliases: IndexMap::new(),
            holes: IndexMap::new(),
            policy: Policy::default(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_true() -> bool {
    true
}

/// Load settings from `path`; a missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<Settings, Error> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_settings(&content)
}

/// Parse settings from a YAML string.
pub fn parse_settings(yaml: &str) -> Result<Settings, Error> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Config(format!("YAML parse error: {}", e)))
}

/// Validate parsed settings. Returns a list of errors (empty = valid).
pub fn validate_settings(settings: &Settings) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if settings.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", settings.version),
        });
    }

    if settings.state_dir.as_os_str().is_empty() {
        errors.push(ValidationError {
            message: "state_dir must not be empty".to_string(),
        });
    }

    for (name, target) in &settings.aliases {
        // `@name` must itself parse
        if !matches!(parse_value(&format!("@{}", name)), Ok(super::types::Value::Alias(ref n)) if n == name) {
            errors.push(ValidationError {
                message: format!("alias '{}' is not a valid alias name", name),
            });
        }
        if !matches!(parse_value(target), Ok(ref v) if v.is_literal()) {
            errors.push(ValidationError {
                message: format!("alias '{}' target '{}' is not a literal value", name, target),
            });
        }
    }

    for name in settings.holes.keys() {
        if !matches!(parse_value(&format!("{{{}}}", name)), Ok(super::types::Value::Hole(ref n)) if n == name) {
            errors.push(ValidationError {
                message: format!("hole '{}' is not a valid identifier", name),
            });
        }
    }

    errors
}

/// Starter config written by `kumo init`.
pub fn starter_settings() -> String {
    r#"version: "1.0"
state_dir: state
aliases: {}
holes: {}
policy:
  redeclaration: overwrite
  event_log: true
"#
    .to_string()
}
