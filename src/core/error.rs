//! Error taxonomy for parsing, resolution, execution and revert.

use super::registry::ParamKind;
use super::types::{Action, Entity};

/// Error reported by a driver or by the platform behind it.
///
/// `code` carries the platform's machine-readable error code when there is one;
/// dry-run classification looks at it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render_driver_error(.code, .message))]
pub struct DriverError {
    pub code: Option<String>,
    pub message: String,
}

fn render_driver_error(code: &Option<String>, message: &str) -> String {
    match code {
        Some(code) => format!("{}: {}", code, message),
        None => message.to_string(),
    }
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

/// All errors surfaced by kumo.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Text does not match the template grammar.
    #[error("syntax error at line {line}, column {column} ({rule}): {message}")]
    Syntax {
        rule: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("unknown action '{action}' at line {line}, column {column}")]
    UnknownAction {
        action: String,
        line: usize,
        column: usize,
    },

    #[error("unknown entity '{entity}' at line {line}, column {column}")]
    UnknownEntity {
        entity: String,
        line: usize,
        column: usize,
    },

    /// A `$ref` names nothing bound earlier in the run.
    #[error("unresolved reference ${0}")]
    UnresolvedReference(String),

    #[error("unresolved alias @{0}")]
    UnresolvedAlias(String),

    #[error("unresolved hole {{{hole}}}: {reason}")]
    UnresolvedHole { hole: String, reason: String },

    #[error("{action} {entity}: parameter '{key}' expects {expected}, got {found}")]
    ParamType {
        action: Action,
        entity: Entity,
        key: String,
        expected: ParamKind,
        found: &'static str,
    },

    #[error("{action} {entity}: missing required parameter '{key}'")]
    MissingParam {
        action: Action,
        entity: Entity,
        key: String,
    },

    #[error("no driver registered for {action} {entity}")]
    NoDriver { action: Action, entity: Entity },

    /// Underlying operation failed; the driver's error is kept verbatim.
    #[error("{action} {entity}: {source}")]
    Driver {
        action: Action,
        entity: Entity,
        #[source]
        source: DriverError,
    },

    #[error("identifier '{0}' is already declared in this template")]
    Redeclared(String),

    #[error("no inverse for action '{action}' on {entity}")]
    NoInverseAction { action: Action, entity: Entity },

    #[error("cannot revert {action} {entity}: {reason}")]
    MissingRevertData {
        action: Action,
        entity: Entity,
        reason: String,
    },

    #[error("corrupt execution record {revert_id}: {reason}")]
    CorruptRecord { revert_id: String, reason: String },

    #[error("no execution recorded under revert id {0}")]
    RecordNotFound(String),

    /// The failing statement's 1-based position and rendered text.
    #[error("statement {index} failed ({statement}): {source}")]
    StatementFailed {
        index: usize,
        statement: String,
        #[source]
        source: Box<Error>,
    },

    #[error("history store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// True for the resolution-stage failures (reference, alias, hole).
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedReference(_) | Self::UnresolvedAlias(_) | Self::UnresolvedHole { .. }
        )
    }

    /// Innermost error, looking through `StatementFailed` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::StatementFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
