//! Revert generation: derive an inverse template from an execution record.
//!
//! Only successful entries are inverted, last executed first. Inverse parameters come
//! from the values and results captured at execution time, never from re-resolving
//! references, aliases or holes.

use super::error::Error;
use super::parser::parse_value;
use super::resolver::classify;
use super::types::{
    Action, Entity, ExecutionEntry, ExecutionRecord, Expression, Params, RunEvent, Statement,
    Template, Value,
};
use crate::journal::eventlog::RunLog;
use std::fmt;

/// A skipped entry and why.
#[derive(Debug)]
pub struct Diagnostic {
    /// Statement position in the source template
    pub index: usize,
    pub statement: String,
    pub error: Error,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "skipped statement {} ({}): {}",
            self.index, self.statement, self.error
        )
    }
}

/// Inverse template of one record.
#[derive(Debug)]
pub struct Reverted {
    pub source_revert_id: String,
    pub template: Template,
    pub diagnostics: Vec<Diagnostic>,
}

impl Reverted {
    /// Template text; parses back to the same template.
    pub fn render(&self) -> String {
        self.template.to_string()
    }
}

/// Fixed inverse of an action, if it has one.
pub fn inverse_action(action: Action) -> Option<Action> {
    match action {
        Action::Create => Some(Action::Delete),
        Action::Delete => None,
        Action::Start => Some(Action::Stop),
        Action::Stop => Some(Action::Start),
        Action::Attach => Some(Action::Detach),
        Action::Detach => Some(Action::Attach),
        Action::Update | Action::Check | Action::None => None,
    }
}

/// Build the reverted template for `record`.
///
/// Entries with no inverse are skipped with a diagnostic; a corrupt record fails the
/// whole revert.
pub fn revert(record: &ExecutionRecord, log: &RunLog) -> Result<Reverted, Error> {
    let executed = validate_captured(record)?;

    let mut statements = Vec::new();
    let mut diagnostics = Vec::new();
    for (entry, expr) in executed.into_iter().rev() {
        match invert_entry(entry, expr) {
            Ok(statement) => statements.push(statement),
            Err(error) => {
                log.emit(RunEvent::RevertSkipped {
                    source_revert_id: record.revert_id.clone(),
                    index: entry.index,
                    reason: error.to_string(),
                });
                diagnostics.push(Diagnostic {
                    index: entry.index,
                    statement: entry.statement.to_string(),
                    error,
                });
            }
        }
    }

    tracing::debug!(
        revert_id = %record.revert_id,
        statements = statements.len(),
        skipped = diagnostics.len(),
        "revert generated"
    );
    Ok(Reverted {
        source_revert_id: record.revert_id.clone(),
        template: Template::new(statements),
        diagnostics,
    })
}

/// Pair each successful entry with its expression. Entries that will be inverted must
/// capture only literals that re-parse to themselves.
fn validate_captured(record: &ExecutionRecord) -> Result<Vec<(&ExecutionEntry, &Expression)>, Error> {
    let corrupt = |reason: String| Error::CorruptRecord {
        revert_id: record.revert_id.clone(),
        reason,
    };
    let mut executed = Vec::new();
    for entry in record.succeeded() {
        let Some(expr) = entry.statement.expression() else {
            return Err(corrupt(format!(
                "entry {} is not an executable statement",
                entry.index
            )));
        };
        executed.push((entry, expr));
        // Skipped with a diagnostic; its captures are never replayed
        if inverse_action(expr.action).is_none() {
            continue;
        }
        for (key, value) in &entry.resolved {
            if !value.is_literal() {
                return Err(corrupt(format!(
                    "entry {}: parameter '{}' holds unresolved {} {}",
                    entry.index,
                    key,
                    value.kind_name(),
                    value
                )));
            }
            if !is_replayable(value) {
                return Err(corrupt(format!(
                    "entry {}: parameter '{}' value '{}' does not re-parse as {}",
                    entry.index,
                    key,
                    value,
                    value.kind_name()
                )));
            }
        }
        if let Some(result) = &entry.result {
            match parse_value(result) {
                Ok(v) if v.is_literal() => {}
                _ => {
                    return Err(corrupt(format!(
                        "entry {}: result '{}' is not a literal value",
                        entry.index, result
                    )))
                }
            }
        }
    }
    Ok(executed)
}

fn invert_entry(entry: &ExecutionEntry, expr: &Expression) -> Result<Statement, Error> {
    let (action, entity) = (expr.action, expr.entity);
    let inverse = inverse_action(action).ok_or(Error::NoInverseAction { action, entity })?;
    let params = inverse_params(action, entity, &entry.resolved, entry.result.as_deref())?;
    Ok(Statement::Expression {
        expr: Expression {
            action: inverse,
            entity,
            params,
        },
    })
}

/// Entities whose identifying result is an ARN.
fn identified_by_arn(entity: Entity) -> bool {
    matches!(
        entity,
        Entity::LoadBalancer | Entity::Listener | Entity::Topic | Entity::Subscription
    )
}

fn inverse_params(
    action: Action,
    entity: Entity,
    captured: &Params,
    result: Option<&str>,
) -> Result<Params, Error> {
    let from_result = |key: &str| -> Result<Params, Error> {
        let result = result.ok_or_else(|| Error::MissingRevertData {
            action,
            entity,
            reason: "no result was captured".to_string(),
        })?;
        let mut params = Params::new();
        params.insert(key.to_string(), classify(result));
        Ok(params)
    };
    let copy_keys = |keys: &[&str]| -> Result<Params, Error> {
        let mut params = Params::new();
        for key in keys {
            let value = captured.get(*key).ok_or_else(|| Error::MissingRevertData {
                action,
                entity,
                reason: format!("parameter '{}' was not captured", key),
            })?;
            params.insert(key.to_string(), value.clone());
        }
        Ok(params)
    };

    match (action, entity) {
        (Action::Create, Entity::User | Entity::Group | Entity::Bucket) => copy_keys(&["name"]),
        (Action::Create, Entity::Route) => copy_keys(&["table", "cidr"]),
        (Action::Create, Entity::Tag | Entity::StorageObject) => Ok(captured.clone()),
        (Action::Create, Entity::Queue) => from_result("url"),
        (Action::Create, e) if identified_by_arn(e) => from_result("arn"),
        (Action::Create, _) => from_result("id"),
        (Action::Attach, Entity::RouteTable) => from_result("association"),
        (Action::Detach, Entity::RouteTable) => Err(Error::NoInverseAction { action, entity }),
        _ => Ok(captured.clone()),
    }
}

/// A captured value is replayable when it is a literal whose rendering parses back to it.
pub fn is_replayable(value: &Value) -> bool {
    value.is_literal()
        && parse_value(&value.to_string())
            .map(|v| &v == value)
            .unwrap_or(false)
}
