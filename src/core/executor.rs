//! Executor: fail-fast sequential run of a template against the driver registry.
//!
//! For each statement: resolve → check → dispatch → record → bind. The first failure
//! stops the run; the partial record is still persisted (unless dry run).

use super::error::Error;
use super::history::HistoryStore;
use super::registry::Registry;
use super::resolver::Environment;
use super::revert::Reverted;
use super::types::*;
use crate::journal::eventlog::{self, RunLog};
use std::time::Instant;

/// Configuration for a run.
pub struct RunConfig<'a> {
    pub registry: &'a Registry,
    /// Where the record is persisted; `None` keeps it in memory only.
    pub store: Option<&'a dyn HistoryStore>,
    pub dry_run: bool,
}

/// Outcome of a run: the record, and the error that stopped it (if any).
#[derive(Debug)]
pub struct RunReport {
    pub record: ExecutionRecord,
    pub failure: Option<Error>,
    pub persisted: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Surface the stopping error, if any.
    pub fn into_result(self) -> Result<ExecutionRecord, Error> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.record),
        }
    }
}

/// Run every statement in order, stopping at the first failure.
///
/// With a store, the record is saved after every succeeded statement and once more when
/// the run ends, so an interrupted run still leaves a record of what completed. Store
/// errors are returned as `Err`; statement failures are reported in
/// [`RunReport::failure`] so the partial record is still available.
pub fn run(template: &Template, env: &mut Environment, cfg: &RunConfig) -> Result<RunReport, Error> {
    // Dry runs are never persisted
    let store = cfg.store.filter(|_| !cfg.dry_run);
    execute(template, env, cfg.registry, store, cfg.dry_run)
}

/// Run a reverted template. Captured values are already literal, so a resolution
/// failure here means the source record is corrupt.
pub fn run_reverted(reverted: &Reverted, log: RunLog, cfg: &RunConfig) -> Result<RunReport, Error> {
    let mut env = Environment::new().with_log(log);
    let mut report = run(&reverted.template, &mut env, cfg)?;
    if let Some(failure) = report.failure.take() {
        report.failure = Some(if failure.root().is_resolution() {
            Error::CorruptRecord {
                revert_id: reverted.source_revert_id.clone(),
                reason: failure.root().to_string(),
            }
        } else {
            failure
        });
    }
    Ok(report)
}

fn execute(
    template: &Template,
    env: &mut Environment,
    registry: &Registry,
    store: Option<&dyn HistoryStore>,
    dry_run: bool,
) -> Result<RunReport, Error> {
    let start = Instant::now();
    let revert_id = eventlog::generate_revert_id();
    let started_at = eventlog::now_rfc3339();

    env.log().emit(RunEvent::RunStarted {
        revert_id: revert_id.clone(),
        dry_run,
        statements: template.expressions().count(),
    });

    let mut record = ExecutionRecord {
        revert_id: revert_id.clone(),
        started_at,
        completed_at: None,
        template: template.to_string(),
        entries: Vec::new(),
        digest: String::new(),
    };
    let mut failure = None;

    for (i, statement) in template.statements.iter().enumerate() {
        let index = i + 1;
        // Comments are skipped and not recorded
        let Some(expr) = statement.expression() else {
            continue;
        };

        env.log().emit(RunEvent::StatementStarted {
            revert_id: revert_id.clone(),
            index,
            statement: statement.to_string(),
        });
        let step = Instant::now();

        match run_statement(statement, expr, env, registry, dry_run) {
            Ok((resolved, result)) => {
                env.log().emit(RunEvent::StatementSucceeded {
                    revert_id: revert_id.clone(),
                    index,
                    result: result.clone(),
                    duration_seconds: step.elapsed().as_secs_f64(),
                });
                if let Some(ident) = statement.declared_identifier() {
                    env.bind(ident, result.as_deref());
                }
                record.entries.push(ExecutionEntry {
                    index,
                    statement: statement.clone(),
                    resolved,
                    result,
                    outcome: Outcome::Succeeded,
                });
                checkpoint(store, &mut record)?;
            }
            Err((resolved, error)) => {
                env.log().emit(RunEvent::StatementFailed {
                    revert_id: revert_id.clone(),
                    index,
                    error: error.to_string(),
                });
                record.entries.push(ExecutionEntry {
                    index,
                    statement: statement.clone(),
                    resolved,
                    result: None,
                    outcome: Outcome::Failed {
                        error: error.to_string(),
                    },
                });
                failure = Some(Error::StatementFailed {
                    index,
                    statement: statement.to_string(),
                    source: Box::new(error),
                });
                break;
            }
        }
    }

    let failed = u32::from(failure.is_some());
    let succeeded = u32::try_from(record.entries.len()).unwrap_or(u32::MAX) - failed;
    env.log().emit(RunEvent::RunCompleted {
        revert_id: revert_id.clone(),
        succeeded,
        failed,
        total_seconds: start.elapsed().as_secs_f64(),
    });

    record.completed_at = Some(eventlog::now_rfc3339());
    checkpoint(store, &mut record)?;
    Ok(RunReport {
        record,
        failure,
        persisted: store.is_some(),
    })
}

/// Save the record as it stands, if there is a store.
fn checkpoint(store: Option<&dyn HistoryStore>, record: &mut ExecutionRecord) -> Result<(), Error> {
    match store {
        Some(store) => store.save(record),
        None => Ok(()),
    }
}

/// One statement. On failure, returns whatever parameters were resolved (empty when
/// resolution itself failed) alongside the error.
fn run_statement(
    statement: &Statement,
    expr: &Expression,
    env: &mut Environment,
    registry: &Registry,
    dry_run: bool,
) -> Result<(Params, Option<String>), (Params, Error)> {
    if let Some(ident) = statement.declared_identifier() {
        env.ensure_declarable(ident).map_err(|e| (Params::new(), e))?;
    }
    let resolved = env
        .resolve_params(&expr.params)
        .map_err(|e| (Params::new(), e))?;
    match registry.dispatch(expr.action, expr.entity, &resolved, dry_run) {
        Ok(result) => Ok((resolved, result)),
        Err(e) => Err((resolved, e)),
    }
}
