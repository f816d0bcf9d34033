//! Append-only JSONL run-event log.
//!
//! [`RunLog`] is the logging capability handed to the resolution environment and the
//! executor: every event is emitted through `tracing` and, when a path is configured,
//! appended as one timestamped JSON line.

use crate::core::error::Error;
use crate::core::types::{RunEvent, TimestampedEvent};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// RFC 3339 UTC timestamp with second precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Fresh revert ID (ULID, time-sortable).
pub fn generate_revert_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Derive the event log path within the state directory.
pub fn event_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("events.jsonl")
}

/// Append an event to the log at `path`.
pub fn append_event(path: &Path, event: RunEvent) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Store(format!("cannot create state dir: {}", e)))?;
    }

    let te = TimestampedEvent {
        ts: now_rfc3339(),
        event,
    };
    let json = serde_json::to_string(&te)
        .map_err(|e| Error::Store(format!("JSON serialize error: {}", e)))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Store(format!("cannot open event log {}: {}", path.display(), e)))?;

    writeln!(file, "{}", json).map_err(|e| Error::Store(format!("write error: {}", e)))?;

    Ok(())
}

/// Read every event in the log. A missing log reads as empty.
pub fn read_events(path: &Path) -> Result<Vec<TimestampedEvent>, Error> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Store(format!("cannot open event log {}: {}", path.display(), e)))?;
    let mut events = Vec::new();
    for (n, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::Store(format!("read error: {}", e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: TimestampedEvent = serde_json::from_str(&line).map_err(|e| {
            Error::Store(format!("{}:{}: invalid event: {}", path.display(), n + 1, e))
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Logging capability threaded through a run.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    path: Option<PathBuf>,
}

impl RunLog {
    /// Tracing only, no event file.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record an event. A failed append is logged, not propagated.
    pub fn emit(&self, event: RunEvent) {
        trace_event(&event);
        if let Some(path) = &self.path {
            if let Err(e) = append_event(path, event) {
                tracing::warn!(error = %e, "event log append failed");
            }
        }
    }

    /// Free-form diagnostic that is not a run event.
    pub fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

fn trace_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted {
            revert_id,
            dry_run,
            statements,
        } => tracing::info!(%revert_id, dry_run, statements, "run started"),
        RunEvent::StatementStarted {
            revert_id,
            index,
            statement,
        } => tracing::debug!(%revert_id, index, %statement, "statement started"),
        RunEvent::StatementSucceeded {
            revert_id,
            index,
            result,
            duration_seconds,
        } => tracing::info!(%revert_id, index, ?result, duration_seconds, "statement succeeded"),
        RunEvent::StatementFailed {
            revert_id,
            index,
            error,
        } => tracing::warn!(%revert_id, index, %error, "statement failed"),
        RunEvent::RunCompleted {
            revert_id,
            succeeded,
            failed,
            total_seconds,
        } => tracing::info!(%revert_id, succeeded, failed, total_seconds, "run completed"),
        RunEvent::RevertSkipped {
            source_revert_id,
            index,
            reason,
        } => tracing::warn!(%source_revert_id, index, %reason, "revert skipped statement"),
    }
}
