//! Execution history: persisted records keyed by revert ID.
//!
//! Records are YAML files under `<state_dir>/history/`, written atomically (temp file,
//! then rename) and sealed with a BLAKE3 digest that is checked on every load.

use super::error::Error;
use super::types::ExecutionRecord;
use crate::journal::hasher::record_digest;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Store of execution records.
pub trait HistoryStore {
    /// Seal the record with its digest and persist it.
    fn save(&self, record: &mut ExecutionRecord) -> Result<(), Error>;

    /// Load a record by revert ID, verifying its digest.
    fn get_template_execution(&self, revert_id: &str) -> Result<ExecutionRecord, Error>;

    /// All stored revert IDs, oldest first.
    fn list(&self) -> Result<Vec<String>, Error>;
}

/// Derive the history directory within the state directory.
pub fn history_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("history")
}

/// Derive the record file path for a revert ID.
pub fn record_path(state_dir: &Path, revert_id: &str) -> PathBuf {
    history_dir(state_dir).join(format!("{}.yaml", revert_id))
}

fn check_revert_id(revert_id: &str) -> Result<(), Error> {
    revert_id
        .parse::<ulid::Ulid>()
        .map(|_| ())
        .map_err(|_| Error::RecordNotFound(revert_id.to_string()))
}

fn seal(record: &mut ExecutionRecord) -> Result<(), Error> {
    record.digest = record_digest(record)?;
    Ok(())
}

fn verify(record: &ExecutionRecord, revert_id: &str) -> Result<(), Error> {
    if record.revert_id != revert_id {
        return Err(Error::CorruptRecord {
            revert_id: revert_id.to_string(),
            reason: format!("record claims revert id {}", record.revert_id),
        });
    }
    let expected = record_digest(record)?;
    if record.digest != expected {
        return Err(Error::CorruptRecord {
            revert_id: revert_id.to_string(),
            reason: "digest mismatch".to_string(),
        });
    }
    Ok(())
}

/// File-backed store under a state directory.
#[derive(Debug, Clone)]
pub struct FileHistory {
    state_dir: PathBuf,
}

impl FileHistory {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

impl HistoryStore for FileHistory {
    fn save(&self, record: &mut ExecutionRecord) -> Result<(), Error> {
        check_revert_id(&record.revert_id)?;
        seal(record)?;

        let path = record_path(&self.state_dir, &record.revert_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Store(format!("cannot create dir {}: {}", parent.display(), e)))?;
        }

        let yaml = serde_yaml_ng::to_string(record)
            .map_err(|e| Error::Store(format!("serialize error: {}", e)))?;

        // Atomic write: temp file + rename
        let tmp_path = path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, &yaml)
            .map_err(|e| Error::Store(format!("cannot write {}: {}", tmp_path.display(), e)))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            Error::Store(format!(
                "cannot rename {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!(revert_id = %record.revert_id, path = %path.display(), "execution recorded");
        Ok(())
    }

    fn get_template_execution(&self, revert_id: &str) -> Result<ExecutionRecord, Error> {
        check_revert_id(revert_id)?;
        let path = record_path(&self.state_dir, revert_id);
        if !path.exists() {
            return Err(Error::RecordNotFound(revert_id.to_string()));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Store(format!("cannot read {}: {}", path.display(), e)))?;
        let record: ExecutionRecord =
            serde_yaml_ng::from_str(&content).map_err(|e| Error::CorruptRecord {
                revert_id: revert_id.to_string(),
                reason: format!("invalid record file {}: {}", path.display(), e),
            })?;
        verify(&record, revert_id)?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<String>, Error> {
        let dir = history_dir(&self.state_dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let read_dir = std::fs::read_dir(&dir)
            .map_err(|e| Error::Store(format!("cannot read dir {}: {}", dir.display(), e)))?;
        let mut ids: Vec<String> = read_dir
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".yaml").map(str::to_string)
            })
            .filter(|id| id.parse::<ulid::Ulid>().is_ok())
            .collect();
        // ULIDs sort lexicographically by creation time
        ids.sort();
        Ok(ids)
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: RefCell<BTreeMap<String, ExecutionRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistory {
    fn save(&self, record: &mut ExecutionRecord) -> Result<(), Error> {
        check_revert_id(&record.revert_id)?;
        seal(record)?;
        self.records
            .borrow_mut()
            .insert(record.revert_id.clone(), record.clone());
        Ok(())
    }

    fn get_template_execution(&self, revert_id: &str) -> Result<ExecutionRecord, Error> {
        let record = self
            .records
            .borrow()
            .get(revert_id)
            .cloned()
            .ok_or_else(|| Error::RecordNotFound(revert_id.to_string()))?;
        verify(&record, revert_id)?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<String>, Error> {
        Ok(self.records.borrow().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, Entity, ExecutionEntry, Expression, Outcome, Params, Statement, Value};

    const ID: &str = "01BA7RV6ES86PZYCM3H28WM6KZ";

    fn make_record(revert_id: &str) -> ExecutionRecord {
        let mut resolved = Params::new();
        resolved.insert("cidr".to_string(), Value::Cidr("10.0.0.0/24".to_string()));
        ExecutionRecord {
            revert_id: revert_id.to_string(),
            started_at: "2026-10-19T10:00:00Z".to_string(),
            completed_at: Some("2026-10-19T10:00:01Z".to_string()),
            template: "vpcid = create vpc cidr=10.0.0.0/24".to_string(),
            entries: vec![ExecutionEntry {
                index: 1,
                statement: Statement::Declaration {
                    ident: "vpcid".to_string(),
                    expr: Expression::new(Action::Create, Entity::Vpc)
                        .with_param("cidr", Value::Cidr("10.0.0.0/24".to_string())),
                },
                resolved,
                result: Some("vpc-123".to_string()),
                outcome: Outcome::Succeeded,
            }],
            digest: String::new(),
        }
    }

    #[test]
    fn test_history_record_path() {
        let p = record_path(Path::new("/state"), ID);
        assert_eq!(p, PathBuf::from(format!("/state/history/{}.yaml", ID)));
    }

    #[test]
    fn test_history_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path());
        let mut record = make_record(ID);
        store.save(&mut record).unwrap();
        assert!(record.digest.starts_with("blake3:"));

        let loaded = store.get_template_execution(ID).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_history_no_temp_file_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path());
        store.save(&mut make_record(ID)).unwrap();
        let tmp = record_path(dir.path(), ID).with_extension("yaml.tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn test_history_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path());
        let err = store.get_template_execution(ID).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }

    #[test]
    fn test_history_rejects_non_ulid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path());
        let err = store.get_template_execution("../../etc/passwd").unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }

    #[test]
    fn test_history_tampered_record_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path());
        store.save(&mut make_record(ID)).unwrap();

        let path = record_path(dir.path(), ID);
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("vpc-123", "vpc-999")).unwrap();

        let err = store.get_template_execution(ID).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { ref reason, .. } if reason == "digest mismatch"));
    }

    #[test]
    fn test_history_invalid_yaml_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = record_path(dir.path(), ID);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{{{{not yaml").unwrap();
        let store = FileHistory::new(dir.path());
        let err = store.get_template_execution(ID).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { .. }));
    }

    #[test]
    fn test_history_list_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path());
        assert!(store.list().unwrap().is_empty());
        let later = "01BA7RV6ES86PZYCM3H28WM6KZ";
        let earlier = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
        store.save(&mut make_record(later)).unwrap();
        store.save(&mut make_record(earlier)).unwrap();
        std::fs::write(history_dir(dir.path()).join("notes.txt"), "x").unwrap();
        assert_eq!(store.list().unwrap(), vec![earlier.to_string(), later.to_string()]);
    }

    #[test]
    fn test_history_memory_store() {
        let store = MemoryHistory::new();
        let mut record = make_record(ID);
        store.save(&mut record).unwrap();
        assert_eq!(store.get_template_execution(ID).unwrap(), record);
        assert_eq!(store.list().unwrap(), vec![ID.to_string()]);
        assert!(store.get_template_execution("01ARZ3NDEKTSV4RRFFQ69G5FAV").is_err());
    }
}
