//! BLAKE3 digests for persisted execution records.

use crate::core::error::Error;
use crate::core::types::ExecutionRecord;

/// Compute a composite hash from multiple components. Returns `"blake3:{hex}"`.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Digest over a record's identity, template and entries. The `digest` field itself
/// is excluded.
pub fn record_digest(record: &ExecutionRecord) -> Result<String, Error> {
    let entries = serde_json::to_string(&record.entries)
        .map_err(|e| Error::Store(format!("cannot serialize entries: {}", e)))?;
    Ok(composite_hash(&[
        &record.revert_id,
        &record.started_at,
        &record.template,
        &entries,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, Entity, ExecutionEntry, Expression, Outcome, Params, Statement};

    fn record() -> ExecutionRecord {
        ExecutionRecord {
            revert_id: "01BA7RV6ES86PZYCM3H28WM6KZ".to_string(),
            started_at: "2026-10-19T10:00:00Z".to_string(),
            completed_at: None,
            template: "create internetgateway".to_string(),
            entries: vec![ExecutionEntry {
                index: 1,
                statement: Statement::Expression {
                    expr: Expression::new(Action::Create, Entity::InternetGateway),
                },
                resolved: Params::new(),
                result: Some("igw-00000001".to_string()),
                outcome: Outcome::Succeeded,
            }],
            digest: String::new(),
        }
    }

    #[test]
    fn test_hasher_record_digest_format() {
        let d = record_digest(&record()).unwrap();
        assert_eq!(d, record_digest(&record()).unwrap());
        assert!(d.starts_with("blake3:"));
        assert_eq!(d.len(), 7 + 64);
    }

    #[test]
    fn test_hasher_composite_order_matters() {
        let h = composite_hash(&["a", "b"]);
        assert_ne!(h, composite_hash(&["b", "a"]));
        assert_ne!(composite_hash(&["ab", ""]), composite_hash(&["a", "b"]));
    }

    #[test]
    fn test_hasher_record_digest_ignores_digest_field() {
        let mut r = record();
        let d1 = record_digest(&r).unwrap();
        r.digest = d1.clone();
        assert_eq!(record_digest(&r).unwrap(), d1);
    }

    #[test]
    fn test_hasher_record_digest_detects_tampering() {
        let mut r = record();
        let d1 = record_digest(&r).unwrap();
        r.entries[0].result = Some("igw-deadbeef".to_string());
        assert_ne!(record_digest(&r).unwrap(), d1);
    }
}
