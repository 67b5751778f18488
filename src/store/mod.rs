// ABOUTME: Source/target store interfaces consumed by the extract/inject pipeline
// ABOUTME: Plus the record helpers shared by every adapter

pub mod memory;
pub mod postgres;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::registry::ModelMeta;

pub use memory::{MemorySource, MemoryTarget};
pub use postgres::{connect_with_retry, PostgresSource, PostgresTarget};

/// One row/document, opaque to the pipeline.
///
/// Convention shared by all adapters: timestamp-valued fields (notably the
/// incremental field) are carried as RFC 3339 strings so records survive the
/// generic JSON round trip through snapshot files.
pub type Record = serde_json::Map<String, Value>;

/// Extraction window over the incremental field: `(after, until]`.
///
/// Both bounds absent means no time filter (non-incremental models, or the
/// very first extraction's missing lower bound).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    /// Exclusive lower bound, from the most recent snapshot file's name
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound, the extraction `now`
    pub until: Option<DateTime<Utc>>,
}

impl Window {
    pub fn incremental(after: Option<DateTime<Utc>>, until: DateTime<Utc>) -> Self {
        Self {
            after,
            until: Some(until),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.after.is_none() && self.until.is_none()
    }

    /// Whether a record's incremental value falls inside the window.
    pub fn contains(&self, value: Option<DateTime<Utc>>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(value) = value else {
            return false;
        };
        if let Some(after) = self.after {
            if value <= after {
                return false;
            }
        }
        if let Some(until) = self.until {
            if value > until {
                return false;
            }
        }
        true
    }
}

/// Read side of a replicated store.
pub trait SourceStore {
    /// Number of records matching the window.
    fn count(
        &self,
        meta: &ModelMeta,
        window: Window,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// One fixed-size page of matching records.
    ///
    /// When `order_by` is set, pages are ordered ascending by that field so
    /// consecutive pages tile the window without gaps or overlap.
    fn find_page(
        &self,
        meta: &ModelMeta,
        window: Window,
        order_by: Option<&str>,
        skip: u64,
        take: u64,
    ) -> impl std::future::Future<Output = Result<Vec<Record>>> + Send;
}

/// Write side of a replicated store.
pub trait TargetStore {
    fn count_all(
        &self,
        meta: &ModelMeta,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Apply one batch as a single atomic unit.
    ///
    /// When `delete_below` is set, first delete every stored record whose
    /// unique-key values match a record in the batch and whose incremental
    /// value is at or below the bound (models without an incremental field
    /// match on keys alone). Then insert the batch, treating unique-key
    /// collisions as no-ops. The whole unit either commits or rolls back.
    fn apply_batch(
        &self,
        meta: &ModelMeta,
        records: &[Record],
        delete_below: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// The unique-key field values identifying a record, in declared order.
/// Missing fields surface as JSON null.
pub fn unique_key_of(meta: &ModelMeta, record: &Record) -> Vec<Value> {
    meta.unique_key_fields
        .iter()
        .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Parse a record's incremental field value, if the model has one and the
/// record carries a well-formed timestamp.
pub fn incremental_value(meta: &ModelMeta, record: &Record) -> Option<DateTime<Utc>> {
    let field = meta.incremental_field.as_deref()?;
    let raw = record.get(field)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Rewrite the ambiguous "absent" representation of nullable-JSON fields.
///
/// Generic serialization collapses "stored JSON null" and "column not
/// provided" into the same shape; before insertion the pipeline pins every
/// nullable-JSON field that arrived absent (missing key or JSON null) to an
/// explicit null, so the target stores it distinguishably from a field that
/// was never part of the model's nullable set.
pub fn normalize_nullable_json(meta: &ModelMeta, record: &mut Record) {
    for field in &meta.nullable_json_fields {
        let absent = matches!(record.get(field), None | Some(Value::Null));
        if absent {
            record.insert(field.clone(), Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn meta() -> ModelMeta {
        ModelMeta {
            name: "orders".to_string(),
            unique_key_fields: vec!["id".to_string(), "region".to_string()],
            incremental_field: Some("updatedAt".to_string()),
            nullable_json_fields: vec!["metadata".to_string()],
        }
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_contains() {
        let window = Window::incremental(Some(ts(9)), ts(12));
        assert!(!window.contains(Some(ts(9))), "lower bound is exclusive");
        assert!(window.contains(Some(ts(10))));
        assert!(window.contains(Some(ts(12))), "upper bound is inclusive");
        assert!(!window.contains(Some(ts(13))));
        assert!(!window.contains(None));
        assert!(Window::default().contains(None));
    }

    #[test]
    fn test_unique_key_of_preserves_order_and_missing_fields() {
        let key = unique_key_of(&meta(), &record(json!({"region": "eu", "id": 7})));
        assert_eq!(key, vec![json!(7), json!("eu")]);

        let partial = unique_key_of(&meta(), &record(json!({"id": 7})));
        assert_eq!(partial, vec![json!(7), Value::Null]);
    }

    #[test]
    fn test_incremental_value_parsing() {
        let value = incremental_value(
            &meta(),
            &record(json!({"updatedAt": "2024-03-01T10:00:00.000Z"})),
        );
        assert_eq!(value, Some(ts(10)));

        assert_eq!(
            incremental_value(&meta(), &record(json!({"updatedAt": "garbage"}))),
            None
        );
        assert_eq!(incremental_value(&meta(), &record(json!({}))), None);
    }

    #[test]
    fn test_normalize_nullable_json() {
        let meta = meta();

        let mut missing = record(json!({"id": 1}));
        normalize_nullable_json(&meta, &mut missing);
        assert_eq!(missing.get("metadata"), Some(&Value::Null));

        let mut null_valued = record(json!({"id": 1, "metadata": null}));
        normalize_nullable_json(&meta, &mut null_valued);
        assert_eq!(null_valued.get("metadata"), Some(&Value::Null));

        let mut populated = record(json!({"id": 1, "metadata": {"a": 1}}));
        normalize_nullable_json(&meta, &mut populated);
        assert_eq!(populated.get("metadata"), Some(&json!({"a": 1})));

        // Fields outside the nullable set stay absent
        assert!(!missing.contains_key("other"));
    }
}
