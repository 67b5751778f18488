// ABOUTME: In-memory source/target adapters backing the hermetic test suite
// ABOUTME: Honor the same windowing and transactional contract as the real adapters

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::{incremental_value, unique_key_of, Record, SourceStore, TargetStore, Window};
use crate::registry::ModelMeta;

fn key_fingerprint(meta: &ModelMeta, record: &Record) -> Result<String> {
    let key = unique_key_of(meta, record);
    Ok(serde_json::to_string(&key)?)
}

fn field_timestamp(record: &Record, field: &str) -> Option<DateTime<Utc>> {
    let raw = record.get(field)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Source store backed by per-model record lists.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Arc<Mutex<HashMap<String, Vec<Record>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, model: &str, record: Record) {
        let mut records = self.records.lock().expect("source lock poisoned");
        records.entry(model.to_string()).or_default().push(record);
    }

    /// Replace the record with a matching unique key, or append it.
    pub fn upsert(&self, meta: &ModelMeta, record: Record) {
        let key = unique_key_of(meta, &record);
        let mut records = self.records.lock().expect("source lock poisoned");
        let table = records.entry(meta.name.clone()).or_default();
        match table.iter_mut().find(|r| unique_key_of(meta, r) == key) {
            Some(existing) => *existing = record,
            None => table.push(record),
        }
    }

    fn matching(&self, meta: &ModelMeta, window: Window) -> Vec<Record> {
        let records = self.records.lock().expect("source lock poisoned");
        records
            .get(&meta.name)
            .map(|table| {
                table
                    .iter()
                    .filter(|r| window.contains(incremental_value(meta, r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl SourceStore for MemorySource {
    async fn count(&self, meta: &ModelMeta, window: Window) -> Result<u64> {
        Ok(self.matching(meta, window).len() as u64)
    }

    async fn find_page(
        &self,
        meta: &ModelMeta,
        window: Window,
        order_by: Option<&str>,
        skip: u64,
        take: u64,
    ) -> Result<Vec<Record>> {
        let mut matching = self.matching(meta, window);
        if let Some(field) = order_by {
            matching.sort_by_key(|r| field_timestamp(r, field));
        }
        Ok(matching
            .into_iter()
            .skip(skip as usize)
            .take(take as usize)
            .collect())
    }
}

#[derive(Debug, Default)]
struct TargetState {
    tables: HashMap<String, BTreeMap<String, Record>>,
    deletes_performed: u64,
    fail_remaining: u32,
}

/// Target store keyed by unique-key fingerprint.
///
/// Batches apply under one lock, so concurrent batch application observes the
/// same all-or-nothing behavior a database transaction gives the real adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch applications fail before touching state.
    pub fn fail_next_batches(&self, n: u32) {
        self.state.lock().expect("target lock poisoned").fail_remaining = n;
    }

    /// How many stale records the delete step has removed so far.
    pub fn deletes_performed(&self) -> u64 {
        self.state
            .lock()
            .expect("target lock poisoned")
            .deletes_performed
    }

    pub fn records(&self, model: &str) -> Vec<Record> {
        let state = self.state.lock().expect("target lock poisoned");
        state
            .tables
            .get(model)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up one stored record by its unique-key values.
    pub fn get(&self, meta: &ModelMeta, key: &[Value]) -> Option<Record> {
        let fingerprint = serde_json::to_string(&key).ok()?;
        let state = self.state.lock().expect("target lock poisoned");
        state.tables.get(&meta.name)?.get(&fingerprint).cloned()
    }
}

impl TargetStore for MemoryTarget {
    async fn count_all(&self, meta: &ModelMeta) -> Result<u64> {
        let state = self.state.lock().expect("target lock poisoned");
        Ok(state.tables.get(&meta.name).map_or(0, |t| t.len() as u64))
    }

    async fn apply_batch(
        &self,
        meta: &ModelMeta,
        records: &[Record],
        delete_below: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("target lock poisoned");
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            bail!("Injected batch failure");
        }

        // Fingerprints are computed before any mutation so a serialization
        // error cannot leave the batch half-applied.
        let mut keyed = Vec::with_capacity(records.len());
        for record in records {
            keyed.push((key_fingerprint(meta, record)?, record));
        }

        let mut deletes = 0u64;
        let table = state.tables.entry(meta.name.clone()).or_default();
        if let Some(bound) = delete_below {
            for (fingerprint, _) in &keyed {
                let stale = match table.get(fingerprint) {
                    None => false,
                    Some(existing) => match meta.incremental_field {
                        None => true,
                        Some(_) => incremental_value(meta, existing)
                            .is_some_and(|value| value <= bound),
                    },
                };
                if stale {
                    table.remove(fingerprint);
                    deletes += 1;
                }
            }
        }
        for (fingerprint, record) in keyed {
            table.entry(fingerprint).or_insert_with(|| record.clone());
        }
        state.deletes_performed += deletes;
        Ok(())
    }
}
