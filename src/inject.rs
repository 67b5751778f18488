// ABOUTME: Injector - resumable, transactional application of snapshots to the target
// ABOUTME: Streams each file in bounded batches and advances the watermark once per file

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::registry::{ModelMeta, ModelRegistry};
use crate::selection::Selection;
use crate::snapshot::SnapshotStore;
use crate::store::{normalize_nullable_json, Record, TargetStore};

/// Tunables for an injection run.
#[derive(Debug, Clone)]
pub struct InjectConfig {
    /// Records per target-store transaction
    pub batch_size: usize,
    /// Batches kept in flight concurrently per file
    pub parallel_batches: usize,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            parallel_batches: 100,
        }
    }
}

/// Outcome of one injection run across the selected models.
#[derive(Debug, Clone, Default)]
pub struct InjectStats {
    pub models_injected: usize,
    pub files_injected: usize,
    pub records_injected: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl InjectStats {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Applies pending snapshot files to the target store, chronologically.
///
/// Safe to abort and re-run at any point: the watermark only advances after a
/// file's every batch has committed, and re-applying a file is a no-op thanks
/// to conflict-ignoring inserts and incremental-bounded deletes.
pub struct Injector<'a, T: TargetStore> {
    target: &'a T,
    registry: &'a ModelRegistry,
    snapshots: &'a SnapshotStore,
    config: InjectConfig,
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("[{bar:40}] {percent:>3}% | ETA: {eta} | {pos}/{len} | {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl<'a, T: TargetStore> Injector<'a, T> {
    pub fn new(
        target: &'a T,
        registry: &'a ModelRegistry,
        snapshots: &'a SnapshotStore,
        config: InjectConfig,
    ) -> Self {
        Self {
            target,
            registry,
            snapshots,
            config,
        }
    }

    /// Inject pending snapshots for every selected model.
    ///
    /// Models run in selection order (order hint first), so callers can place
    /// foreign-key parents ahead of their dependents. A model-level failure is
    /// collected into the stats; the remaining models still run.
    pub async fn run(&self, selection: &Selection) -> Result<InjectStats> {
        let start = std::time::Instant::now();
        let mut stats = InjectStats::default();
        let progress = MultiProgress::new();

        let discovered = self.snapshots.discovered_models()?;
        for name in selection.apply(discovered) {
            let Some(meta) = self.registry.get(&name) else {
                tracing::debug!("Snapshot directory '{}' has no model metadata, skipping", name);
                continue;
            };
            match self.inject_model(meta, &progress).await {
                Ok((files, records)) => {
                    if files > 0 {
                        stats.models_injected += 1;
                    }
                    stats.files_injected += files;
                    stats.records_injected += records;
                }
                Err(e) => {
                    tracing::error!("Injection failed for '{}': {:?}", name, e);
                    stats
                        .errors
                        .push(format!("Injection failed for '{}': {}", name, e));
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Apply every snapshot newer than the model's watermark, oldest first.
    ///
    /// An earlier snapshot applied after a later one would resurrect stale
    /// data, so the first failure aborts the model for this run; the watermark
    /// stays put and the next run retries the same file.
    async fn inject_model(
        &self,
        meta: &ModelMeta,
        progress: &MultiProgress,
    ) -> Result<(usize, u64)> {
        let watermark = self.snapshots.read_watermark(&meta.name)?;
        // Absent watermark = first injection: nothing to reconcile against,
        // so the delete step stays off for every file of this run.
        let first_injection = watermark.is_none();
        let pending = self.snapshots.snapshots_after(&meta.name, watermark)?;
        if pending.is_empty() {
            tracing::debug!("No pending snapshots for '{}'", meta.name);
            return Ok((0, 0));
        }

        let mut files = 0usize;
        let mut records = 0u64;
        for timestamp in pending {
            records += self
                .inject_file(meta, timestamp, first_injection, progress)
                .await?;
            self.snapshots.write_watermark(&meta.name, timestamp)?;
            files += 1;
        }
        tracing::info!(
            "Injected {} snapshot(s) ({} records) into '{}'",
            files,
            records,
            meta.name
        );
        Ok((files, records))
    }

    /// Stream one snapshot file into the target in bounded batches.
    async fn inject_file(
        &self,
        meta: &ModelMeta,
        timestamp: DateTime<Utc>,
        first_injection: bool,
        progress: &MultiProgress,
    ) -> Result<u64> {
        // First pass counts records so the bar has a total; the file is
        // streamed both times, never materialized.
        let total = self.snapshots.count_records(&meta.name, timestamp)?;
        let bar = progress.add(ProgressBar::new(total));
        bar.set_style(bar_style());
        bar.set_message(meta.name.clone());

        let mut reader = self.snapshots.open_snapshot(&meta.name, timestamp)?;
        let delete_below = (!first_injection).then_some(timestamp);

        let mut in_flight = FuturesUnordered::new();
        let mut batch: Vec<Record> = Vec::with_capacity(self.config.batch_size);
        let mut applied = 0u64;
        while let Some(record) = reader.next_record()? {
            batch.push(record);
            if batch.len() == self.config.batch_size {
                let full = std::mem::replace(
                    &mut batch,
                    Vec::with_capacity(self.config.batch_size),
                );
                in_flight.push(self.apply_batch(meta, full, delete_below));
                if in_flight.len() >= self.config.parallel_batches {
                    // At capacity: retire one batch before reading further.
                    // An error drops the set, cancelling outstanding batches;
                    // their transactions roll back.
                    if let Some(done) = in_flight.next().await {
                        let count = done?;
                        applied += count;
                        bar.inc(count);
                    }
                }
            }
        }
        if !batch.is_empty() {
            in_flight.push(self.apply_batch(meta, batch, delete_below));
        }
        while let Some(done) = in_flight.next().await {
            let count = done?;
            applied += count;
            bar.inc(count);
        }
        bar.finish();
        Ok(applied)
    }

    async fn apply_batch(
        &self,
        meta: &ModelMeta,
        mut records: Vec<Record>,
        delete_below: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        for record in &mut records {
            normalize_nullable_json(meta, record);
        }
        self.target.apply_batch(meta, &records, delete_below).await?;
        Ok(records.len() as u64)
    }
}
