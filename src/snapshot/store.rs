// ABOUTME: Filesystem-backed snapshot store - one directory per model
// ABOUTME: Handles discovery, watermark bookkeeping, and atomic snapshot creation

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::filename::{parse_snapshot_file_name, snapshot_file_name};
use super::stream::{JsonArrayReader, SnapshotFileWriter};
use crate::store::Record;

/// Per-model marker recording the last snapshot fully applied to the target.
pub const WATERMARK_FILE: &str = "latestSnapshotInjected.log";

/// Filesystem layout: `<root>/<model>/<escaped-timestamp>.json` snapshot
/// files plus one `latestSnapshotInjected.log` watermark per model.
///
/// Snapshot files are immutable once written; the watermark is the sole
/// resumability state shared across runs.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, model: &str) -> PathBuf {
        self.root.join(model)
    }

    pub fn snapshot_path(&self, model: &str, timestamp: DateTime<Utc>) -> PathBuf {
        self.model_dir(model).join(snapshot_file_name(timestamp))
    }

    /// Model names discovered from subdirectories of the snapshots root.
    ///
    /// Sorted for a deterministic default processing order; missing root means
    /// nothing has been extracted yet.
    pub fn discovered_models(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list snapshots root {:?}", self.root))?;
        let mut models = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    models.push(name.to_string());
                }
            }
        }
        models.sort();
        Ok(models)
    }

    /// All snapshot timestamps for a model, ascending.
    ///
    /// File names that do not parse back to a timestamp are skipped silently:
    /// they cannot be ordered against the watermark, and the watermark log
    /// itself lives in the same directory.
    pub fn list_snapshots(&self, model: &str) -> Result<Vec<DateTime<Utc>>> {
        let dir = self.model_dir(model);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Failed to list snapshots in {:?}", dir))?;
        let mut timestamps = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(ts) = parse_snapshot_file_name(name) {
                    timestamps.push(ts);
                }
            }
        }
        timestamps.sort();
        Ok(timestamps)
    }

    /// Timestamp of the most recent snapshot file, injected or not.
    ///
    /// This drives the Extractor's window lower bound: it must come from the
    /// newest file on disk, never from the watermark, so extraction keeps
    /// advancing even when injection lags behind.
    pub fn latest_snapshot(&self, model: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.list_snapshots(model)?.pop())
    }

    /// Snapshots strictly newer than the watermark, ascending.
    pub fn snapshots_after(
        &self,
        model: &str,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut timestamps = self.list_snapshots(model)?;
        if let Some(watermark) = watermark {
            timestamps.retain(|ts| *ts > watermark);
        }
        Ok(timestamps)
    }

    /// Read the persisted watermark, `None` when the model has never been
    /// fully injected.
    pub fn read_watermark(&self, model: &str) -> Result<Option<DateTime<Utc>>> {
        let path = self.model_dir(model).join(WATERMARK_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read watermark from {:?}", path))?;
        let ts = DateTime::parse_from_rfc3339(contents.trim())
            .with_context(|| format!("Corrupted watermark in {:?}", path))?;
        Ok(Some(ts.with_timezone(&Utc)))
    }

    /// Persist the watermark after a snapshot file has been fully applied.
    pub fn write_watermark(&self, model: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let dir = self.model_dir(model);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory {:?}", dir))?;
        let path = dir.join(WATERMARK_FILE);
        fs::write(&path, timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
            .with_context(|| format!("Failed to write watermark to {:?}", path))
    }

    /// Start writing a new snapshot file for `model` at `timestamp`.
    ///
    /// Records go to a temporary file in the model directory; the file only
    /// appears under its snapshot name when `commit` renames it, so the
    /// Injector never observes a truncated array. Dropping the pending
    /// snapshot without committing removes the temporary file.
    pub fn create_snapshot(
        &self,
        model: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PendingSnapshot> {
        let dir = self.model_dir(model);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory {:?}", dir))?;
        let temp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary snapshot in {:?}", dir))?;
        let (file, temp_path) = temp.into_parts();
        let writer = SnapshotFileWriter::new(BufWriter::new(file))?;
        Ok(PendingSnapshot {
            writer,
            temp_path,
            final_path: dir.join(snapshot_file_name(timestamp)),
        })
    }

    /// Open an existing snapshot for streaming reads.
    pub fn open_snapshot(
        &self,
        model: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<JsonArrayReader<BufReader<fs::File>>> {
        let path = self.snapshot_path(model, timestamp);
        let file =
            fs::File::open(&path).with_context(|| format!("Failed to open snapshot {:?}", path))?;
        Ok(JsonArrayReader::new(BufReader::new(file)))
    }

    /// Count records in a snapshot by streaming it, never materializing it.
    pub fn count_records(&self, model: &str, timestamp: DateTime<Utc>) -> Result<u64> {
        self.open_snapshot(model, timestamp)?.count_remaining()
    }
}

/// A snapshot file being written; invisible to discovery until committed.
pub struct PendingSnapshot {
    writer: SnapshotFileWriter<BufWriter<fs::File>>,
    temp_path: tempfile::TempPath,
    final_path: PathBuf,
}

impl PendingSnapshot {
    pub fn write_page(&mut self, records: &[Record]) -> Result<()> {
        self.writer.write_page(records)
    }

    /// Close the array, flush to disk, and rename into the snapshot name.
    pub fn commit(self) -> Result<u64> {
        let PendingSnapshot {
            writer,
            temp_path,
            final_path,
        } = self;
        let (out, written) = writer.finish()?;
        let file = out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to flush snapshot file")?;
        file.sync_all().context("Failed to sync snapshot file")?;
        drop(file);
        temp_path
            .persist(&final_path)
            .with_context(|| format!("Failed to publish snapshot {:?}", final_path))?;
        Ok(written)
    }
}
