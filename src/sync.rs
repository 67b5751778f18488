// ABOUTME: Sync loop - periodic extract-then-inject cycles with reentrancy protection
// ABOUTME: Ticks that fire while a cycle is still running are dropped, never queued

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::extract::{ExtractConfig, Extractor};
use crate::inject::{InjectConfig, Injector};
use crate::registry::ModelRegistry;
use crate::selection::Selection;
use crate::snapshot::SnapshotStore;
use crate::store::{SourceStore, TargetStore};

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between sync cycles
    pub interval: Duration,
    pub extract: ExtractConfig,
    pub inject: InjectConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            extract: ExtractConfig::default(),
            inject: InjectConfig::default(),
        }
    }
}

/// Statistics from one extract-then-inject cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub models_extracted: usize,
    pub records_extracted: u64,
    pub models_injected: usize,
    pub records_injected: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl SyncStats {
    /// Check if the cycle completed without per-model errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Periodic driver running the Extractor then the Injector to completion.
///
/// The cycle runs inline on the loop's own task and the interval skips missed
/// ticks, so at most one cycle is ever in flight - there is no shared
/// "currently running" flag to get out of sync.
pub struct SyncLoop<'a, S: SourceStore, T: TargetStore> {
    source: &'a S,
    target: &'a T,
    registry: &'a ModelRegistry,
    snapshots: &'a SnapshotStore,
    selection: Selection,
    config: SyncConfig,
}

impl<'a, S: SourceStore, T: TargetStore> SyncLoop<'a, S, T> {
    pub fn new(
        source: &'a S,
        target: &'a T,
        registry: &'a ModelRegistry,
        snapshots: &'a SnapshotStore,
        selection: Selection,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            target,
            registry,
            snapshots,
            selection,
            config,
        }
    }

    /// Run one extract-then-inject cycle.
    pub async fn run_cycle(&self) -> Result<SyncStats> {
        let start = std::time::Instant::now();

        let extractor = Extractor::new(
            self.source,
            self.registry,
            self.snapshots,
            self.config.extract.clone(),
        );
        let extracted = extractor.run(&self.selection, Utc::now()).await?;

        let injector = Injector::new(
            self.target,
            self.registry,
            self.snapshots,
            self.config.inject.clone(),
        );
        let injected = injector.run(&self.selection).await?;

        let mut errors = extracted.errors;
        errors.extend(injected.errors);
        Ok(SyncStats {
            models_extracted: extracted.models_extracted,
            records_extracted: extracted.records_extracted,
            models_injected: injected.models_injected,
            records_injected: injected.records_injected,
            errors,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run cycles until a shutdown signal arrives.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> Result<()> {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycles = 0u64;
        tracing::info!(
            "Starting sync loop with interval {:?}",
            self.config.interval
        );

        loop {
            tokio::select! {
                biased; // Check shutdown first

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping sync loop");
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    tracing::info!("Starting sync cycle {}", cycles);

                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => {
                            tracing::info!("Shutdown signal received during sync cycle, aborting");
                            break;
                        }
                        result = self.run_cycle() => {
                            match result {
                                Ok(stats) => {
                                    tracing::info!(
                                        "Sync cycle {} completed: {} records extracted, {} records injected in {}ms",
                                        cycles,
                                        stats.records_extracted,
                                        stats.records_injected,
                                        stats.duration_ms
                                    );
                                    if !stats.errors.is_empty() {
                                        tracing::warn!("Sync cycle {} had {} errors", cycles, stats.errors.len());
                                    }
                                }
                                Err(e) => {
                                    tracing::error!("Sync cycle {} failed: {}", cycles, e);
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelMeta;
    use crate::store::{MemorySource, MemoryTarget};
    use tempfile::tempdir;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.inject.batch_size, 100);
    }

    #[test]
    fn test_sync_stats_success() {
        let stats = SyncStats::default();
        assert!(stats.is_success());

        let failed = SyncStats {
            errors: vec!["Extraction failed for 'orders'".to_string()],
            ..SyncStats::default()
        };
        assert!(!failed.is_success());
    }

    #[tokio::test]
    async fn test_sync_loop_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::from_models(vec![ModelMeta {
            name: "orders".to_string(),
            unique_key_fields: vec!["id".to_string()],
            incremental_field: None,
            nullable_json_fields: Vec::new(),
        }])
        .unwrap();
        let snapshots = SnapshotStore::new(dir.path());
        let source = MemorySource::new();
        let target = MemoryTarget::new();
        let sync = SyncLoop::new(
            &source,
            &target,
            &registry,
            &snapshots,
            Selection::all(),
            SyncConfig {
                interval: Duration::from_millis(10),
                ..SyncConfig::default()
            },
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
        let run = sync.run(shutdown_rx);
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("loop exited before shutdown"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("loop did not stop after shutdown")
            .unwrap();
    }
}
