// ABOUTME: Library root for snapshot-replicator
// ABOUTME: Exposes the extract/inject pipeline, snapshot store, and store adapters

pub mod config;
pub mod extract;
pub mod inject;
pub mod registry;
pub mod selection;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use extract::{ExtractConfig, ExtractStats, Extractor};
pub use inject::{InjectConfig, InjectStats, Injector};
pub use registry::{ModelMeta, ModelRegistry};
pub use selection::Selection;
pub use snapshot::SnapshotStore;
pub use sync::{SyncConfig, SyncLoop, SyncStats};
