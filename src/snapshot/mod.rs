// ABOUTME: Snapshot persistence module - timestamped files plus watermark bookkeeping
// ABOUTME: The only coupling between the Extractor and the Injector

pub mod filename;
pub mod store;
pub mod stream;

pub use filename::{parse_snapshot_file_name, snapshot_file_name};
pub use store::{PendingSnapshot, SnapshotStore, WATERMARK_FILE};
pub use stream::{JsonArrayReader, SnapshotFileWriter};
