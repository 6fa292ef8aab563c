//! Header-first block synchronization against the best available peers
//! (spec §4.13).

pub mod synchronizer;
pub mod types;

pub use synchronizer::BlockSynchronizer;
pub use types::{BlockDownloadRequest, SyncProgress, SyncState};
