//! Synchronizer state machine types (spec §4.13, §3).

use std::time::Duration;

/// Phase of the block synchronizer's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Discovering,
    DownloadingHeaders,
    DownloadingBlocks,
    Validating,
    Synced,
    Cancelled,
    Failed(String),
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Synced | SyncState::Cancelled | SyncState::Failed(_))
    }
}

/// A point-in-time snapshot of sync progress, published on a `watch`
/// channel (spec §9: "subscriber handle").
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    pub state: SyncState,
    pub current_height: i64,
    pub target_height: i64,
    pub blocks_downloaded: u64,
    pub blocks_validated: u64,
    pub bytes_downloaded: u64,
    pub sync_start_time: i64,
}

impl SyncProgress {
    pub fn new(current_height: i64) -> Self {
        Self {
            state: SyncState::Idle,
            current_height,
            target_height: current_height,
            blocks_downloaded: 0,
            blocks_validated: 0,
            bytes_downloaded: 0,
            sync_start_time: crate::protocol::now_unix(),
        }
    }

    /// `min(100, current/target * 100)`; 100 when there's nothing to do.
    pub fn percent_complete(&self) -> f64 {
        if self.target_height <= 0 {
            return 100.0;
        }
        let pct = (self.current_height as f64 / self.target_height as f64) * 100.0;
        pct.min(100.0)
    }

    /// `(target - current) / rate`, where `rate = current_progress /
    /// elapsed`. `None` once done or if no progress has been made yet.
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        if self.current_height >= self.target_height {
            return None;
        }
        let elapsed = (crate::protocol::now_unix() - self.sync_start_time).max(0) as f64;
        if elapsed <= 0.0 || self.current_height <= 0 {
            return None;
        }
        let rate = self.current_height as f64 / elapsed;
        if rate <= 0.0 {
            return None;
        }
        let remaining_blocks = (self.target_height - self.current_height) as f64;
        Some(Duration::from_secs_f64(remaining_blocks / rate))
    }
}

/// Whether the node is more than `ibd_threshold_blocks` behind the target.
pub fn is_initial_block_download(current_height: i64, target_height: i64, ibd_threshold_blocks: i64) -> bool {
    current_height < target_height - ibd_threshold_blocks
}

/// One outstanding block fetch, tracked while it moves through the
/// download queue, the pending set, and (on failure) back again.
#[derive(Debug, Clone)]
pub struct BlockDownloadRequest {
    pub hash: [u8; 32],
    pub height: i64,
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_complete_caps_at_100() {
        let mut p = SyncProgress::new(0);
        p.target_height = 10;
        p.current_height = 10;
        assert_eq!(p.percent_complete(), 100.0);
        p.current_height = 5;
        assert_eq!(p.percent_complete(), 50.0);
    }

    #[test]
    fn ibd_threshold() {
        assert!(is_initial_block_download(0, 2000, 1000));
        assert!(!is_initial_block_download(1500, 2000, 1000));
    }
}
