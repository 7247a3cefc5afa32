use async_trait::async_trait;
use geosync_config::SyncMode;

use crate::sync::syncer::SyncError;

/// Summary of one completed target run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub target: String,
    pub mode: SyncMode,
    /// Watermark read at the start of the run.
    pub previous_watermark: i64,
    /// Watermark after the run; equal to `previous_watermark` when nothing loaded.
    pub watermark: i64,
    pub pages_fetched: u32,
    pub pages_loaded: u32,
    pub features_loaded: u64,
    /// Loaded features whose identifier could not be read as an integer.
    pub unparsable_ids: usize,
    /// Features at or below the floor, dropped before loading.
    pub stale_dropped: usize,
    pub created_table: bool,
}

impl SyncOutcome {
    pub fn loaded_any(&self) -> bool {
        self.pages_loaded > 0
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn target_name(&self) -> &str;
    async fn sync(&self) -> Result<SyncOutcome, SyncError>;
}
