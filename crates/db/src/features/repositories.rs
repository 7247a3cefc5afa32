use async_trait::async_trait;

use crate::features::models::{Feature, SinkTable};
use geosync_common::error::GeoSyncResult;

#[async_trait]
pub trait FeatureSink: Send + Sync {
    /// Whether the table currently exists in the sink.
    async fn table_exists(&self, table: &SinkTable) -> GeoSyncResult<bool>;

    /// Replace any table of the same name with one shaped after `features`,
    /// then load them. Returns the number of rows written.
    async fn create_and_load(&self, table: &SinkTable, features: &[Feature]) -> GeoSyncResult<u64>;

    /// Insert `features` into an existing table without altering its schema.
    /// Returns the number of rows written.
    async fn append(&self, table: &SinkTable, features: &[Feature]) -> GeoSyncResult<u64>;
}
