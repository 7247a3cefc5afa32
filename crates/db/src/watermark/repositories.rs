use async_trait::async_trait;

use geosync_common::error::GeoSyncResult;

#[async_trait]
pub trait WatermarkRepository: Send + Sync {
    /// Read the stored watermark for a target.
    /// Returns `0` when nothing is stored or the stored value is unusable.
    async fn read(&self, target: &str) -> GeoSyncResult<i64>;

    /// Durably replace the watermark for a target.
    async fn write(&self, target: &str, value: i64) -> GeoSyncResult<()>;
}
