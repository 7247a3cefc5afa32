use async_trait::async_trait;

use geosync_common::error::GeoSyncError;
use geosync_config::SyncMode;
use geosync_db::features::{Feature, FeatureSink};
use geosync_db::watermark::WatermarkRepository;

use super::classify::{capped_below_page_size, classify, scan_identifiers, PageClass};
use super::target::SyncTargetConfig;
use super::writer::{SinkWriter, WriteMode};
use crate::connector::{Connector, SyncOutcome};
use crate::feature_service::client::{FeatureServiceClient, FeatureServiceError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to read watermark: {0}")]
    WatermarkRead(#[source] GeoSyncError),

    #[error("failed to probe sink table: {0}")]
    SinkProbe(#[source] GeoSyncError),

    #[error("fetch failed on page {page} (offset {offset}): {source}")]
    Fetch {
        page: u32,
        offset: u64,
        source: FeatureServiceError,
    },

    #[error("sink write failed on page {page} (offset {offset}): {source}")]
    Sink {
        page: u32,
        offset: u64,
        source: GeoSyncError,
    },

    #[error("failed to persist watermark {value}: {source}")]
    WatermarkWrite { value: i64, source: GeoSyncError },
}

/// Split off features whose identifier is at or below `floor`.
///
/// Features without a readable identifier are kept. Returns the kept
/// features and the number dropped.
fn drop_stale(features: Vec<Feature>, id_field: &str, floor: i64) -> (Vec<Feature>, usize) {
    let before = features.len();
    let kept: Vec<Feature> = features
        .into_iter()
        .filter(|f| f.identifier(id_field).map_or(true, |id| id > floor))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Mirrors one feature layer into its sink table, resuming above the
/// stored watermark.
pub struct FeatureSyncer<W, K> {
    target: SyncTargetConfig,
    client: FeatureServiceClient,
    watermarks: W,
    sink: K,
    mode: SyncMode,
}

impl<W, K> FeatureSyncer<W, K>
where
    W: WatermarkRepository,
    K: FeatureSink,
{
    pub fn new(
        target: SyncTargetConfig,
        client: FeatureServiceClient,
        watermarks: W,
        sink: K,
        mode: SyncMode,
    ) -> Self {
        Self {
            target,
            client,
            watermarks,
            sink,
            mode,
        }
    }
}

#[async_trait]
impl<W, K> Connector for FeatureSyncer<W, K>
where
    W: WatermarkRepository,
    K: FeatureSink,
{
    fn target_name(&self) -> &str {
        &self.target.name
    }

    async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let target = &self.target;
        let id_field = target.id_field.as_str();

        let previous = self
            .watermarks
            .read(&target.name)
            .await
            .map_err(SyncError::WatermarkRead)?;

        // Full refresh reloads everything into a fresh table.
        let (floor, table_present) = match self.mode {
            SyncMode::Incremental => {
                let present = self
                    .sink
                    .table_exists(&target.table)
                    .await
                    .map_err(SyncError::SinkProbe)?;
                (previous, present)
            }
            SyncMode::FullRefresh => (0, false),
        };

        tracing::info!(
            target_name = %target.name,
            mode = %self.mode,
            watermark = previous,
            floor,
            table = %target.table,
            table_present,
            "starting feature sync"
        );

        let page_size = u64::from(self.client.config().page_size);
        let mut writer = SinkWriter::new(&self.sink, &target.table, table_present);

        let mut offset: u64 = 0;
        let mut page: u32 = 1;
        let mut max_seen = floor;
        let mut outcome = SyncOutcome {
            target: target.name.clone(),
            mode: self.mode,
            previous_watermark: previous,
            watermark: previous,
            pages_fetched: 0,
            pages_loaded: 0,
            features_loaded: 0,
            unparsable_ids: 0,
            stale_dropped: 0,
            created_table: false,
        };

        loop {
            let fetched = match self
                .client
                .fetch_page(&target.layer_url, id_field, floor, offset)
                .await
            {
                Ok(p) => p,
                Err(source) => {
                    tracing::error!(
                        target_name = %target.name,
                        page,
                        offset,
                        error = %source,
                        "feature fetch failed, watermark not advanced"
                    );
                    return Err(SyncError::Fetch {
                        page,
                        offset,
                        source,
                    });
                }
            };
            outcome.pages_fetched += 1;
            tracing::debug!(
                target_name = %target.name,
                page,
                offset,
                status = %fetched.status,
                features = fetched.features.len(),
                truncated = fetched.truncated,
                "page fetched"
            );

            let truncated = match classify(&fetched) {
                PageClass::TerminalEmpty => break,
                PageClass::Records { truncated } => truncated,
            };
            if capped_below_page_size(&fetched, self.client.config().page_size) {
                tracing::warn!(
                    target_name = %target.name,
                    page,
                    offset,
                    features = fetched.features.len(),
                    page_size,
                    "truncated page is smaller than the page size, server limit may skip records"
                );
            }

            let (features, stale) = drop_stale(fetched.features, id_field, floor);
            if stale > 0 {
                tracing::warn!(
                    target_name = %target.name,
                    page,
                    stale,
                    floor,
                    "server returned features at or below the floor, dropping them"
                );
                outcome.stale_dropped += stale;
            }

            let scan = scan_identifiers(&features, id_field);
            if scan.unparsable > 0 {
                tracing::warn!(
                    target_name = %target.name,
                    page,
                    unparsable = scan.unparsable,
                    id_field,
                    "features without an integer identifier, excluded from watermark"
                );
                outcome.unparsable_ids += scan.unparsable;
            }
            if let Some(page_max) = scan.max {
                max_seen = max_seen.max(page_max);
            }

            if !features.is_empty() {
                let (write_mode, rows) = match writer.write_page(&features).await {
                    Ok(written) => written,
                    Err(source) => {
                        tracing::error!(
                            target_name = %target.name,
                            page,
                            offset,
                            error = %source,
                            "sink write failed, watermark not advanced"
                        );
                        return Err(SyncError::Sink {
                            page,
                            offset,
                            source,
                        });
                    }
                };

                outcome.created_table |= write_mode == WriteMode::Create;
                outcome.pages_loaded += 1;
                outcome.features_loaded += features.len() as u64;

                tracing::info!(
                    target_name = %target.name,
                    page,
                    offset,
                    features = features.len(),
                    rows,
                    write_mode = ?write_mode,
                    max_seen,
                    truncated,
                    "page loaded"
                );
            }

            if !truncated {
                break;
            }
            offset += page_size;
            page += 1;
        }

        if !outcome.loaded_any() {
            tracing::info!(
                target_name = %target.name,
                watermark = previous,
                "no new features"
            );
            return Ok(outcome);
        }

        // Never move backwards, even when a full refresh saw smaller ids.
        let next = max_seen.max(previous);
        self.watermarks
            .write(&target.name, next)
            .await
            .map_err(|source| SyncError::WatermarkWrite {
                value: next,
                source,
            })?;
        outcome.watermark = next;

        tracing::info!(
            target_name = %target.name,
            watermark = next,
            features = outcome.features_loaded,
            pages = outcome.pages_loaded,
            "feature sync completed"
        );
        Ok(outcome)
    }
}
