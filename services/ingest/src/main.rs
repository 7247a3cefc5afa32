mod connector;
mod feature_service;
mod sync;

use std::process::ExitCode;

use tokio::task::JoinSet;

use geosync_config::{init_tracing, AppConfig, SyncMode, WatermarkBackend};
use geosync_db::features::PgFeatureSink;
use geosync_db::watermark::{FileWatermarkRepository, PgWatermarkRepository, WatermarkRepository};

use crate::connector::Connector;
use crate::feature_service::client::{FeatureServiceClient, FeatureServiceConfig};
use crate::sync::syncer::FeatureSyncer;
use crate::sync::target::{select_targets, SyncTargetConfig};

/// Exit status for configuration problems, distinct from sync failures.
const EXIT_CONFIG: u8 = 2;

fn build_connectors<W>(
    targets: Vec<SyncTargetConfig>,
    client: &FeatureServiceClient,
    watermarks: W,
    sink: &PgFeatureSink,
    mode: SyncMode,
) -> Vec<Box<dyn Connector>>
where
    W: WatermarkRepository + Clone + 'static,
{
    targets
        .into_iter()
        .map(|target| {
            Box::new(FeatureSyncer::new(
                target,
                client.clone(),
                watermarks.clone(),
                sink.clone(),
                mode,
            )) as Box<dyn Connector>
        })
        .collect()
}

/// Run every connector concurrently and return how many failed.
async fn run_connectors(connectors: Vec<Box<dyn Connector>>) -> usize {
    let mut set = JoinSet::new();
    for connector in connectors {
        set.spawn(async move {
            let name = connector.target_name().to_string();
            (name, connector.sync().await)
        });
    }

    let mut failed = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(outcome))) => {
                tracing::info!(
                    target_name = %outcome.target,
                    mode = %outcome.mode,
                    loaded = outcome.loaded_any(),
                    features = outcome.features_loaded,
                    pages = outcome.pages_loaded,
                    watermark = outcome.watermark,
                    previous_watermark = outcome.previous_watermark,
                    created_table = outcome.created_table,
                    unparsable_ids = outcome.unparsable_ids,
                    stale_dropped = outcome.stale_dropped,
                    "target sync completed"
                );
            }
            Ok((name, Err(e))) => {
                failed += 1;
                tracing::error!(target_name = %name, error = %e, "target sync failed");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, "target sync task aborted");
            }
        }
    }
    failed
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("info");

    tracing::info!(service = "geosync-ingest", "starting");

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let service_config = match FeatureServiceConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "feature service configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // Command-line arguments restrict the run to the named targets.
    let selected: Vec<String> = std::env::args().skip(1).collect();
    let targets = match SyncTargetConfig::list_from_env(service_config.out_srid)
        .and_then(|all| select_targets(all, &selected))
    {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "target configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    tracing::info!(
        targets = ?targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        mode = %config.sync_mode,
        backend = ?config.watermark_backend,
        page_size = service_config.page_size,
        "targets configured"
    );

    let client = match FeatureServiceClient::new(service_config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build feature service client");
            return ExitCode::FAILURE;
        }
    };

    let pool = match geosync_db::create_pool(&config.database_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            return ExitCode::FAILURE;
        }
    };
    let sink = PgFeatureSink::new(pool.clone());

    let connectors = match config.watermark_backend {
        WatermarkBackend::File => {
            let watermarks = FileWatermarkRepository::new(config.state_dir.clone());
            build_connectors(targets, &client, watermarks, &sink, config.sync_mode)
        }
        WatermarkBackend::Postgres => match PgWatermarkRepository::connect(pool.clone()).await {
            Ok(watermarks) => build_connectors(targets, &client, watermarks, &sink, config.sync_mode),
            Err(e) => {
                tracing::error!(error = %e, "failed to prepare watermark table");
                return ExitCode::FAILURE;
            }
        },
    };

    let total = connectors.len();
    let failed = run_connectors(connectors).await;

    tracing::info!(total, failed, "ingest run finished");
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
