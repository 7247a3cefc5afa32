use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::watermark::models::SyncWatermark;
use crate::watermark::repositories::WatermarkRepository;
use geosync_common::error::{GeoSyncError, GeoSyncResult};

/// Watermarks kept in the `sync_watermarks` table, one row per target.
#[derive(Clone)]
pub struct PgWatermarkRepository {
    pool: PgPool,
}

impl PgWatermarkRepository {
    /// Build the repository, creating the backing table if absent.
    pub async fn connect(pool: PgPool) -> GeoSyncResult<Self> {
        let repo = Self { pool };
        repo.ensure_table().await?;
        Ok(repo)
    }

    pub async fn ensure_table(&self) -> GeoSyncResult<()> {
        sqlx::query(
            "create table if not exists sync_watermarks (
               source text primary key,
               cursor_value text,
               last_synced_at timestamptz,
               created_at timestamptz not null default now(),
               updated_at timestamptz not null default now()
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| GeoSyncError::Database(e.to_string()))?;
        Ok(())
    }

    fn map_row(row: sqlx::postgres::PgRow) -> GeoSyncResult<SyncWatermark> {
        Ok(SyncWatermark {
            source: row.get("source"),
            cursor_value: row.get("cursor_value"),
            last_synced_at: row.get("last_synced_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Fetch the full watermark row for a target, if one exists.
    pub async fn get(&self, source: &str) -> GeoSyncResult<Option<SyncWatermark>> {
        let row = sqlx::query(
            "select source, cursor_value, last_synced_at, created_at, updated_at
             from sync_watermarks
             where source = $1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GeoSyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }
}

#[async_trait]
impl WatermarkRepository for PgWatermarkRepository {
    async fn read(&self, target: &str) -> GeoSyncResult<i64> {
        Ok(self.get(target).await?.map(|wm| wm.value()).unwrap_or(0))
    }

    async fn write(&self, target: &str, value: i64) -> GeoSyncResult<()> {
        if value < 0 {
            return Err(GeoSyncError::Validation(format!(
                "watermark must be non-negative, got {value}"
            )));
        }
        sqlx::query(
            "insert into sync_watermarks (source, cursor_value, last_synced_at, updated_at)
             values ($1, $2, $3, $3)
             on conflict (source) do update set
               cursor_value = excluded.cursor_value,
               last_synced_at = excluded.last_synced_at,
               updated_at = excluded.updated_at",
        )
        .bind(target)
        .bind(value.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| GeoSyncError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    async fn test_repo() -> Option<(PgWatermarkRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        let repo = PgWatermarkRepository::connect(pool.clone()).await.ok()?;
        Some((repo, pool))
    }

    fn unique_source(prefix: &str) -> String {
        format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn read_missing_is_zero() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source("parcels");
        assert_eq!(repo.read(&source).await.expect("read"), 0);
        assert!(repo.get(&source).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn write_then_read() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source("parcels");
        repo.write(&source, 2500).await.expect("write");
        assert_eq!(repo.read(&source).await.expect("read"), 2500);

        let row = repo.get(&source).await.expect("get").expect("row");
        assert_eq!(row.cursor_value.as_deref(), Some("2500"));
        assert!(row.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn write_overwrites_existing_row() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source("zips");
        repo.write(&source, 10).await.expect("first");
        repo.write(&source, 20).await.expect("second");
        assert_eq!(repo.read(&source).await.expect("read"), 20);
    }

    #[tokio::test]
    async fn corrupt_cursor_reads_as_zero() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source("districts");
        sqlx::query("insert into sync_watermarks (source, cursor_value) values ($1, 'garbage')")
            .bind(&source)
            .execute(&pool)
            .await
            .expect("seed");
        assert_eq!(repo.read(&source).await.expect("read"), 0);
    }
}
