use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::parse_watermark;
use crate::watermark::repositories::WatermarkRepository;
use geosync_common::error::{GeoSyncError, GeoSyncResult};

const WATERMARK_EXTENSION: &str = "watermark";

/// Stores each target's watermark as a decimal string in
/// `<state_dir>/<target>.watermark`.
#[derive(Debug, Clone)]
pub struct FileWatermarkRepository {
    state_dir: PathBuf,
}

impl FileWatermarkRepository {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Path of the watermark file for a target.
    pub fn path_for(&self, target: &str) -> GeoSyncResult<PathBuf> {
        validate_target_name(target)?;
        Ok(self
            .state_dir
            .join(format!("{target}.{WATERMARK_EXTENSION}")))
    }

    async fn ensure_dir(&self) -> GeoSyncResult<()> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| {
                GeoSyncError::Storage(format!(
                    "failed to create state directory {}: {e}",
                    self.state_dir.display()
                ))
            })
    }
}

/// Target names become file names, so they must not escape the state directory.
fn validate_target_name(target: &str) -> GeoSyncResult<()> {
    let valid = !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(GeoSyncError::Validation(format!(
            "invalid sync target name '{target}'"
        )))
    }
}

#[async_trait]
impl WatermarkRepository for FileWatermarkRepository {
    async fn read(&self, target: &str) -> GeoSyncResult<i64> {
        self.ensure_dir().await?;
        let path = self.path_for(target)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let value = parse_watermark(&raw);
                if value == 0 && !raw.trim().is_empty() && raw.trim() != "0" {
                    tracing::warn!(
                        target_name = target,
                        path = %path.display(),
                        "unparsable watermark, starting from 0"
                    );
                }
                Ok(value)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            // Non-UTF-8 bytes are corrupt state, not an I/O failure.
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                tracing::warn!(
                    target_name = target,
                    path = %path.display(),
                    "watermark file is not valid UTF-8, starting from 0"
                );
                Ok(0)
            }
            Err(e) => Err(GeoSyncError::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write(&self, target: &str, value: i64) -> GeoSyncResult<()> {
        if value < 0 {
            return Err(GeoSyncError::Validation(format!(
                "watermark must be non-negative, got {value}"
            )));
        }
        self.ensure_dir().await?;
        let path = self.path_for(target)?;
        let temp_path = self
            .state_dir
            .join(format!(".{target}.{}.tmp", uuid::Uuid::new_v4()));

        let storage_err = |action: &str, p: &Path, e: std::io::Error| {
            GeoSyncError::Storage(format!("failed to {action} {}: {e}", p.display()))
        };

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| storage_err("create", &temp_path, e))?;
        file.write_all(value.to_string().as_bytes())
            .await
            .map_err(|e| storage_err("write", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_err("sync", &temp_path, e))?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(storage_err("replace", &path, e));
        }

        tracing::debug!(target_name = target, value, path = %path.display(), "watermark written");
        Ok(())
    }
}
