use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use geosync_common::error::{GeoSyncError, GeoSyncResult};
use serde::Deserialize;

/// Where watermarks are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkBackend {
    /// One small file per target under the state directory.
    File,
    /// One row per target in the `sync_watermarks` table.
    Postgres,
}

impl FromStr for WatermarkBackend {
    type Err = GeoSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(GeoSyncError::Config(format!(
                "unknown watermark backend '{other}' (expected file or postgres)"
            ))),
        }
    }
}

/// How a run picks its starting floor and treats an existing sink table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Resume above the stored watermark and append to the sink.
    Incremental,
    /// Start from zero and recreate the sink table on the first page.
    FullRefresh,
}

impl FromStr for SyncMode {
    type Err = GeoSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "incremental" => Ok(Self::Incremental),
            "full_refresh" | "full" => Ok(Self::FullRefresh),
            other => Err(GeoSyncError::Config(format!(
                "unknown sync mode '{other}' (expected incremental or full_refresh)"
            ))),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => f.write_str("incremental"),
            Self::FullRefresh => f.write_str("full_refresh"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
    pub state_dir: PathBuf,
    pub watermark_backend: WatermarkBackend,
    pub sync_mode: SyncMode,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> GeoSyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            state_dir: PathBuf::from(get_var_or("GEOSYNC_STATE_DIR", "state")),
            watermark_backend: get_var_or("GEOSYNC_WATERMARK_BACKEND", "file").parse()?,
            sync_mode: get_var_or("GEOSYNC_MODE", "incremental").parse()?,
        })
    }
}

fn get_var(key: &str) -> GeoSyncResult<String> {
    env::var(key).map_err(|_| GeoSyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_optional_vars() {
        env::remove_var("GEOSYNC_STATE_DIR");
        env::remove_var("GEOSYNC_WATERMARK_BACKEND");
        env::remove_var("GEOSYNC_MODE");
        env::remove_var("LOG_LEVEL");
    }

    #[test]
    fn config_from_env_succeeds_with_required_vars() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional_vars();

        env::set_var("DATABASE_URL", "postgres://localhost/geosync_test");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.database_url, "postgres://localhost/geosync_test");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.state_dir, PathBuf::from("state"));
        assert_eq!(cfg.watermark_backend, WatermarkBackend::File);
        assert_eq!(cfg.sync_mode, SyncMode::Incremental);

        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn config_from_env_fails_without_database_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::remove_var("DATABASE_URL");
        let result = AppConfig::from_env();
        assert!(matches!(result, Err(GeoSyncError::Config(_))));
    }

    #[test]
    fn config_reads_backend_and_mode() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional_vars();

        env::set_var("DATABASE_URL", "postgres://localhost/geosync_test");
        env::set_var("GEOSYNC_WATERMARK_BACKEND", "postgres");
        env::set_var("GEOSYNC_MODE", "full-refresh");
        env::set_var("GEOSYNC_STATE_DIR", "/var/lib/geosync");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.watermark_backend, WatermarkBackend::Postgres);
        assert_eq!(cfg.sync_mode, SyncMode::FullRefresh);
        assert_eq!(cfg.state_dir, PathBuf::from("/var/lib/geosync"));

        env::remove_var("DATABASE_URL");
        clear_optional_vars();
    }

    #[test]
    fn config_rejects_unknown_mode() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional_vars();

        env::set_var("DATABASE_URL", "postgres://localhost/geosync_test");
        env::set_var("GEOSYNC_MODE", "sometimes");

        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("sometimes"), "got: {err}");

        env::remove_var("DATABASE_URL");
        clear_optional_vars();
    }

    #[test]
    fn sync_mode_display_round_trips_through_parse() {
        for mode in [SyncMode::Incremental, SyncMode::FullRefresh] {
            let parsed: SyncMode = mode.to_string().parse().expect("parse");
            assert_eq!(parsed, mode);
        }
    }
}
