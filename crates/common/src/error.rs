use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoSyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type GeoSyncResult<T> = Result<T, GeoSyncError>;
