//! Per-target watermark persistence.
//!
//! A watermark is the highest feature identifier confirmed loaded for a sync
//! target. Stored values that are missing, blank or not a non-negative integer
//! read back as `0` so a damaged state file restarts the target from scratch
//! instead of failing the run.

pub mod file_repository;
pub mod models;
pub mod pg_repository;
pub mod repositories;

pub use file_repository::FileWatermarkRepository;
pub use pg_repository::PgWatermarkRepository;
pub use repositories::WatermarkRepository;

/// Parse a stored watermark value, falling back to `0` for anything that is
/// not a non-negative integer.
pub fn parse_watermark(raw: &str) -> i64 {
    match raw.trim().parse::<i64>() {
        Ok(v) if v >= 0 => v,
        _ => 0,
    }
}
