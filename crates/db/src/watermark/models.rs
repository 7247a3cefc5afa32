use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_watermark;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub source: String,
    pub cursor_value: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncWatermark {
    /// Numeric watermark carried by `cursor_value`, `0` if absent or unusable.
    pub fn value(&self) -> i64 {
        self.cursor_value.as_deref().map(parse_watermark).unwrap_or(0)
    }
}
