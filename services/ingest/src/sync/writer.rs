use geosync_common::error::GeoSyncResult;
use geosync_db::features::{Feature, FeatureSink, SinkTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Table (re)created from this page's attributes, then loaded.
    Create,
    /// Rows added to the existing table.
    Append,
}

/// Writes the pages of one run into a sink table.
///
/// Whether the table exists is decided once, up front. The first page of a
/// run that found no table creates it; every later page appends.
pub struct SinkWriter<'a, K> {
    sink: &'a K,
    table: &'a SinkTable,
    table_present: bool,
}

impl<'a, K> SinkWriter<'a, K>
where
    K: FeatureSink,
{
    pub fn new(sink: &'a K, table: &'a SinkTable, table_present: bool) -> Self {
        Self {
            sink,
            table,
            table_present,
        }
    }

    pub async fn write_page(&mut self, features: &[Feature]) -> GeoSyncResult<(WriteMode, u64)> {
        if self.table_present {
            let rows = self.sink.append(self.table, features).await?;
            return Ok((WriteMode::Append, rows));
        }

        let rows = self.sink.create_and_load(self.table, features).await?;
        self.table_present = true;
        Ok((WriteMode::Create, rows))
    }
}
