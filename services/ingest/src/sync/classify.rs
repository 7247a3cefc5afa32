use geosync_db::features::Feature;

use crate::feature_service::models::Page;

/// What the orchestrator does with a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    /// No features: nothing to load, stop.
    TerminalEmpty,
    /// Features to load; fetch the next page afterwards when `truncated`.
    Records { truncated: bool },
}

/// Classify a page from its content alone.
pub fn classify(page: &Page) -> PageClass {
    if page.features.is_empty() {
        PageClass::TerminalEmpty
    } else {
        PageClass::Records {
            truncated: page.truncated,
        }
    }
}

/// Truncated, yet shorter than requested: the server capped the page below
/// `page_size`, so advancing the offset by `page_size` skips records.
pub fn capped_below_page_size(page: &Page, page_size: u32) -> bool {
    page.truncated
        && !page.features.is_empty()
        && (page.features.len() as u64) < u64::from(page_size)
}

/// Identifier summary of one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdScan {
    /// Largest numeric identifier seen.
    pub max: Option<i64>,
    /// Features whose identifier is missing or not an integer.
    pub unparsable: usize,
}

pub fn scan_identifiers(features: &[Feature], id_field: &str) -> IdScan {
    features
        .iter()
        .fold(IdScan::default(), |mut scan, f| {
            match f.identifier(id_field) {
                Some(id) => scan.max = Some(scan.max.map_or(id, |m| m.max(id))),
                None => scan.unparsable += 1,
            }
            scan
        })
}
