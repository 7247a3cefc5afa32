use std::time::Duration;

use reqwest::{Client, StatusCode};

use super::models::{BodyRejection, FeatureCollection, Page};
use super::query::{build_page_params, query_url};
use geosync_common::error::{GeoSyncError, GeoSyncResult};
use geosync_db::features::models::DEFAULT_SRID;

/// Characters of a response body kept for diagnostics.
pub const BODY_PREVIEW_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct FeatureServiceConfig {
    /// Records per page. Fixed for a whole run so offsets never skip or repeat.
    pub page_size: u32,
    pub out_srid: i32,
    pub timeout_secs: u64,
    /// Extra attempts for 429/5xx and connect/timeout failures.
    pub max_retries: u32,
}

impl Default for FeatureServiceConfig {
    fn default() -> Self {
        Self {
            page_size: 2000,
            out_srid: DEFAULT_SRID,
            timeout_secs: 120,
            max_retries: 0,
        }
    }
}

impl FeatureServiceConfig {
    /// Load feature-service settings from environment, defaulting anything unset.
    ///
    /// Returns `Err` for values that are set but unusable, such as a zero page size.
    pub fn from_env() -> GeoSyncResult<Self> {
        let defaults = Self::default();

        let page_size = parse_var("FEATURE_SERVICE_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(GeoSyncError::Config(
                "FEATURE_SERVICE_PAGE_SIZE must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            page_size,
            out_srid: parse_var("FEATURE_SERVICE_OUT_SRID", defaults.out_srid)?,
            timeout_secs: parse_var("FEATURE_SERVICE_TIMEOUT_SECS", defaults.timeout_secs)?,
            max_retries: parse_var("FEATURE_SERVICE_MAX_RETRIES", defaults.max_retries)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> GeoSyncResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GeoSyncError::Config(format!("invalid {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// First [`BODY_PREVIEW_CHARS`] characters of a body, marked when cut.
pub fn body_preview(body: &str) -> String {
    match body.char_indices().nth(BODY_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeatureServiceError {
    #[error("HTTP {status}: {preview}")]
    HttpError { status: StatusCode, preview: String },

    #[error("response is not a feature collection (HTTP {status}): {preview}")]
    Protocol { status: StatusCode, preview: String },

    #[error("failed to decode feature collection: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct FeatureServiceClient {
    client: Client,
    config: FeatureServiceConfig,
}

impl FeatureServiceClient {
    pub fn new(config: FeatureServiceConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FeatureServiceConfig {
        &self.config
    }

    /// Fetch one page of features with identifiers above `floor`, starting at
    /// `offset` in the server's ascending-identifier result set.
    pub async fn fetch_page(
        &self,
        layer_url: &str,
        id_field: &str,
        floor: i64,
        offset: u64,
    ) -> Result<Page, FeatureServiceError> {
        let url = query_url(layer_url);
        let params = build_page_params(
            id_field,
            floor,
            offset,
            self.config.page_size,
            self.config.out_srid,
        );

        let (status, body) = self.request_with_retry(&url, &params).await?;

        match FeatureCollection::from_body(&body) {
            Ok(collection) => Ok(Page::from_collection(status, collection)),
            Err(BodyRejection::NotFeatureCollection) => Err(FeatureServiceError::Protocol {
                status,
                preview: body_preview(&body),
            }),
            Err(BodyRejection::Undecodable(msg)) => Err(FeatureServiceError::Decode(msg)),
        }
    }

    /// GET `url`, returning the status and body of the first success response.
    async fn request_with_retry(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<(StatusCode, String), FeatureServiceError> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt.min(5), 30);
                tracing::warn!(attempt, backoff_secs, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }
            let retries_left = attempt < max_retries;
            attempt += 1;

            let response = match self.client.get(url).query(params).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if retries_left && (e.is_timeout() || e.is_connect()) {
                        tracing::warn!(error = %e, "feature service request failed");
                        continue;
                    }
                    return Err(FeatureServiceError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                let body = response.text().await?;
                return Ok((status, body));
            }

            // Honor Retry-After header for 429
            if status == StatusCode::TOO_MANY_REQUESTS && retries_left {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                continue;
            }

            if status.is_server_error() && retries_left {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(%status, preview = %body_preview(&body), "feature service error");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(FeatureServiceError::HttpError {
                status,
                preview: body_preview(&body),
            });
        }
    }
}
