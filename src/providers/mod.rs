//! Provider adapters. Adapters classify failures but never retry or sleep.

pub mod alphavantage;
pub mod finnhub;
pub mod fmp;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use crate::limiter::RateLimitHint;

use crate::error::{FetchError, FetchErrorKind};
use crate::model::{Category, CategoryPayload, ProviderId};
use crate::retry::retriable_status;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Common capability every external data source exposes.
#[async_trait]
pub trait FinancialDataProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Position in the configured priority order; lower wins.
    fn priority(&self) -> usize;

    /// Advertised request budget, used to build the provider's rate limiter.
    fn rate_limit(&self) -> RateLimitHint;

    /// One logical fetch of a data category. A provider that does not serve
    /// the category answers `NotFound` so the aggregator falls through to the
    /// next one.
    async fn fetch(
        &self,
        symbol: &str,
        category: Category,
    ) -> Result<CategoryPayload, FetchError>;
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent("finbrief/0.1")
        .timeout(timeout)
        .build()?)
}

/// Maps an HTTP status onto the shared failure taxonomy.
pub(crate) fn classify_status(status: StatusCode, detail: &str) -> FetchError {
    match status.as_u16() {
        401 | 403 => FetchError::permanent(FetchErrorKind::Auth(detail.to_string())),
        404 => FetchError::permanent(FetchErrorKind::NotFound(detail.to_string())),
        429 => FetchError::transient(FetchErrorKind::RateLimited),
        code if retriable_status(code) => {
            FetchError::transient(FetchErrorKind::Unavailable(format!("{status}: {detail}")))
        }
        _ => FetchError::permanent(FetchErrorKind::Malformed(format!("{status}: {detail}"))),
    }
}

/// Maps a transport-level reqwest error onto the taxonomy.
pub(crate) fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::transient(FetchErrorKind::Timeout)
    } else {
        FetchError::transient(FetchErrorKind::Unavailable(err.to_string()))
    }
}

/// Issues a GET and parses the JSON body, classifying failures along the way.
/// Unknown JSON fields are ignored; a body that does not match the expected
/// shape is `Malformed` (not retriable).
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
    context: &str,
) -> Result<T, FetchError> {
    debug!(url, context, "requesting");
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(classify_transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(status, context));
    }

    let body = response.text().await.map_err(classify_transport)?;
    serde_json::from_str(&body)
        .map_err(|e| FetchError::permanent(FetchErrorKind::Malformed(format!("{context}: {e}"))))
}
