//! Finnhub adapter. Market data only; statements are reported unavailable.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{FetchError, FetchErrorKind};
use crate::limiter::RateLimitHint;
use crate::model::{Category, CategoryData, CategoryPayload, MarketData, ProviderId, Scale};
use crate::providers::{DEFAULT_REQUEST_TIMEOUT, FinancialDataProvider, build_http_client, get_json};

const MILLION: f64 = 1_000_000.0;

pub struct FinnhubProvider {
    base_url: String,
    api_key: String,
    priority: usize,
    client: reqwest::Client,
}

impl FinnhubProvider {
    pub fn new(base_url: &str, api_key: &str, priority: usize) -> Result<Self> {
        Self::with_timeout(base_url, api_key, priority, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: &str,
        priority: usize,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            priority,
            client: build_http_client(timeout)?,
        })
    }

    async fn fetch_market(&self, symbol: &str) -> Result<MarketData, FetchError> {
        let profile_url = format!("{}/stock/profile2", self.base_url);
        let quote_url = format!("{}/quote", self.base_url);
        let query = [("symbol", symbol), ("token", self.api_key.as_str())];

        let profile: FinnhubProfile =
            get_json(&self.client, &profile_url, &query, &format!("finnhub profile for {symbol}"))
                .await?;
        let quote: FinnhubQuote =
            get_json(&self.client, &quote_url, &query, &format!("finnhub quote for {symbol}"))
                .await?;

        // Finnhub returns an empty object for unknown symbols, and a quote of
        // all zeros.
        let price = quote.current.filter(|p| *p > 0.0);
        let market = MarketData {
            price,
            shares_outstanding: profile.share_outstanding.map(|s| s * MILLION),
            market_cap: profile.market_capitalization.map(|m| m * MILLION),
            beta: None,
            currency: profile.currency,
        };
        if market.is_empty() {
            return Err(FetchError::permanent(FetchErrorKind::NotFound(format!(
                "no profile data for {symbol}"
            ))));
        }
        Ok(market)
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubProfile {
    #[serde(rename = "shareOutstanding")]
    share_outstanding: Option<f64>,
    #[serde(rename = "marketCapitalization")]
    market_capitalization: Option<f64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    #[serde(rename = "c")]
    current: Option<f64>,
}

#[async_trait]
impl FinancialDataProvider for FinnhubProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Finnhub
    }

    fn priority(&self) -> usize {
        self.priority
    }

    fn rate_limit(&self) -> RateLimitHint {
        RateLimitHint::per_minute(60)
    }

    async fn fetch(
        &self,
        symbol: &str,
        category: Category,
    ) -> Result<CategoryPayload, FetchError> {
        let data = match category {
            Category::MarketData => CategoryData::Market(self.fetch_market(symbol).await?),
            Category::IncomeStatement | Category::BalanceSheet | Category::CashFlow => {
                return Err(FetchError::permanent(FetchErrorKind::NotFound(format!(
                    "finnhub serves no {} data",
                    category.as_str()
                ))));
            }
        };

        Ok(CategoryPayload {
            source: ProviderId::Finnhub,
            scale: Scale::Units,
            data,
            field_sources: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> FinnhubProvider {
        FinnhubProvider::new(base_url, "test-token", 2).unwrap()
    }

    #[tokio::test]
    async fn scales_millions_and_reads_quote_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock/profile2"))
            .and(query_param("symbol", "AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"shareOutstanding": 15400.0, "marketCapitalization": 2886000.0,
                    "currency": "USD", "name": "Apple Inc"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"c": 187.44, "h": 188.9, "l": 186.3}"#),
            )
            .mount(&server)
            .await;

        let payload = provider(&server.uri())
            .fetch("AAPL", Category::MarketData)
            .await
            .unwrap();

        let CategoryData::Market(market) = payload.data else {
            panic!("expected market data");
        };
        assert_eq!(market.price, Some(187.44));
        assert_eq!(market.shares_outstanding, Some(15_400_000_000.0));
        assert_eq!(market.market_cap, Some(2_886_000_000_000.0));
    }

    #[tokio::test]
    async fn empty_profile_and_zero_quote_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock/profile2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"c": 0}"#))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .fetch("NOPE", Category::MarketData)
            .await
            .unwrap_err();
        assert!(!err.retriable);
        assert!(matches!(err.kind, FetchErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn statement_categories_are_unsupported() {
        let server = MockServer::start().await;
        let err = provider(&server.uri())
            .fetch("AAPL", Category::IncomeStatement)
            .await
            .unwrap_err();
        assert!(!err.retriable);
        assert!(matches!(err.kind, FetchErrorKind::NotFound(_)));
    }
}
