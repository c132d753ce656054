//! Cache-first aggregation across the configured providers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::{CacheStore, cache_key};
use crate::error::{AggregateError, FetchError};
use crate::limiter::ProviderLimiters;
use crate::model::{
    Category, CategoryData, CategoryPayload, FetchSource, MarketData, NormalizedFinancials,
    ProviderId,
};
use crate::providers::FinancialDataProvider;
use crate::retry::{self, RetryPolicy};

/// Per-category time-to-live. Market data moves intraday; statements change
/// once a quarter at most.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub market: Duration,
    pub statements: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            market: Duration::from_secs(15 * 60),
            statements: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheTtls {
    pub fn for_category(&self, category: Category) -> Duration {
        match category {
            Category::MarketData => self.market,
            _ => self.statements,
        }
    }
}

pub struct Fetcher {
    providers: Vec<Arc<dyn FinancialDataProvider>>,
    cache: Arc<dyn CacheStore>,
    limiters: ProviderLimiters,
    retry: RetryPolicy,
    ttls: CacheTtls,
}

impl Fetcher {
    pub fn new(
        mut providers: Vec<Arc<dyn FinancialDataProvider>>,
        cache: Arc<dyn CacheStore>,
        retry: RetryPolicy,
        ttls: CacheTtls,
    ) -> Self {
        providers.sort_by_key(|p| p.priority());
        let limiters = ProviderLimiters::new(providers.iter().map(|p| (p.id(), p.rate_limit())));
        Self {
            providers,
            cache,
            limiters,
            retry,
            ttls,
        }
    }

    /// Aggregates all data categories for one symbol into a normalized
    /// record. Statement categories no provider can serve are recorded as
    /// missing; absent mandatory market fields abort the aggregation.
    pub async fn fetch_financials(
        &self,
        symbol: &str,
    ) -> Result<NormalizedFinancials, AggregateError> {
        let mut fin = NormalizedFinancials::new(symbol, Utc::now().date_naive());

        for category in Category::ALL {
            match self.fetch_category(symbol, category).await {
                Some((payload, source)) => {
                    debug!(symbol, category = category.as_str(), ?source, "category resolved");
                    fin.apply(category, payload);
                }
                None => {
                    warn!(symbol, category = category.as_str(), "no provider could serve");
                    fin.missing.push(category);
                }
            }
        }

        if fin.market.shares_outstanding.is_none() {
            // Derivable when providers report market cap and price but not
            // the share count itself.
            if let (Some(cap), Some(price)) = (fin.market.market_cap, fin.market.price) {
                if price > 0.0 {
                    fin.market.shares_outstanding = Some(cap / price);
                }
            }
        }

        if fin.market.price.is_none() {
            return Err(AggregateError::MissingMandatoryField("price"));
        }
        if fin.market.shares_outstanding.is_none() {
            return Err(AggregateError::MissingMandatoryField("shares_outstanding"));
        }

        Ok(fin)
    }

    /// Resolves one category: cache, then providers in priority order.
    /// Returns `None` when every provider failed or returned nothing.
    pub async fn fetch_category(
        &self,
        symbol: &str,
        category: Category,
    ) -> Option<(CategoryPayload, FetchSource)> {
        let key = cache_key(symbol, category);

        if let Some(bytes) = self.cache.get(&key).await {
            match serde_json::from_slice::<CategoryPayload>(&bytes) {
                Ok(payload) => return Some((payload, FetchSource::CacheHit)),
                Err(err) => {
                    // Stale schema from an older build; refetch.
                    warn!(key, error = %err, "cached payload undecodable, invalidating");
                    self.cache.invalidate(&key).await;
                }
            }
        }

        let payload = if category == Category::MarketData {
            self.fetch_market_live(symbol).await?
        } else {
            self.fetch_statement_live(symbol, category).await?
        };

        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                self.cache
                    .put(&key, bytes, self.ttls.for_category(category))
                    .await;
            }
            Err(err) => warn!(key, error = %err, "payload not cacheable"),
        }

        Some((payload, FetchSource::Live))
    }

    /// First provider (in priority order) with a non-empty payload wins.
    async fn fetch_statement_live(
        &self,
        symbol: &str,
        category: Category,
    ) -> Option<CategoryPayload> {
        for provider in &self.providers {
            match self.call_provider(provider.as_ref(), symbol, category).await {
                Ok(payload) if !payload.data.is_empty() => return Some(payload),
                Ok(_) => {
                    debug!(symbol, provider = %provider.id(), "empty payload, trying next");
                }
                Err(err) => {
                    warn!(
                        symbol,
                        provider = %provider.id(),
                        category = category.as_str(),
                        error = %err,
                        "provider failed, trying next"
                    );
                }
            }
        }
        None
    }

    /// Market data merges field-wise: lower-priority providers only fill
    /// fields the earlier ones left empty, and each field remembers which
    /// provider supplied it.
    async fn fetch_market_live(&self, symbol: &str) -> Option<CategoryPayload> {
        let mut merged = MarketData::default();
        let mut field_sources = std::collections::BTreeMap::new();
        let mut first_contributor: Option<ProviderId> = None;

        for provider in &self.providers {
            if merged.is_complete() {
                break;
            }
            let partial = match self
                .call_provider(provider.as_ref(), symbol, Category::MarketData)
                .await
            {
                Ok(CategoryPayload {
                    data: CategoryData::Market(market),
                    ..
                }) => market,
                Ok(_) => continue,
                Err(err) => {
                    warn!(symbol, provider = %provider.id(), error = %err, "market fetch failed");
                    continue;
                }
            };

            let id = provider.id();
            let before = merged.clone();
            merge_field(&mut merged.price, partial.price, "price", id, &mut field_sources);
            merge_field(
                &mut merged.shares_outstanding,
                partial.shares_outstanding,
                "shares_outstanding",
                id,
                &mut field_sources,
            );
            merge_field(
                &mut merged.market_cap,
                partial.market_cap,
                "market_cap",
                id,
                &mut field_sources,
            );
            merge_field(&mut merged.beta, partial.beta, "beta", id, &mut field_sources);
            if merged.currency.is_none() {
                if let Some(currency) = partial.currency {
                    merged.currency = Some(currency);
                    field_sources.insert("currency".to_string(), id);
                }
            }
            if first_contributor.is_none() && merged != before {
                first_contributor = Some(id);
            }
        }

        let source = first_contributor?;
        Some(CategoryPayload {
            source,
            scale: crate::model::Scale::Units,
            data: CategoryData::Market(merged),
            field_sources,
        })
    }

    async fn call_provider(
        &self,
        provider: &dyn FinancialDataProvider,
        symbol: &str,
        category: Category,
    ) -> Result<CategoryPayload, FetchError> {
        let id = provider.id();
        retry::execute(&self.retry, || async move {
            self.limiters.acquire(id).await;
            provider.fetch(symbol, category).await
        })
        .await
    }
}

fn merge_field(
    slot: &mut Option<f64>,
    candidate: Option<f64>,
    name: &str,
    id: ProviderId,
    sources: &mut std::collections::BTreeMap<String, ProviderId>,
) {
    if slot.is_none() {
        if let Some(value) = candidate {
            *slot = Some(value);
            sources.insert(name.to_string(), id);
        }
    }
}
