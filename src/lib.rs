pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod limiter;
pub mod log;
pub mod metrics;
pub mod model;
pub mod providers;
pub mod retry;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, DiskCache, MemoryCache};
use crate::config::{AppConfig, ProviderConfig};
use crate::fetcher::Fetcher;
use crate::metrics::MetricsReport;
use crate::model::{NormalizedFinancials, ProviderId};
use crate::providers::{
    FinancialDataProvider, alphavantage::AlphaVantageProvider, finnhub::FinnhubProvider,
    fmp::FmpProvider,
};

pub enum AppCommand {
    /// Fetch, aggregate and report on the given symbols (or the configured
    /// ones when empty).
    Analyze { symbols: Vec<String> },
}

#[derive(Serialize)]
struct SymbolAnalysis {
    financials: NormalizedFinancials,
    report: MetricsReport,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Analyze { symbols } => {
            let symbols = if symbols.is_empty() {
                config.symbols.clone()
            } else {
                symbols
            };
            if symbols.is_empty() {
                bail!("No symbols given and none configured");
            }
            analyze(&config, &symbols).await
        }
    }
}

async fn analyze(config: &AppConfig, symbols: &[String]) -> Result<()> {
    let cache = open_cache(config)?;
    let providers = build_providers(config)?;
    if providers.is_empty() {
        bail!("No providers configured; set at least one API key");
    }

    let fetcher = Fetcher::new(
        providers,
        cache,
        config.retry.policy(),
        config.cache.ttls(),
    );

    let results = join_all(
        symbols
            .iter()
            .map(|symbol| analyze_symbol(&fetcher, config, symbol)),
    )
    .await;

    let mut failures = 0;
    for (symbol, result) in symbols.iter().zip(results) {
        match result {
            Ok(json) => println!("{json}"),
            Err(err) => {
                failures += 1;
                tracing::error!(symbol, error = %err, "analysis failed");
            }
        }
    }
    if failures == symbols.len() {
        bail!("All {} symbol analyses failed", failures);
    }
    Ok(())
}

async fn analyze_symbol(fetcher: &Fetcher, config: &AppConfig, symbol: &str) -> Result<String> {
    info!(symbol, "Analyzing");
    let financials = fetcher
        .fetch_financials(symbol)
        .await
        .with_context(|| format!("Aggregation failed for {symbol}"))?;
    let report = metrics::compute(&financials, &config.dcf)
        .with_context(|| format!("Metrics computation failed for {symbol}"))?;
    let analysis = SymbolAnalysis { financials, report };
    serde_json::to_string_pretty(&analysis).context("Failed to serialize analysis")
}

/// Durable cache when the data directory is usable, in-memory otherwise.
/// Losing the cache only costs extra API calls.
fn open_cache(config: &AppConfig) -> Result<Arc<dyn CacheStore>> {
    let dir = match &config.cache.directory {
        Some(dir) => dir.clone(),
        None => AppConfig::default_data_path()?.join("cache"),
    };
    match DiskCache::open(&dir) {
        Ok(disk) => Ok(Arc::new(disk)),
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Disk cache unavailable, using memory");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

fn build_providers(config: &AppConfig) -> Result<Vec<Arc<dyn FinancialDataProvider>>> {
    let mut providers: Vec<Arc<dyn FinancialDataProvider>> = Vec::new();

    for (priority, id) in config.providers.priority.iter().enumerate() {
        let entry = match id {
            ProviderId::Fmp => &config.providers.fmp,
            ProviderId::AlphaVantage => &config.providers.alphavantage,
            ProviderId::Finnhub => &config.providers.finnhub,
        };
        let Some(ProviderConfig {
            base_url,
            api_key: Some(api_key),
        }) = entry
        else {
            debug!(provider = %id, "skipping provider without API key");
            continue;
        };
        let provider: Arc<dyn FinancialDataProvider> = match id {
            ProviderId::Fmp => Arc::new(FmpProvider::new(base_url, api_key, priority)?),
            ProviderId::AlphaVantage => {
                Arc::new(AlphaVantageProvider::new(base_url, api_key, priority)?)
            }
            ProviderId::Finnhub => Arc::new(FinnhubProvider::new(base_url, api_key, priority)?),
        };
        providers.push(provider);
    }

    Ok(providers)
}
