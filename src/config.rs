use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

use crate::fetcher::CacheTtls;
use crate::metrics::dcf::DcfAssumptions;
use crate::model::ProviderId;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub fmp: Option<ProviderConfig>,
    pub alphavantage: Option<ProviderConfig>,
    pub finnhub: Option<ProviderConfig>,
    /// Order in which providers are asked; earlier wins.
    pub priority: Vec<ProviderId>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            fmp: Some(ProviderConfig {
                base_url: "https://financialmodelingprep.com/api/v3".to_string(),
                api_key: None,
            }),
            alphavantage: Some(ProviderConfig {
                base_url: "https://www.alphavantage.co".to_string(),
                api_key: None,
            }),
            finnhub: Some(ProviderConfig {
                base_url: "https://finnhub.io/api/v1".to_string(),
                api_key: None,
            }),
            priority: vec![
                ProviderId::Fmp,
                ProviderId::AlphaVantage,
                ProviderId::Finnhub,
            ],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub market_ttl_minutes: u64,
    pub statements_ttl_hours: u64,
    /// Overrides the platform data directory; mainly for tests.
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            market_ttl_minutes: 15,
            statements_ttl_hours: 24,
            directory: None,
        }
    }
}

impl CacheConfig {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            market: Duration::from_secs(self.market_ttl_minutes * 60),
            statements: Duration::from_secs(self.statements_ttl_hours * 60 * 60),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub providers: ProvidersConfig,
    pub cache: CacheConfig,
    pub retry: RetrySettings,
    pub dcf: DcfAssumptions,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "finbrief", "finbrief")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "finbrief", "finbrief")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
symbols:
  - "AAPL"
  - "MSFT"
providers:
  fmp:
    base_url: "http://example.com/fmp"
    api_key: "secret"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.symbols, vec!["AAPL", "MSFT"]);
        let fmp = config.providers.fmp.expect("fmp config");
        assert_eq!(fmp.base_url, "http://example.com/fmp");
        assert_eq!(fmp.api_key, Some("secret".to_string()));
        // Unspecified sections fall back to defaults.
        assert_eq!(
            config.providers.priority,
            vec![ProviderId::Fmp, ProviderId::AlphaVantage, ProviderId::Finnhub]
        );
        assert_eq!(config.cache.market_ttl_minutes, 15);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.dcf.discount_rate, 0.09);
    }

    #[test]
    fn test_config_overrides() {
        let yaml_str = r#"
symbols: ["NVDA"]
providers:
  priority: ["finnhub", "fmp"]
cache:
  market_ttl_minutes: 1
  statements_ttl_hours: 6
retry:
  max_attempts: 5
  base_delay_ms: 100
  max_delay_ms: 1000
dcf:
  discount_rate: 0.10
  terminal_growth_rate: 0.02
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(
            config.providers.priority,
            vec![ProviderId::Finnhub, ProviderId::Fmp]
        );
        assert_eq!(config.cache.ttls().market, Duration::from_secs(60));
        assert_eq!(config.retry.policy().max_attempts, 5);
        assert_eq!(config.dcf.discount_rate, 0.10);
        assert_eq!(config.dcf.projection_years, 5);
    }
}
