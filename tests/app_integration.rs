use std::fs;
use std::sync::Arc;
use std::time::Duration;

use finbrief::cache::MemoryCache;
use finbrief::error::AggregateError;
use finbrief::fetcher::{CacheTtls, Fetcher};
use finbrief::model::{Category, CategoryData, FetchSource, ProviderId};
use finbrief::providers::FinancialDataProvider;
use finbrief::providers::alphavantage::AlphaVantageProvider;
use finbrief::providers::finnhub::FinnhubProvider;
use finbrief::providers::fmp::FmpProvider;
use finbrief::retry::RetryPolicy;

mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub const FMP_INCOME: &str = r#"[
        {"calendarYear": "2024", "revenue": 1210.0, "grossProfit": 500.0,
         "netIncome": 121.0, "eps": 1.21},
        {"calendarYear": "2023", "revenue": 1000.0, "grossProfit": 400.0,
         "netIncome": 100.0, "eps": 1.0}
    ]"#;

    pub const FMP_BALANCE: &str = r#"[
        {"calendarYear": "2024", "totalAssets": 2000.0,
         "totalCurrentAssets": 800.0, "totalCurrentLiabilities": 400.0,
         "totalDebt": 500.0, "totalStockholdersEquity": 1000.0}
    ]"#;

    pub const FMP_CASH_FLOW: &str = r#"[
        {"calendarYear": "2024", "operatingCashFlow": 150.0,
         "capitalExpenditure": -30.0, "freeCashFlow": 120.0}
    ]"#;

    pub const FMP_PROFILE: &str = r#"[
        {"price": 20.0, "sharesOutstanding": 100.0, "mktCap": 2000.0,
         "beta": 1.1, "currency": "USD"}
    ]"#;

    /// Mounts every endpoint a full aggregation of `symbol` touches,
    /// asserting that each is hit exactly `expected_hits` times.
    pub async fn mount_fmp(server: &MockServer, symbol: &str, expected_hits: u64) {
        for (endpoint, body) in [
            ("income-statement", FMP_INCOME),
            ("balance-sheet-statement", FMP_BALANCE),
            ("cash-flow-statement", FMP_CASH_FLOW),
            ("profile", FMP_PROFILE),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/{endpoint}/{symbol}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .expect(expected_hits)
                .mount(server)
                .await;
        }
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
    }
}

fn fetcher_with(providers: Vec<Arc<dyn FinancialDataProvider>>) -> Fetcher {
    Fetcher::new(
        providers,
        Arc::new(MemoryCache::new()),
        fast_retry(),
        CacheTtls::default(),
    )
}

#[test_log::test(tokio::test)]
async fn second_run_is_served_entirely_from_cache() {
    let server = wiremock::MockServer::start().await;
    test_utils::mount_fmp(&server, "AAPL", 1).await;

    let fmp: Arc<dyn FinancialDataProvider> =
        Arc::new(FmpProvider::new(&server.uri(), "k", 0).unwrap());
    let fetcher = fetcher_with(vec![fmp]);

    let first = fetcher.fetch_financials("AAPL").await.unwrap();
    let second = fetcher.fetch_financials("AAPL").await.unwrap();

    assert_eq!(first.income.len(), 2);
    assert_eq!(second.income, first.income);
    assert_eq!(second.provenance, first.provenance);
    // The per-endpoint `.expect(1)` guards verify no second round of calls.
}

#[test_log::test(tokio::test)]
async fn transient_server_errors_are_retried_to_success() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    let server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/income-statement/AAPL"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/income-statement/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_string(test_utils::FMP_INCOME))
        .mount(&server)
        .await;

    let fmp: Arc<dyn FinancialDataProvider> =
        Arc::new(FmpProvider::new(&server.uri(), "k", 0).unwrap());
    let fetcher = fetcher_with(vec![fmp]);

    let (payload, source) = fetcher
        .fetch_category("AAPL", Category::IncomeStatement)
        .await
        .expect("retries should recover from two 500s");
    assert_eq!(source, FetchSource::Live);
    let CategoryData::Income(years) = payload.data else {
        panic!("expected income data");
    };
    assert_eq!(years.len(), 2);
}

#[test_log::test(tokio::test)]
async fn rejected_key_falls_back_to_next_provider() {
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, ResponseTemplate};

    let fmp_server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&fmp_server)
        .await;

    let av_server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("function", "INCOME_STATEMENT"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"annualReports": [
                {"fiscalDateEnding": "2024-12-31", "totalRevenue": "1210",
                 "netIncome": "121"}
            ]}"#,
        ))
        .mount(&av_server)
        .await;

    let fmp: Arc<dyn FinancialDataProvider> =
        Arc::new(FmpProvider::new(&fmp_server.uri(), "bad", 0).unwrap());
    let av: Arc<dyn FinancialDataProvider> =
        Arc::new(AlphaVantageProvider::new(&av_server.uri(), "k", 1).unwrap());
    let fetcher = fetcher_with(vec![fmp, av]);

    let (payload, _) = fetcher
        .fetch_category("AAPL", Category::IncomeStatement)
        .await
        .expect("fallback provider should serve");
    assert_eq!(payload.source, ProviderId::AlphaVantage);
}

#[test_log::test(tokio::test)]
async fn unsourceable_price_aborts_the_symbol() {
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, ResponseTemplate};

    // Alpha Vantage's overview never carries a price, and no other provider
    // is configured to fill it in.
    let server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("function", "OVERVIEW"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"SharesOutstanding": "100", "MarketCapitalization": "2000",
                "Currency": "USD"}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"annualReports": []}"#),
        )
        .mount(&server)
        .await;

    let av: Arc<dyn FinancialDataProvider> =
        Arc::new(AlphaVantageProvider::new(&server.uri(), "k", 0).unwrap());
    let fetcher = fetcher_with(vec![av]);

    let err = fetcher.fetch_financials("AAPL").await.unwrap_err();
    assert_eq!(err, AggregateError::MissingMandatoryField("price"));
}

#[test_log::test(tokio::test)]
async fn market_fields_merge_across_real_adapters() {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    let av_server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("function", "OVERVIEW"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"SharesOutstanding": "100", "MarketCapitalization": "2000",
                "Beta": "1.1", "Currency": "USD"}"#,
        ))
        .mount(&av_server)
        .await;

    let finnhub_server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stock/profile2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"shareOutstanding": 0.0001, "marketCapitalization": 0.002,
                "currency": "USD"}"#,
        ))
        .mount(&finnhub_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"c": 20.0}"#))
        .mount(&finnhub_server)
        .await;

    let av: Arc<dyn FinancialDataProvider> =
        Arc::new(AlphaVantageProvider::new(&av_server.uri(), "k", 0).unwrap());
    let finnhub: Arc<dyn FinancialDataProvider> =
        Arc::new(FinnhubProvider::new(&finnhub_server.uri(), "k", 1).unwrap());
    let fetcher = fetcher_with(vec![av, finnhub]);

    let (payload, _) = fetcher
        .fetch_category("AAPL", Category::MarketData)
        .await
        .expect("merged market data");
    let CategoryData::Market(market) = &payload.data else {
        panic!("expected market data");
    };
    assert_eq!(market.price, Some(20.0));
    // Earlier provider's values win; the later one only fills the price.
    assert_eq!(market.shares_outstanding, Some(100.0));
    assert_eq!(payload.field_sources["price"], ProviderId::Finnhub);
    assert_eq!(
        payload.field_sources["shares_outstanding"],
        ProviderId::AlphaVantage
    );
}

#[test_log::test(tokio::test)]
async fn test_full_app_flow_with_mock() {
    let server = wiremock::MockServer::start().await;
    test_utils::mount_fmp(&server, "AAPL", 1).await;

    let cache_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    let config_content = format!(
        r#"
        symbols:
          - "AAPL"
        providers:
          fmp:
            base_url: "{}"
            api_key: "test-key"
          priority: ["fmp"]
        cache:
          directory: "{}"
        retry:
          base_delay_ms: 1
          max_delay_ms: 5
    "#,
        server.uri(),
        cache_dir.path().display()
    );
    fs::write(config_file.path(), &config_content).expect("Failed to write config file");

    let result = finbrief::run_command(
        finbrief::AppCommand::Analyze { symbols: vec![] },
        Some(config_file.path().to_str().unwrap()),
    )
    .await;
    assert!(
        result.is_ok(),
        "Main function failed with: {:?}",
        result.err()
    );
}
