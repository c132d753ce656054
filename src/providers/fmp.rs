//! Financial Modeling Prep adapter. Serves all four categories.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{FetchError, FetchErrorKind};
use crate::limiter::RateLimitHint;
use crate::model::{
    BalanceYear, CashFlowYear, Category, CategoryData, CategoryPayload, IncomeYear, MarketData,
    ProviderId, Scale,
};
use crate::providers::{DEFAULT_REQUEST_TIMEOUT, FinancialDataProvider, build_http_client, get_json};

const ANNUAL_YEARS_LIMIT: u32 = 10;

pub struct FmpProvider {
    base_url: String,
    api_key: String,
    priority: usize,
    client: reqwest::Client,
}

impl FmpProvider {
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

    async fn fetch_statement<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        symbol: &str,
    ) -> Result<Vec<T>, FetchError> {
        let url = format!("{}/{}/{}", self.base_url, endpoint, symbol);
        let limit = ANNUAL_YEARS_LIMIT.to_string();
        get_json(
            &self.client,
            &url,
            &[
                ("period", "annual"),
                ("limit", limit.as_str()),
                ("apikey", self.api_key.as_str()),
            ],
            &format!("fmp {endpoint} for {symbol}"),
        )
        .await
    }
}

fn fiscal_year(calendar_year: Option<&str>, date: Option<&str>) -> Option<i32> {
    calendar_year
        .and_then(|y| y.parse().ok())
        .or_else(|| date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpIncomeRow {
    date: Option<String>,
    calendar_year: Option<String>,
    revenue: Option<f64>,
    cost_of_revenue: Option<f64>,
    gross_profit: Option<f64>,
    operating_income: Option<f64>,
    interest_expense: Option<f64>,
    income_before_tax: Option<f64>,
    income_tax_expense: Option<f64>,
    net_income: Option<f64>,
    ebitda: Option<f64>,
    eps: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpBalanceRow {
    date: Option<String>,
    calendar_year: Option<String>,
    total_assets: Option<f64>,
    total_current_assets: Option<f64>,
    cash_and_cash_equivalents: Option<f64>,
    short_term_investments: Option<f64>,
    net_receivables: Option<f64>,
    inventory: Option<f64>,
    total_current_liabilities: Option<f64>,
    total_liabilities: Option<f64>,
    total_debt: Option<f64>,
    retained_earnings: Option<f64>,
    total_stockholders_equity: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpCashFlowRow {
    date: Option<String>,
    calendar_year: Option<String>,
    operating_cash_flow: Option<f64>,
    capital_expenditure: Option<f64>,
    free_cash_flow: Option<f64>,
    dividends_paid: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpProfile {
    price: Option<f64>,
    shares_outstanding: Option<f64>,
    mkt_cap: Option<f64>,
    beta: Option<f64>,
    currency: Option<String>,
}

#[async_trait]
impl FinancialDataProvider for FmpProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Fmp
    }

    fn priority(&self) -> usize {
        self.priority
    }

    fn rate_limit(&self) -> RateLimitHint {
        RateLimitHint::per_minute(250)
    }

    async fn fetch(
        &self,
        symbol: &str,
        category: Category,
    ) -> Result<CategoryPayload, FetchError> {
        let data = match category {
            Category::IncomeStatement => {
                let rows: Vec<FmpIncomeRow> =
                    self.fetch_statement("income-statement", symbol).await?;
                CategoryData::Income(
                    rows.into_iter()
                        .filter_map(|r| {
                            let year =
                                fiscal_year(r.calendar_year.as_deref(), r.date.as_deref())?;
                            Some(IncomeYear {
                                fiscal_year: year,
                                revenue: r.revenue,
                                cost_of_revenue: r.cost_of_revenue,
                                gross_profit: r.gross_profit,
                                operating_income: r.operating_income,
                                interest_expense: r.interest_expense,
                                income_before_tax: r.income_before_tax,
                                income_tax_expense: r.income_tax_expense,
                                net_income: r.net_income,
                                ebitda: r.ebitda,
                                eps: r.eps,
                            })
                        })
                        .collect(),
                )
            }
            Category::BalanceSheet => {
                let rows: Vec<FmpBalanceRow> = self
                    .fetch_statement("balance-sheet-statement", symbol)
                    .await?;
                CategoryData::Balance(
                    rows.into_iter()
                        .filter_map(|r| {
                            let year =
                                fiscal_year(r.calendar_year.as_deref(), r.date.as_deref())?;
                            Some(BalanceYear {
                                fiscal_year: year,
                                total_assets: r.total_assets,
                                total_current_assets: r.total_current_assets,
                                cash_and_equivalents: r.cash_and_cash_equivalents,
                                short_term_investments: r.short_term_investments,
                                net_receivables: r.net_receivables,
                                inventory: r.inventory,
                                total_current_liabilities: r.total_current_liabilities,
                                total_liabilities: r.total_liabilities,
                                total_debt: r.total_debt,
                                retained_earnings: r.retained_earnings,
                                total_equity: r.total_stockholders_equity,
                            })
                        })
                        .collect(),
                )
            }
            Category::CashFlow => {
                let rows: Vec<FmpCashFlowRow> = self
                    .fetch_statement("cash-flow-statement", symbol)
                    .await?;
                CategoryData::CashFlow(
                    rows.into_iter()
                        .filter_map(|r| {
                            let year =
                                fiscal_year(r.calendar_year.as_deref(), r.date.as_deref())?;
                            Some(CashFlowYear {
                                fiscal_year: year,
                                operating_cash_flow: r.operating_cash_flow,
                                capital_expenditure: r.capital_expenditure,
                                free_cash_flow: r.free_cash_flow,
                                dividends_paid: r.dividends_paid,
                            })
                        })
                        .collect(),
                )
            }
            Category::MarketData => {
                let url = format!("{}/profile/{}", self.base_url, symbol);
                let profiles: Vec<FmpProfile> = get_json(
                    &self.client,
                    &url,
                    &[("apikey", self.api_key.as_str())],
                    &format!("fmp profile for {symbol}"),
                )
                .await?;
                let profile = profiles.into_iter().next().ok_or_else(|| {
                    FetchError::permanent(FetchErrorKind::NotFound(format!(
                        "no profile data for {symbol}"
                    )))
                })?;
                CategoryData::Market(MarketData {
                    price: profile.price,
                    shares_outstanding: profile.shares_outstanding,
                    market_cap: profile.mkt_cap,
                    beta: profile.beta,
                    currency: profile.currency,
                })
            }
        };

        Ok(CategoryPayload {
            source: ProviderId::Fmp,
            scale: Scale::Units,
            data,
            field_sources: BTreeMap::new(),
        })
    }
}
