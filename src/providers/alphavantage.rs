//! Alpha Vantage adapter. Reports all numbers as strings, "None" for absent.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{FetchError, FetchErrorKind};
use crate::limiter::RateLimitHint;
use crate::model::{
    BalanceYear, CashFlowYear, Category, CategoryData, CategoryPayload, IncomeYear, MarketData,
    ProviderId, Scale,
};
use crate::providers::{DEFAULT_REQUEST_TIMEOUT, FinancialDataProvider, build_http_client, get_json};

pub struct AlphaVantageProvider {
    base_url: String,
    api_key: String,
    priority: usize,
    client: reqwest::Client,
}

impl AlphaVantageProvider {
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

    async fn query<T: DeserializeOwned>(
        &self,
        function: &str,
        symbol: &str,
    ) -> Result<T, FetchError> {
        let url = format!("{}/query", self.base_url);
        get_json(
            &self.client,
            &url,
            &[
                ("function", function),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ],
            &format!("alphavantage {function} for {symbol}"),
        )
        .await
    }

    async fn statement_reports<T: DeserializeOwned>(
        &self,
        function: &str,
        symbol: &str,
    ) -> Result<Vec<T>, FetchError> {
        let response: AvStatementResponse<T> = self.query(function, symbol).await?;
        response.check_throttle()?;
        response.annual_reports.ok_or_else(|| {
            FetchError::permanent(FetchErrorKind::Malformed(format!(
                "alphavantage {function}: annualReports missing for {symbol}"
            )))
        })
    }
}

/// Parses Alpha Vantage's string-encoded numbers; "None" and "-" mark absent
/// values.
fn av_num(value: Option<&str>) -> Option<f64> {
    let value = value?.trim();
    if value.is_empty() || value == "None" || value == "-" {
        return None;
    }
    value.parse().ok()
}

fn av_fiscal_year(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

#[derive(Debug, Deserialize)]
struct AvStatementResponse<T> {
    #[serde(rename = "annualReports")]
    annual_reports: Option<Vec<T>>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

impl<T> AvStatementResponse<T> {
    fn check_throttle(&self) -> Result<(), FetchError> {
        if self.note.is_some() || self.information.is_some() {
            return Err(FetchError::transient(FetchErrorKind::RateLimited));
        }
        if let Some(message) = &self.error_message {
            return Err(FetchError::permanent(FetchErrorKind::NotFound(
                message.clone(),
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AvIncomeRow {
    #[serde(rename = "fiscalDateEnding")]
    fiscal_date_ending: Option<String>,
    #[serde(rename = "totalRevenue")]
    total_revenue: Option<String>,
    #[serde(rename = "costOfRevenue")]
    cost_of_revenue: Option<String>,
    #[serde(rename = "grossProfit")]
    gross_profit: Option<String>,
    #[serde(rename = "operatingIncome")]
    operating_income: Option<String>,
    #[serde(rename = "interestExpense")]
    interest_expense: Option<String>,
    #[serde(rename = "incomeBeforeTax")]
    income_before_tax: Option<String>,
    #[serde(rename = "incomeTaxExpense")]
    income_tax_expense: Option<String>,
    #[serde(rename = "netIncome")]
    net_income: Option<String>,
    ebitda: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvBalanceRow {
    #[serde(rename = "fiscalDateEnding")]
    fiscal_date_ending: Option<String>,
    #[serde(rename = "totalAssets")]
    total_assets: Option<String>,
    #[serde(rename = "totalCurrentAssets")]
    total_current_assets: Option<String>,
    #[serde(rename = "cashAndCashEquivalentsAtCarryingValue")]
    cash_and_equivalents: Option<String>,
    #[serde(rename = "shortTermInvestments")]
    short_term_investments: Option<String>,
    #[serde(rename = "currentNetReceivables")]
    net_receivables: Option<String>,
    inventory: Option<String>,
    #[serde(rename = "totalCurrentLiabilities")]
    total_current_liabilities: Option<String>,
    #[serde(rename = "totalLiabilities")]
    total_liabilities: Option<String>,
    #[serde(rename = "shortTermDebt")]
    short_term_debt: Option<String>,
    #[serde(rename = "longTermDebt")]
    long_term_debt: Option<String>,
    #[serde(rename = "retainedEarnings")]
    retained_earnings: Option<String>,
    #[serde(rename = "totalShareholderEquity")]
    total_equity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvCashFlowRow {
    #[serde(rename = "fiscalDateEnding")]
    fiscal_date_ending: Option<String>,
    #[serde(rename = "operatingCashflow")]
    operating_cash_flow: Option<String>,
    #[serde(rename = "capitalExpenditures")]
    capital_expenditures: Option<String>,
    #[serde(rename = "dividendPayout")]
    dividend_payout: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvOverview {
    #[serde(rename = "SharesOutstanding")]
    shares_outstanding: Option<String>,
    #[serde(rename = "Beta")]
    beta: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_cap: Option<String>,
    #[serde(rename = "Currency")]
    currency: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

/// Sum of short- and long-term debt; absent only when both parts are absent.
fn total_debt(short: Option<f64>, long: Option<f64>) -> Option<f64> {
    match (short, long) {
        (None, None) => None,
        (s, l) => Some(s.unwrap_or(0.0) + l.unwrap_or(0.0)),
    }
}

#[async_trait]
impl FinancialDataProvider for AlphaVantageProvider {
    fn id(&self) -> ProviderId {
        ProviderId::AlphaVantage
    }

    fn priority(&self) -> usize {
        self.priority
    }

    fn rate_limit(&self) -> RateLimitHint {
        // The free tier is severely constrained; stay well inside it.
        RateLimitHint::per_minute(5)
    }

    async fn fetch(
        &self,
        symbol: &str,
        category: Category,
    ) -> Result<CategoryPayload, FetchError> {
        let data = match category {
            Category::IncomeStatement => {
                let rows: Vec<AvIncomeRow> =
                    self.statement_reports("INCOME_STATEMENT", symbol).await?;
                CategoryData::Income(
                    rows.into_iter()
                        .filter_map(|r| {
                            let year = av_fiscal_year(r.fiscal_date_ending.as_deref())?;
                            Some(IncomeYear {
                                fiscal_year: year,
                                revenue: av_num(r.total_revenue.as_deref()),
                                cost_of_revenue: av_num(r.cost_of_revenue.as_deref()),
                                gross_profit: av_num(r.gross_profit.as_deref()),
                                operating_income: av_num(r.operating_income.as_deref()),
                                interest_expense: av_num(r.interest_expense.as_deref()),
                                income_before_tax: av_num(r.income_before_tax.as_deref()),
                                income_tax_expense: av_num(r.income_tax_expense.as_deref()),
                                net_income: av_num(r.net_income.as_deref()),
                                ebitda: av_num(r.ebitda.as_deref()),
                                eps: None,
                            })
                        })
                        .collect(),
                )
            }
            Category::BalanceSheet => {
                let rows: Vec<AvBalanceRow> =
                    self.statement_reports("BALANCE_SHEET", symbol).await?;
                CategoryData::Balance(
                    rows.into_iter()
                        .filter_map(|r| {
                            let year = av_fiscal_year(r.fiscal_date_ending.as_deref())?;
                            Some(BalanceYear {
                                fiscal_year: year,
                                total_assets: av_num(r.total_assets.as_deref()),
                                total_current_assets: av_num(r.total_current_assets.as_deref()),
                                cash_and_equivalents: av_num(r.cash_and_equivalents.as_deref()),
                                short_term_investments: av_num(
                                    r.short_term_investments.as_deref(),
                                ),
                                net_receivables: av_num(r.net_receivables.as_deref()),
                                inventory: av_num(r.inventory.as_deref()),
                                total_current_liabilities: av_num(
                                    r.total_current_liabilities.as_deref(),
                                ),
                                total_liabilities: av_num(r.total_liabilities.as_deref()),
                                total_debt: total_debt(
                                    av_num(r.short_term_debt.as_deref()),
                                    av_num(r.long_term_debt.as_deref()),
                                ),
                                retained_earnings: av_num(r.retained_earnings.as_deref()),
                                total_equity: av_num(r.total_equity.as_deref()),
                            })
                        })
                        .collect(),
                )
            }
            Category::CashFlow => {
                let rows: Vec<AvCashFlowRow> = self.statement_reports("CASH_FLOW", symbol).await?;
                CategoryData::CashFlow(
                    rows.into_iter()
                        .filter_map(|r| {
                            let year = av_fiscal_year(r.fiscal_date_ending.as_deref())?;
                            let ocf = av_num(r.operating_cash_flow.as_deref());
                            let capex = av_num(r.capital_expenditures.as_deref());
                            // AV does not report FCF directly.
                            let fcf = match (ocf, capex) {
                                (Some(o), Some(c)) => Some(o - c),
                                _ => None,
                            };
                            Some(CashFlowYear {
                                fiscal_year: year,
                                operating_cash_flow: ocf,
                                capital_expenditure: capex,
                                free_cash_flow: fcf,
                                dividends_paid: av_num(r.dividend_payout.as_deref()),
                            })
                        })
                        .collect(),
                )
            }
            Category::MarketData => {
                let overview: AvOverview = self.query("OVERVIEW", symbol).await?;
                if overview.note.is_some() || overview.information.is_some() {
                    return Err(FetchError::transient(FetchErrorKind::RateLimited));
                }
                let market = MarketData {
                    price: None,
                    shares_outstanding: av_num(overview.shares_outstanding.as_deref()),
                    market_cap: av_num(overview.market_cap.as_deref()),
                    beta: av_num(overview.beta.as_deref()),
                    currency: overview.currency,
                };
                if market.is_empty() {
                    return Err(FetchError::permanent(FetchErrorKind::NotFound(format!(
                        "no overview data for {symbol}"
                    ))));
                }
                CategoryData::Market(market)
            }
        };

        Ok(CategoryPayload {
            source: ProviderId::AlphaVantage,
            scale: Scale::Units,
            data,
            field_sources: BTreeMap::new(),
        })
    }
}
