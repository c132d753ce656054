//! Shared data shapes. Values a provider did not report stay `None`, never zero.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// External data sources, in no particular order. Priority is configured, not
/// implied by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Fmp,
    AlphaVantage,
    Finnhub,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderId::Fmp => "fmp",
            ProviderId::AlphaVantage => "alphavantage",
            ProviderId::Finnhub => "finnhub",
        };
        write!(f, "{name}")
    }
}

/// Data categories fetched and cached independently per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    IncomeStatement,
    BalanceSheet,
    CashFlow,
    MarketData,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::IncomeStatement,
        Category::BalanceSheet,
        Category::CashFlow,
        Category::MarketData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::IncomeStatement => "income_statement",
            Category::BalanceSheet => "balance_sheet",
            Category::CashFlow => "cash_flow",
            Category::MarketData => "market_data",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit scale monetary values were reported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Units,
    Thousands,
    Millions,
}

/// Where a successful fetch was satisfied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    CacheHit,
    Live,
}

/// One fiscal year of income statement data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeYear {
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub cost_of_revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_income: Option<f64>,
    pub interest_expense: Option<f64>,
    pub income_before_tax: Option<f64>,
    pub income_tax_expense: Option<f64>,
    pub net_income: Option<f64>,
    pub ebitda: Option<f64>,
    pub eps: Option<f64>,
}

/// One fiscal year of balance sheet data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceYear {
    pub fiscal_year: i32,
    pub total_assets: Option<f64>,
    pub total_current_assets: Option<f64>,
    pub cash_and_equivalents: Option<f64>,
    pub short_term_investments: Option<f64>,
    pub net_receivables: Option<f64>,
    pub inventory: Option<f64>,
    pub total_current_liabilities: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub total_debt: Option<f64>,
    pub retained_earnings: Option<f64>,
    pub total_equity: Option<f64>,
}

/// One fiscal year of cash flow statement data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowYear {
    pub fiscal_year: i32,
    pub operating_cash_flow: Option<f64>,
    pub capital_expenditure: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub dividends_paid: Option<f64>,
}

/// Point-in-time market data, merged field-wise across providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub price: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub market_cap: Option<f64>,
    pub beta: Option<f64>,
    pub currency: Option<String>,
}

impl MarketData {
    /// True when no provider remains worth asking.
    pub fn is_complete(&self) -> bool {
        self.price.is_some()
            && self.shares_outstanding.is_some()
            && self.market_cap.is_some()
            && self.beta.is_some()
            && self.currency.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.shares_outstanding.is_none()
            && self.market_cap.is_none()
            && self.beta.is_none()
            && self.currency.is_none()
    }
}

/// Per-category data as returned by one adapter (and as cached, after any
/// cross-provider merge). Serialization is lossless so that a cache round
/// trip reproduces the payload exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPayload {
    /// Highest-priority provider that contributed to this payload.
    pub source: ProviderId,
    pub scale: Scale,
    pub data: CategoryData,
    /// Field-level provenance; populated for market data, where several
    /// providers may each fill a subset of the fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_sources: BTreeMap<String, ProviderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryData {
    Income(Vec<IncomeYear>),
    Balance(Vec<BalanceYear>),
    CashFlow(Vec<CashFlowYear>),
    Market(MarketData),
}

impl CategoryData {
    pub fn is_empty(&self) -> bool {
        match self {
            CategoryData::Income(years) => years.is_empty(),
            CategoryData::Balance(years) => years.is_empty(),
            CategoryData::CashFlow(years) => years.is_empty(),
            CategoryData::Market(market) => market.is_empty(),
        }
    }
}

/// Canonical per-symbol record aggregated from all providers.
///
/// Years within each statement block are unique and sorted ascending by
/// fiscal year; the fetcher enforces this on merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFinancials {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub income: Vec<IncomeYear>,
    pub balance: Vec<BalanceYear>,
    pub cash_flow: Vec<CashFlowYear>,
    pub market: MarketData,
    pub income_scale: Scale,
    pub balance_scale: Scale,
    pub cash_flow_scale: Scale,
    /// Which provider satisfied each category.
    pub provenance: BTreeMap<Category, ProviderId>,
    /// Field-level provenance for market data.
    pub market_provenance: BTreeMap<String, ProviderId>,
    /// Categories no provider could satisfy. Soft absences only; mandatory
    /// fields abort the aggregation instead.
    pub missing: Vec<Category>,
}

impl NormalizedFinancials {
    pub fn new(symbol: &str, as_of: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            as_of,
            income: Vec::new(),
            balance: Vec::new(),
            cash_flow: Vec::new(),
            market: MarketData::default(),
            income_scale: Scale::Units,
            balance_scale: Scale::Units,
            cash_flow_scale: Scale::Units,
            provenance: BTreeMap::new(),
            market_provenance: BTreeMap::new(),
            missing: Vec::new(),
        }
    }

    /// Folds a fetched category payload into the record. Statement years are
    /// deduplicated by fiscal year and kept in ascending order.
    pub fn apply(&mut self, category: Category, payload: CategoryPayload) {
        match payload.data {
            CategoryData::Income(years) => {
                self.income = sort_years(years, |y| y.fiscal_year);
                self.income_scale = payload.scale;
            }
            CategoryData::Balance(years) => {
                self.balance = sort_years(years, |y| y.fiscal_year);
                self.balance_scale = payload.scale;
            }
            CategoryData::CashFlow(years) => {
                self.cash_flow = sort_years(years, |y| y.fiscal_year);
                self.cash_flow_scale = payload.scale;
            }
            CategoryData::Market(market) => {
                self.market = market;
                self.market_provenance = payload.field_sources.clone();
            }
        }
        self.provenance.insert(category, payload.source);
    }

    /// Latest fiscal year of each statement, when present.
    pub fn latest_income(&self) -> Option<&IncomeYear> {
        self.income.last()
    }

    pub fn latest_balance(&self) -> Option<&BalanceYear> {
        self.balance.last()
    }

    pub fn latest_cash_flow(&self) -> Option<&CashFlowYear> {
        self.cash_flow.last()
    }
}

fn sort_years<T, F>(mut years: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> i32,
{
    years.sort_by_key(|y| key(y));
    years.dedup_by_key(|y| key(y));
    years
}
