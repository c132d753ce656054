//! Ratios and growth rates derived from an aggregated record.

pub mod dcf;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, prelude::*};
use serde::Serialize;

use crate::error::ComputeError;
use crate::model::{NormalizedFinancials, Scale};

pub use dcf::{DcfAssumptions, DcfResult, SensitivityRange};

/// Fallback when the effective tax rate is unavailable or implausible.
const DEFAULT_TAX_RATE: f64 = 0.21;

/// Denominators smaller than this are treated as zero.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub symbol: String,
    pub ratios: BTreeMap<String, f64>,
    pub growth_rates: BTreeMap<String, f64>,
    pub dcf: Option<DcfResult>,
    pub computed_at: DateTime<Utc>,
}

/// Computes the full report for one symbol.
pub fn compute(
    fin: &NormalizedFinancials,
    assumptions: &DcfAssumptions,
) -> Result<MetricsReport, ComputeError> {
    assumptions.validate()?;
    check_scales(fin)?;

    let ratios = compute_ratios(fin);
    let growth_rates = compute_growth_rates(fin);
    let dcf = dcf::run(fin, assumptions, &growth_rates);

    Ok(MetricsReport {
        symbol: fin.symbol.clone(),
        ratios,
        growth_rates,
        dcf,
        computed_at: Utc::now(),
    })
}

/// Statements that are present must agree on their unit scale; mixing
/// thousands with units would silently corrupt every cross-statement ratio.
fn check_scales(fin: &NormalizedFinancials) -> Result<(), ComputeError> {
    let mut present: Vec<(&'static str, Scale)> = Vec::new();
    if !fin.income.is_empty() {
        present.push(("income statement", fin.income_scale));
    }
    if !fin.balance.is_empty() {
        present.push(("balance sheet", fin.balance_scale));
    }
    if !fin.cash_flow.is_empty() {
        present.push(("cash flow statement", fin.cash_flow_scale));
    }

    for pair in present.windows(2) {
        let (left, left_scale) = pair[0];
        let (right, right_scale) = pair[1];
        if left_scale != right_scale {
            return Err(ComputeError::UnitMismatch {
                left,
                left_scale,
                right,
                right_scale,
            });
        }
    }
    Ok(())
}

/// `num / den`, absent when either side is absent or the denominator is
/// effectively zero.
fn ratio(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    let num = num?;
    let den = den?;
    if den.abs() < EPSILON {
        return None;
    }
    Some(num / den)
}

fn insert(map: &mut BTreeMap<String, f64>, name: &str, value: Option<f64>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        map.insert(name.to_string(), v);
    }
}

fn compute_ratios(fin: &NormalizedFinancials) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let income = fin.latest_income();
    let balance = fin.latest_balance();
    let cash = fin.latest_cash_flow();
    let market = &fin.market;

    let revenue = income.and_then(|y| y.revenue);
    let net_income = income.and_then(|y| y.net_income);
    let ebitda = income.and_then(|y| y.ebitda);
    let eps = income.and_then(|y| y.eps);
    let total_assets = balance.and_then(|y| y.total_assets);
    let current_assets = balance.and_then(|y| y.total_current_assets);
    let current_liabilities = balance.and_then(|y| y.total_current_liabilities);
    let equity = balance.and_then(|y| y.total_equity);
    let total_debt = balance.and_then(|y| y.total_debt);
    let inventory = balance.and_then(|y| y.inventory);
    let receivables = balance.and_then(|y| y.net_receivables);
    let cash_eq = balance.and_then(|y| y.cash_and_equivalents);
    let ocf = cash.and_then(|y| y.operating_cash_flow);
    let fcf = cash.and_then(|y| y.free_cash_flow);
    let capex = cash.and_then(|y| y.capital_expenditure);
    let dividends = cash.and_then(|y| y.dividends_paid).map(f64::abs);
    let shares = market.shares_outstanding;
    let price = market.price;
    let market_cap = market.market_cap;

    // Liquidity.
    insert(&mut out, "current_ratio", ratio(current_assets, current_liabilities));
    let quick_assets = match (current_assets, inventory) {
        (Some(ca), Some(inv)) => Some(ca - inv),
        (Some(ca), None) => Some(ca),
        _ => None,
    };
    insert(&mut out, "quick_ratio", ratio(quick_assets, current_liabilities));
    let liquid = match (cash_eq, balance.and_then(|y| y.short_term_investments)) {
        (None, None) => None,
        (c, s) => Some(c.unwrap_or(0.0) + s.unwrap_or(0.0)),
    };
    insert(&mut out, "cash_ratio", ratio(liquid, current_liabilities));
    insert(&mut out, "ocf_to_current_liabilities", ratio(ocf, current_liabilities));

    // Leverage.
    insert(&mut out, "debt_to_equity", ratio(total_debt, equity));
    insert(&mut out, "debt_to_assets", ratio(total_debt, total_assets));
    insert(&mut out, "debt_to_ebitda", ratio(total_debt, ebitda));
    let interest = income.and_then(|y| y.interest_expense).map(f64::abs);
    insert(
        &mut out,
        "interest_coverage",
        ratio(income.and_then(|y| y.operating_income), interest),
    );
    insert(&mut out, "equity_multiplier", ratio(total_assets, equity));

    // Margins.
    insert(&mut out, "gross_margin", ratio(income.and_then(|y| y.gross_profit), revenue));
    insert(
        &mut out,
        "operating_margin",
        ratio(income.and_then(|y| y.operating_income), revenue),
    );
    insert(&mut out, "net_margin", ratio(net_income, revenue));
    insert(&mut out, "ebitda_margin", ratio(ebitda, revenue));
    insert(
        &mut out,
        "pretax_margin",
        ratio(income.and_then(|y| y.income_before_tax), revenue),
    );

    // Returns.
    insert(&mut out, "roe", ratio(net_income, equity));
    insert(&mut out, "roa", ratio(net_income, total_assets));
    let tax_rate = ratio(
        income.and_then(|y| y.income_tax_expense),
        income.and_then(|y| y.income_before_tax),
    );
    insert(&mut out, "effective_tax_rate", tax_rate);
    let effective_tax = tax_rate
        .filter(|t| (0.0..=0.50).contains(t))
        .unwrap_or(DEFAULT_TAX_RATE);
    let nopat = income
        .and_then(|y| y.operating_income)
        .map(|oi| oi * (1.0 - effective_tax));
    let invested_capital = match (total_debt, equity) {
        (Some(d), Some(e)) => Some(d + e),
        _ => None,
    };
    insert(&mut out, "roic", ratio(nopat, invested_capital));

    // Efficiency.
    insert(&mut out, "asset_turnover", ratio(revenue, total_assets));
    let receivables_turnover = ratio(revenue, receivables);
    insert(&mut out, "receivables_turnover", receivables_turnover);
    insert(
        &mut out,
        "days_sales_outstanding",
        receivables_turnover.map(|t| 365.0 / t),
    );
    let inventory_turnover = ratio(income.and_then(|y| y.cost_of_revenue), inventory);
    insert(&mut out, "inventory_turnover", inventory_turnover);
    insert(
        &mut out,
        "days_inventory_on_hand",
        inventory_turnover.map(|t| 365.0 / t),
    );

    // Per-share and valuation.
    insert(&mut out, "revenue_per_share", ratio(revenue, shares));
    insert(&mut out, "book_value_per_share", ratio(equity, shares));
    let fcf_per_share = ratio(fcf, shares);
    insert(&mut out, "fcf_per_share", fcf_per_share);
    insert(&mut out, "pe", ratio(price, eps.or(ratio(net_income, shares))));
    insert(&mut out, "pb", ratio(market_cap, equity));
    insert(&mut out, "ps", ratio(market_cap, revenue));
    insert(&mut out, "earnings_yield", ratio(net_income, market_cap));
    insert(&mut out, "fcf_yield", ratio(fcf, market_cap));
    // Enterprise value approximated as market cap plus net debt.
    let enterprise_value = match (market_cap, total_debt, cash_eq) {
        (Some(mc), d, c) => Some(mc + d.unwrap_or(0.0) - c.unwrap_or(0.0)),
        _ => None,
    };
    insert(&mut out, "ev_to_sales", ratio(enterprise_value, revenue));
    insert(&mut out, "ev_to_ebitda", ratio(enterprise_value, ebitda));

    // Cash flow quality.
    insert(&mut out, "ocf_margin", ratio(ocf, revenue));
    insert(&mut out, "capex_to_revenue", ratio(capex.map(f64::abs), revenue));
    insert(&mut out, "capex_to_ocf", ratio(capex.map(f64::abs), ocf));
    insert(&mut out, "dividend_payout_ratio", ratio(dividends, net_income));
    insert(&mut out, "dividend_yield", ratio(dividends, market_cap));

    out
}

/// Year-over-year change plus CAGRs over the trailing run of usable values.
fn compute_growth_rates(fin: &NormalizedFinancials) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();

    let series: [(&str, Vec<(i32, Option<f64>)>); 4] = [
        (
            "revenue",
            fin.income.iter().map(|y| (y.fiscal_year, y.revenue)).collect(),
        ),
        (
            "net_income",
            fin.income.iter().map(|y| (y.fiscal_year, y.net_income)).collect(),
        ),
        ("eps", fin.income.iter().map(|y| (y.fiscal_year, y.eps)).collect()),
        (
            "fcf",
            fin.cash_flow
                .iter()
                .map(|y| (y.fiscal_year, y.free_cash_flow))
                .collect(),
        ),
    ];

    for (name, values) in series {
        let run = trailing_run(&values);
        if run.len() >= 2 {
            let latest = run[run.len() - 1];
            let prior = run[run.len() - 2];
            insert(&mut out, &format!("{name}_yoy"), Some(latest / prior - 1.0));
            insert(&mut out, &format!("{name}_cagr"), cagr(&run));
        }
        if matches!(name, "revenue" | "eps") {
            if run.len() >= 4 {
                insert(&mut out, &format!("{name}_cagr_3y"), cagr(&run[run.len() - 4..]));
            }
            if run.len() >= 6 {
                insert(&mut out, &format!("{name}_cagr_5y"), cagr(&run[run.len() - 6..]));
            }
        }
    }

    out
}

/// Longest trailing run of positive values over consecutive fiscal years.
/// Growth rates over sign flips or gaps in the history are meaningless.
fn trailing_run(values: &[(i32, Option<f64>)]) -> Vec<f64> {
    let mut run: Vec<f64> = Vec::new();
    let mut prev_year: Option<i32> = None;
    for &(year, value) in values.iter().rev() {
        let Some(value) = value.filter(|v| *v > 0.0) else {
            break;
        };
        if let Some(prev) = prev_year {
            if year != prev - 1 {
                break;
            }
        }
        run.push(value);
        prev_year = Some(year);
    }
    run.reverse();
    run
}

/// Compound annual growth over the whole slice; `run[0]` is the oldest value.
fn cagr(run: &[f64]) -> Option<f64> {
    if run.len() < 2 {
        return None;
    }
    let first = *run.first()?;
    let last = *run.last()?;
    if first <= 0.0 {
        return None;
    }
    let begin_bal = Decimal::from_f64(first)?;
    let end_bal = Decimal::from_f64(last)?;
    let n_years = Decimal::from_usize(run.len() - 1)?;
    rust_finprim::rate::cagr(begin_bal, end_bal, n_years).to_f64()
}
