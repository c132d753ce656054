//! Discounted cash flow valuation with a Gordon growth terminal value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ComputeError;
use crate::model::NormalizedFinancials;

/// Bounds on the starting growth rate inferred from history. Wildly negative
/// or euphoric histories otherwise dominate the valuation.
const GROWTH_FLOOR: f64 = -0.05;
const GROWTH_CEILING: f64 = 0.15;

/// Minimum gap between discount and terminal growth rate before the Gordon
/// denominator is considered degenerate.
const MIN_GORDON_SPREAD: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityRange {
    pub discount_rate_step: f64,
    pub growth_rate_step: f64,
    /// Cells on each side of the base assumption, per axis.
    pub steps: i32,
}

impl Default for SensitivityRange {
    fn default() -> Self {
        Self {
            discount_rate_step: 0.005,
            growth_rate_step: 0.0025,
            steps: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DcfAssumptions {
    pub discount_rate: f64,
    pub terminal_growth_rate: f64,
    pub projection_years: u32,
    pub sensitivity: SensitivityRange,
}

impl Default for DcfAssumptions {
    fn default() -> Self {
        Self {
            discount_rate: 0.09,
            terminal_growth_rate: 0.025,
            projection_years: 5,
            sensitivity: SensitivityRange::default(),
        }
    }
}

impl DcfAssumptions {
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(0.0..1.0).contains(&self.discount_rate) || self.discount_rate == 0.0 {
            return Err(ComputeError::InvalidAssumptions(format!(
                "discount rate {} outside (0, 1)",
                self.discount_rate
            )));
        }
        if self.projection_years < 1 {
            return Err(ComputeError::InvalidAssumptions(
                "projection horizon must cover at least one year".to_string(),
            ));
        }
        if self.terminal_growth_rate >= self.discount_rate {
            return Err(ComputeError::InvalidAssumptions(format!(
                "terminal growth {} must stay below the discount rate {}",
                self.terminal_growth_rate, self.discount_rate
            )));
        }
        let range = &self.sensitivity;
        if range.steps < 0 {
            return Err(ComputeError::InvalidAssumptions(format!(
                "sensitivity steps {} must not be negative",
                range.steps
            )));
        }
        if range.discount_rate_step <= 0.0 || range.growth_rate_step <= 0.0 {
            return Err(ComputeError::InvalidAssumptions(
                "sensitivity step sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DcfResult {
    pub intrinsic_value_per_share: f64,
    /// Relative to the current price, when one is known.
    pub upside: Option<f64>,
    pub discount_rate: f64,
    pub initial_growth_rate: f64,
    pub projected_free_cash_flows: Vec<f64>,
    pub terminal_value: f64,
    pub sensitivity: Vec<SensitivityCell>,
}

/// One re-run of the valuation under shifted assumptions.
#[derive(Debug, Clone, Serialize)]
pub struct SensitivityCell {
    pub discount_rate: f64,
    pub terminal_growth_rate: f64,
    pub intrinsic_value_per_share: f64,
}

/// Runs the valuation. Returns `None` when the inputs cannot support one:
/// non-positive starting free cash flow or an unusable share count. Invalid
/// assumptions are a caller error and are rejected before this is reached.
pub fn run(
    fin: &NormalizedFinancials,
    assumptions: &DcfAssumptions,
    growth_rates: &BTreeMap<String, f64>,
) -> Option<DcfResult> {
    let start_fcf = fin.latest_cash_flow().and_then(|y| y.free_cash_flow)?;
    if start_fcf <= 0.0 {
        debug!(symbol = fin.symbol, start_fcf, "non-positive free cash flow, skipping valuation");
        return None;
    }
    let shares = fin.market.shares_outstanding.filter(|s| *s > 0.0)?;

    let initial_growth = growth_rates
        .get("fcf_cagr")
        .or_else(|| growth_rates.get("revenue_cagr"))
        .or_else(|| growth_rates.get("revenue_yoy"))
        .copied()
        .unwrap_or(assumptions.terminal_growth_rate)
        .clamp(GROWTH_FLOOR, GROWTH_CEILING);

    let value = equity_value(
        start_fcf,
        initial_growth,
        assumptions.discount_rate,
        assumptions.terminal_growth_rate,
        assumptions.projection_years,
    )?;

    let intrinsic = value.total / shares;
    let upside = fin
        .market
        .price
        .filter(|p| *p > 0.0)
        .map(|p| (intrinsic - p) / p);

    let mut sensitivity = Vec::new();
    let range = &assumptions.sensitivity;
    for i in -range.steps..=range.steps {
        for j in -range.steps..=range.steps {
            let dr = assumptions.discount_rate + f64::from(i) * range.discount_rate_step;
            let tg = assumptions.terminal_growth_rate + f64::from(j) * range.growth_rate_step;
            if dr <= 0.0 || dr >= 1.0 || tg >= dr - MIN_GORDON_SPREAD {
                continue;
            }
            if let Some(cell) = equity_value(
                start_fcf,
                initial_growth,
                dr,
                tg,
                assumptions.projection_years,
            ) {
                sensitivity.push(SensitivityCell {
                    discount_rate: dr,
                    terminal_growth_rate: tg,
                    intrinsic_value_per_share: cell.total / shares,
                });
            }
        }
    }

    Some(DcfResult {
        intrinsic_value_per_share: intrinsic,
        upside,
        discount_rate: assumptions.discount_rate,
        initial_growth_rate: initial_growth,
        projected_free_cash_flows: value.projected,
        terminal_value: value.terminal_value,
        sensitivity,
    })
}

struct EquityValue {
    total: f64,
    projected: Vec<f64>,
    terminal_value: f64,
}

/// Projects cash flows and discounts them plus the terminal value. `None`
/// when the Gordon denominator is degenerate.
fn equity_value(
    start_fcf: f64,
    initial_growth: f64,
    discount_rate: f64,
    terminal_growth: f64,
    years: u32,
) -> Option<EquityValue> {
    if discount_rate - terminal_growth <= MIN_GORDON_SPREAD {
        return None;
    }

    let projected = project_fcf(start_fcf, initial_growth, terminal_growth, years);
    let last = *projected.last()?;
    let terminal_value = last * (1.0 + terminal_growth) / (discount_rate - terminal_growth);
    let total = present_value(&projected, terminal_value, discount_rate);

    Some(EquityValue {
        total,
        projected,
        terminal_value,
    })
}

/// Year-by-year projection with the growth rate falling linearly from
/// `initial` in year one toward `terminal` in the final year.
fn project_fcf(start_fcf: f64, initial: f64, terminal: f64, years: u32) -> Vec<f64> {
    let mut fcf = start_fcf;
    let mut projected = Vec::with_capacity(years as usize);
    for year in 0..years {
        let t = if years > 1 {
            f64::from(year) / f64::from(years - 1)
        } else {
            0.0
        };
        let growth = initial + (terminal - initial) * t;
        fcf *= 1.0 + growth;
        projected.push(fcf);
    }
    projected
}

/// Sum of discounted projected cash flows plus the discounted terminal
/// value, with the terminal value discounted at the final projection year.
pub(crate) fn present_value(projected: &[f64], terminal_value: f64, discount_rate: f64) -> f64 {
    let discounted: f64 = projected
        .iter()
        .enumerate()
        .map(|(i, fcf)| fcf / (1.0 + discount_rate).powi(i as i32 + 1))
        .sum();
    discounted + terminal_value / (1.0 + discount_rate).powi(projected.len() as i32)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::model::{CashFlowYear, MarketData};

    fn base_financials(fcf: f64) -> NormalizedFinancials {
        let mut fin =
            NormalizedFinancials::new("TEST", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        fin.cash_flow = vec![CashFlowYear {
            fiscal_year: 2025,
            free_cash_flow: Some(fcf),
            ..Default::default()
        }];
        fin.market = MarketData {
            price: Some(80.0),
            shares_outstanding: Some(1_000.0),
            market_cap: Some(80_000.0),
            beta: None,
            currency: Some("USD".to_string()),
        };
        fin
    }

    #[test]
    fn terminal_value_alone_discounts_correctly() {
        // With no projected years the present value is just the discounted
        // terminal value; with zero projected cash flows it reduces to
        // tv / (1 + r)^n.
        let pv = present_value(&[0.0, 0.0, 0.0], 1_000.0, 0.10);
        assert!((pv - 1_000.0 / 1.10_f64.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn base_cell_of_sensitivity_grid_matches_primary_value() {
        let fin = base_financials(10_000.0);
        let assumptions = DcfAssumptions::default();
        let result = run(&fin, &assumptions, &BTreeMap::new()).unwrap();

        let base = result
            .sensitivity
            .iter()
            .find(|cell| {
                cell.discount_rate == assumptions.discount_rate
                    && cell.terminal_growth_rate == assumptions.terminal_growth_rate
            })
            .expect("base cell present");
        assert_eq!(
            base.intrinsic_value_per_share,
            result.intrinsic_value_per_share
        );
        assert_eq!(result.sensitivity.len(), 25);
    }

    #[test]
    fn negative_fcf_skips_valuation() {
        let fin = base_financials(-5_000.0);
        assert!(run(&fin, &DcfAssumptions::default(), &BTreeMap::new()).is_none());
    }

    #[test]
    fn growth_is_clamped_to_bounds() {
        let fin = base_financials(10_000.0);
        let mut growth = BTreeMap::new();
        growth.insert("fcf_cagr".to_string(), 0.80);
        let result = run(&fin, &DcfAssumptions::default(), &growth).unwrap();
        assert_eq!(result.initial_growth_rate, GROWTH_CEILING);
    }

    #[test]
    fn terminal_growth_above_discount_rate_is_rejected() {
        let assumptions = DcfAssumptions {
            discount_rate: 0.05,
            terminal_growth_rate: 0.06,
            ..Default::default()
        };
        assert!(matches!(
            assumptions.validate(),
            Err(ComputeError::InvalidAssumptions(_))
        ));
    }

    #[test]
    fn negative_sensitivity_steps_are_rejected() {
        let assumptions = DcfAssumptions {
            sensitivity: SensitivityRange {
                steps: -1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            assumptions.validate(),
            Err(ComputeError::InvalidAssumptions(_))
        ));

        let assumptions = DcfAssumptions {
            sensitivity: SensitivityRange {
                discount_rate_step: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            assumptions.validate(),
            Err(ComputeError::InvalidAssumptions(_))
        ));
    }

    #[test]
    fn upside_is_relative_to_price() {
        let fin = base_financials(10_000.0);
        let result = run(&fin, &DcfAssumptions::default(), &BTreeMap::new()).unwrap();
        let expected = (result.intrinsic_value_per_share - 80.0) / 80.0;
        assert!((result.upside.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn projection_declines_linearly_toward_terminal_growth() {
        let projected = project_fcf(100.0, 0.10, 0.02, 5);
        assert_eq!(projected.len(), 5);
        // First year grows at the initial rate, last at the terminal rate.
        assert!((projected[0] - 110.0).abs() < 1e-9);
        let last_growth = projected[4] / projected[3] - 1.0;
        assert!((last_growth - 0.02).abs() < 1e-9);
    }
}
