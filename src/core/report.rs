use serde::Serialize;
use tracing::info;

use super::engine::{CancelFlag, percentile, simulate_cancellable};
use super::error::SimulationError;
use super::market::{MarketPathSet, generate_market_paths};
use super::solver::{binomial_ci_half_width, solve_cancellable};
use super::types::{SimulationConfig, WithdrawalMode};

/// Reference success probabilities reported next to the requested one.
pub const RISK_PROFILE_TARGETS: [f64; 2] = [0.90, 0.99];

const MONTHS_PER_YEAR: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    pub target_success: f64,
    pub withdrawal_rate: f64,
    pub annual_withdrawal: f64,
    pub monthly_withdrawal: f64,
}

impl RiskProfile {
    fn new(target_success: f64, withdrawal_rate: f64, total_capital: f64) -> Self {
        let annual_withdrawal = total_capital * withdrawal_rate;
        Self {
            target_success,
            withdrawal_rate,
            annual_withdrawal,
            monthly_withdrawal: annual_withdrawal / MONTHS_PER_YEAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WealthSummary {
    pub median: f64,
    /// Wealth at the first percentile of paths.
    pub worst_case: f64,
    pub p10: f64,
    pub p90: f64,
}

impl WealthSummary {
    pub fn from_wealths(wealths: &[f64]) -> Self {
        let mut sorted = wealths.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let at = |q: f64| {
            sorted
                .get((sorted.len() as f64 * q).floor() as usize)
                .copied()
                .unwrap_or(0.0)
        };
        let median = at(0.5);
        let worst_case = at(0.01);
        Self {
            median,
            worst_case,
            p10: percentile(&mut sorted, 10.0),
            p90: percentile(&mut sorted, 90.0),
        }
    }
}

/// Outcome of a full planning run: the configured spend simulated as-is plus
/// the safe withdrawal rates the same market paths support.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub success_rate: f64,
    pub success_ci_half_width: f64,
    pub planned_withdrawal_rate: f64,
    pub safe: RiskProfile,
    pub required_capital: f64,
    /// Negative when current capital exceeds what the safe rate requires.
    pub capital_shortfall: f64,
    pub risk_profiles: Vec<RiskProfile>,
    pub wealth: WealthSummary,
    pub wealths: Vec<f64>,
}

pub fn build_plan_report(
    config: &SimulationConfig,
    paths: &MarketPathSet,
    target_success: f64,
) -> PlanReport {
    let cancel = CancelFlag::new();
    build_plan_report_cancellable(config, paths, target_success, &cancel)
        .unwrap_or_else(|_| degenerate_report(config, target_success))
}

pub fn build_plan_report_cancellable(
    config: &SimulationConfig,
    paths: &MarketPathSet,
    target_success: f64,
    cancel: &CancelFlag,
) -> Result<PlanReport, SimulationError> {
    let total_capital = config.total_capital();

    let swr = solve_cancellable(target_success, paths, config, cancel)?.rate;
    let result = simulate_cancellable(WithdrawalMode::TargetExpense, paths, config, cancel)?;

    let mut risk_profiles = Vec::with_capacity(RISK_PROFILE_TARGETS.len());
    for target in RISK_PROFILE_TARGETS {
        let rate = solve_cancellable(target, paths, config, cancel)?.rate;
        risk_profiles.push(RiskProfile::new(target, rate, total_capital));
    }

    let required_capital = config.target_annual_expense / swr;
    let report = PlanReport {
        success_rate: result.success_rate,
        success_ci_half_width: binomial_ci_half_width(result.success_rate, config.num_sims),
        planned_withdrawal_rate: planned_rate(config),
        safe: RiskProfile::new(target_success, swr, total_capital),
        required_capital,
        capital_shortfall: required_capital - total_capital,
        risk_profiles,
        wealth: WealthSummary::from_wealths(&result.wealths),
        wealths: result.wealths,
    };

    info!(
        success_rate = report.success_rate,
        safe_rate = swr,
        required_capital,
        median_wealth = report.wealth.median,
        "plan report ready"
    );
    Ok(report)
}

/// Generates fresh market paths for `config` and reports on them.
pub fn run_plan(
    config: &SimulationConfig,
    target_success: f64,
    cancel: &CancelFlag,
) -> Result<PlanReport, SimulationError> {
    let paths = generate_market_paths(config.num_sims, config.years, config);
    if cancel.is_cancelled() {
        return Err(SimulationError::Cancelled);
    }
    build_plan_report_cancellable(config, &paths, target_success, cancel)
}

fn planned_rate(config: &SimulationConfig) -> f64 {
    let total = config.total_capital();
    if total > 0.0 {
        config.target_annual_expense / total
    } else {
        0.0
    }
}

fn degenerate_report(config: &SimulationConfig, target_success: f64) -> PlanReport {
    let wealths = vec![0.0; config.num_sims];
    PlanReport {
        success_rate: 0.0,
        success_ci_half_width: 0.0,
        planned_withdrawal_rate: planned_rate(config),
        safe: RiskProfile::new(target_success, 0.0, config.total_capital()),
        required_capital: 0.0,
        capital_shortfall: 0.0,
        risk_profiles: Vec::new(),
        wealth: WealthSummary::from_wealths(&wealths),
        wealths,
    }
}
