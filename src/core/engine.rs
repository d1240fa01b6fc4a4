use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, warn};

use super::error::SimulationError;
use super::market::{MarketPathSet, PathView};
use super::types::{AllocationWeights, SimulationConfig, SimulationResult, WithdrawalMode};

const MONTHS_PER_YEAR: usize = 12;
/// Years 1 through 10 use the early ceiling, later years the late one.
const EARLY_CEILING_YEARS: usize = 10;
const MIN_REFILL_TRANSFER: f64 = 0.01;

/// Shared flag checked between paths; tripping it aborts the run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run-level constants shared by every path.
#[derive(Debug, Clone, Copy)]
struct RunContext {
    months: usize,
    weights: AllocationWeights,
    invested: f64,
    cash_buffer: f64,
    initial_withdrawal: f64,
    initial_rate: f64,
    floor: f64,
    ceiling_early: f64,
    ceiling_late: f64,
    refill: bool,
}

impl RunContext {
    fn new(mode: WithdrawalMode, config: &SimulationConfig) -> Self {
        let initial_withdrawal = mode.initial_annual_withdrawal(config);
        let rate_base = if config.invested_amount == 0.0 {
            1.0
        } else {
            config.invested_amount
        };
        Self {
            months: config.months(),
            weights: config.weights(),
            invested: config.invested_amount,
            cash_buffer: config.cash_buffer,
            initial_withdrawal,
            initial_rate: initial_withdrawal / rate_base,
            floor: config.floor_pct / 100.0,
            ceiling_early: config.ceiling_early_pct / 100.0,
            ceiling_late: config.ceiling_late_pct / 100.0,
            refill: config.refill_cash_buffer,
        }
    }

    fn ceiling_for_year(&self, year: usize) -> f64 {
        if year <= EARLY_CEILING_YEARS {
            self.ceiling_early
        } else {
            self.ceiling_late
        }
    }
}

/// Spending state for one path: inflation-tracked base need plus the annual
/// withdrawal re-decided at each year end.
#[derive(Debug, Clone, Copy)]
struct WithdrawalPolicy {
    base_need: f64,
    annual: f64,
    inflation_since_review: f64,
}

impl WithdrawalPolicy {
    fn new(initial: f64) -> Self {
        Self {
            base_need: initial,
            annual: initial,
            inflation_since_review: 1.0,
        }
    }

    fn monthly(&self) -> f64 {
        self.annual / MONTHS_PER_YEAR as f64
    }

    fn record_inflation(&mut self, monthly_rate: f64) {
        self.inflation_since_review *= 1.0 + monthly_rate;
    }

    /// Year-end review: spend the initial rate of the current portfolio,
    /// bounded by the floor and the year's ceiling around the base need.
    fn review(&mut self, year: usize, portfolio: f64, ctx: &RunContext) {
        self.base_need *= self.inflation_since_review;
        self.inflation_since_review = 1.0;

        let variable = portfolio * ctx.initial_rate;
        let cap = self.base_need * ctx.ceiling_for_year(year);
        let floor = self.base_need * ctx.floor;
        self.annual = floor.max(variable.min(cap));
    }
}

#[derive(Debug, Clone, Copy)]
struct PortfolioState {
    portfolio: f64,
    cash: f64,
}

impl PortfolioState {
    /// Pays one month of spending. Returns `false` once portfolio and cash
    /// together can no longer cover it.
    fn withdraw(&mut self, amount: f64, growth: f64, ctx: &RunContext) -> bool {
        let defensive = self.portfolio < ctx.invested || growth < 1.0;
        if defensive && self.cash >= amount {
            self.cash -= amount;
        } else {
            self.portfolio -= amount;
            if ctx.refill {
                self.refill_cash(ctx);
            }
        }

        if self.portfolio < 0.0 {
            let deficit = -self.portfolio;
            self.portfolio = 0.0;
            if self.cash >= deficit {
                self.cash -= deficit;
            } else {
                self.cash = 0.0;
                return false;
            }
        }
        true
    }

    /// Tops the cash buffer back up from gains above the invested principal.
    fn refill_cash(&mut self, ctx: &RunContext) {
        let target = ctx.cash_buffer;
        if target <= 0.0 || self.cash >= target || self.portfolio <= ctx.invested {
            return;
        }
        let take = (target - self.cash).min(self.portfolio - ctx.invested);
        if take > MIN_REFILL_TRANSFER {
            self.portfolio -= take;
            self.cash += take;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PathOutcome {
    survived: bool,
    terminal_wealth: f64,
}

impl PathOutcome {
    fn failed() -> Self {
        Self {
            survived: false,
            terminal_wealth: 0.0,
        }
    }
}

fn simulate_path(path: PathView<'_>, ctx: &RunContext) -> PathOutcome {
    let mut state = PortfolioState {
        portfolio: ctx.invested,
        cash: ctx.cash_buffer,
    };
    let mut policy = WithdrawalPolicy::new(ctx.initial_withdrawal);
    let w = ctx.weights;

    for m in 0..ctx.months {
        let sample = path.month(m);
        if !sample.is_finite() {
            return PathOutcome::failed();
        }

        let weighted = w.stocks * sample.stocks.exp_m1()
            + w.bonds * sample.bonds.exp_m1()
            + w.crypto * sample.crypto.exp_m1();
        let growth = 1.0 + weighted;
        state.portfolio *= growth;
        policy.record_inflation(sample.inflation);

        if !state.withdraw(policy.monthly(), growth, ctx) {
            return PathOutcome::failed();
        }

        if (m + 1) % MONTHS_PER_YEAR == 0 {
            policy.review((m + 1) / MONTHS_PER_YEAR, state.portfolio, ctx);
        }
    }

    if !state.portfolio.is_finite() {
        return PathOutcome::failed();
    }
    PathOutcome {
        survived: true,
        terminal_wealth: state.portfolio,
    }
}

/// Runs the withdrawal policy over the first `config.num_sims` paths.
/// Inputs too short for the configured horizon yield a zero result.
pub fn simulate_portfolio(
    mode: WithdrawalMode,
    paths: &MarketPathSet,
    config: &SimulationConfig,
) -> SimulationResult {
    simulate_cancellable(mode, paths, config, &CancelFlag::new())
        .unwrap_or_else(|_| SimulationResult::degenerate(config.num_sims))
}

pub fn simulate_cancellable(
    mode: WithdrawalMode,
    paths: &MarketPathSet,
    config: &SimulationConfig,
    cancel: &CancelFlag,
) -> Result<SimulationResult, SimulationError> {
    let num_sims = config.num_sims;
    let months = config.months();

    if num_sims == 0 || months == 0 {
        warn!(num_sims, years = config.years, "empty simulation requested");
        return Ok(SimulationResult::degenerate(num_sims));
    }
    if paths.num_paths() < num_sims || paths.months() < months {
        warn!(
            num_sims,
            months,
            available_paths = paths.num_paths(),
            available_months = paths.months(),
            "market data shorter than the configured run"
        );
        return Ok(SimulationResult::degenerate(num_sims));
    }

    let ctx = RunContext::new(mode, config);
    let outcomes = (0..num_sims)
        .into_par_iter()
        .map(|p| {
            if cancel.is_cancelled() {
                None
            } else {
                Some(simulate_path(paths.path(p), &ctx))
            }
        })
        .collect::<Option<Vec<_>>>()
        .ok_or(SimulationError::Cancelled)?;

    let survivors = outcomes.iter().filter(|o| o.survived).count();
    let success_rate = survivors as f64 / num_sims as f64;
    let wealths = outcomes.iter().map(|o| o.terminal_wealth).collect();

    let capital = config.total_capital();
    let effective_rate = if capital > 0.0 {
        ctx.initial_withdrawal / capital
    } else {
        0.0
    };
    debug!(
        years = config.years,
        invested = config.invested_amount,
        cash = config.cash_buffer,
        spend = ctx.initial_withdrawal,
        stocks = ctx.weights.stocks,
        bonds = ctx.weights.bonds,
        crypto = ctx.weights.crypto,
        success_rate,
        effective_rate,
        "portfolio simulation complete"
    );

    Ok(SimulationResult {
        success_rate,
        wealths,
    })
}

/// Linear-interpolated percentile, `p` in percent. Sorts `values` in place.
pub(crate) fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
