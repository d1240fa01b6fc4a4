use tracing::debug;

use super::engine::{CancelFlag, simulate_cancellable};
use super::error::SimulationError;
use super::market::MarketPathSet;
use super::types::{SimulationConfig, WithdrawalMode};

pub const SEARCH_MIN_RATE: f64 = 0.001;
pub const SEARCH_MAX_RATE: f64 = 0.30;
pub const MAX_ITERATIONS: u32 = 25;
pub const RATE_TOLERANCE: f64 = 1e-4;
/// A candidate must beat the requested success probability by this much to
/// count as safe.
pub const SUCCESS_MARGIN: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_rate: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverTrace {
    pub rate: f64,
    pub iterations: Vec<SolverIteration>,
    pub converged: bool,
}

/// Highest initial withdrawal rate whose success rate over `paths` meets
/// `target_success` plus the safety margin. Falls back to the search minimum
/// when no candidate qualifies.
pub fn find_safe_withdrawal_rate(
    target_success: f64,
    paths: &MarketPathSet,
    config: &SimulationConfig,
) -> f64 {
    solve_with_trace(target_success, paths, config).rate
}

pub fn solve_with_trace(
    target_success: f64,
    paths: &MarketPathSet,
    config: &SimulationConfig,
) -> SolverTrace {
    solve_cancellable(target_success, paths, config, &CancelFlag::new()).unwrap_or_else(|_| {
        SolverTrace {
            rate: SEARCH_MIN_RATE,
            iterations: Vec::new(),
            converged: false,
        }
    })
}

pub fn solve_cancellable(
    target_success: f64,
    paths: &MarketPathSet,
    config: &SimulationConfig,
    cancel: &CancelFlag,
) -> Result<SolverTrace, SimulationError> {
    let mut lo = SEARCH_MIN_RATE;
    let mut hi = SEARCH_MAX_RATE;
    let mut best = SEARCH_MIN_RATE;
    let mut iterations = Vec::with_capacity(MAX_ITERATIONS as usize);
    let mut converged = false;

    for it in 1..=MAX_ITERATIONS {
        let mid = (lo + hi) * 0.5;
        let result = simulate_cancellable(WithdrawalMode::Rate(mid), paths, config, cancel)?;
        iterations.push(SolverIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate_rate: mid,
            success_rate: result.success_rate,
            success_ci_half_width: binomial_ci_half_width(result.success_rate, config.num_sims),
        });

        if result.success_rate >= target_success + SUCCESS_MARGIN {
            best = mid;
            lo = mid;
        } else {
            hi = mid;
        }

        if hi - lo < RATE_TOLERANCE {
            converged = true;
            break;
        }
    }

    debug!(
        target_success,
        rate = best,
        iterations = iterations.len(),
        converged,
        "withdrawal rate search finished"
    );

    Ok(SolverTrace {
        rate: best,
        iterations,
        converged,
    })
}

/// Half-width of the normal-approximation 95% interval for a success rate
/// measured over `n` paths.
pub fn binomial_ci_half_width(p: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::simulate_portfolio;
    use crate::core::market::{MonthSample, generate_market_paths};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn zero_return_setup() -> (SimulationConfig, MarketPathSet) {
        let config = SimulationConfig {
            num_sims: 3,
            years: 10,
            invested_amount: 1_000_000.0,
            cash_buffer: 0.0,
            ..SimulationConfig::default()
        };
        let flat = MonthSample {
            stocks: 0.0,
            bonds: 0.0,
            crypto: 0.0,
            inflation: 0.0,
        };
        let paths = MarketPathSet::constant(3, 120, flat);
        (config, paths)
    }

    fn seeded_setup() -> (SimulationConfig, MarketPathSet) {
        let config = SimulationConfig {
            num_sims: 200,
            years: 30,
            cash_buffer: 0.0,
            seed: Some(12345),
            ..SimulationConfig::default()
        };
        let paths = generate_market_paths(config.num_sims, config.years, &config);
        (config, paths)
    }

    #[test]
    fn zero_returns_converge_on_ten_percent_from_below() {
        let (config, paths) = zero_return_setup();
        let trace = solve_with_trace(0.95, &paths, &config);
        assert!(trace.converged);
        assert!(trace.rate <= 0.1 + 1e-12, "rate {}", trace.rate);
        assert_close(trace.rate, 0.1, 2e-4);
    }

    #[test]
    fn unreachable_target_returns_search_minimum() {
        let (config, paths) = zero_return_setup();
        let trace = solve_with_trace(1.0, &paths, &config);
        assert_eq!(trace.rate, SEARCH_MIN_RATE);
        assert!(trace.converged);
        let last = trace.iterations.last().expect("at least one iteration");
        assert_eq!(last.lower_bound, SEARCH_MIN_RATE);
    }

    #[test]
    fn trace_bounds_shrink_and_stay_ordered() {
        let (config, paths) = zero_return_setup();
        let trace = solve_with_trace(0.5, &paths, &config);
        assert!(trace.iterations.len() <= MAX_ITERATIONS as usize);
        for pair in trace.iterations.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(b.upper_bound - b.lower_bound < a.upper_bound - a.lower_bound);
            assert!(b.lower_bound >= a.lower_bound);
            assert!(b.upper_bound <= a.upper_bound);
        }
        for it in &trace.iterations {
            assert!(it.lower_bound < it.candidate_rate && it.candidate_rate < it.upper_bound);
            assert!(it.success_rate == 0.0 || it.success_rate == 1.0);
            assert_eq!(it.success_ci_half_width, 0.0);
        }
    }

    #[test]
    fn solved_rate_meets_target_when_resimulated() {
        let (config, paths) = seeded_setup();
        let target = 0.9;
        let rate = find_safe_withdrawal_rate(target, &paths, &config);
        assert!(rate > SEARCH_MIN_RATE);

        let result = simulate_portfolio(WithdrawalMode::Rate(rate), &paths, &config);
        assert!(
            result.success_rate >= target + SUCCESS_MARGIN,
            "success {} at rate {rate}",
            result.success_rate
        );
    }

    #[test]
    fn rate_does_not_rise_with_stricter_targets() {
        let (config, paths) = seeded_setup();
        let rates: Vec<f64> = [0.5, 0.75, 0.9, 0.95]
            .iter()
            .map(|target| find_safe_withdrawal_rate(*target, &paths, &config))
            .collect();
        for pair in rates.windows(2) {
            assert!(pair[1] <= pair[0], "rates {rates:?}");
        }
    }

    #[test]
    fn cancelled_search_stops() {
        let (config, paths) = zero_return_setup();
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert_eq!(
            solve_cancellable(0.9, &paths, &config, &cancel),
            Err(SimulationError::Cancelled)
        );
    }

    #[test]
    fn ci_half_width_matches_normal_approximation() {
        assert_close(binomial_ci_half_width(0.5, 100), 0.098, 1e-12);
        assert_eq!(binomial_ci_half_width(1.0, 100), 0.0);
        assert_eq!(binomial_ci_half_width(0.5, 0), 0.0);
    }
}
