mod correlation;
mod engine;
mod error;
mod market;
mod random;
mod report;
mod solver;
mod types;

pub use correlation::{ASSET_COUNT, Factor, cholesky, correlate, equicorrelation_factor};
pub use engine::{CancelFlag, simulate_cancellable, simulate_portfolio};
pub use error::{ConfigError, SimulationError};
pub use market::{MarketPathSet, MonthSample, PathView, generate_market_paths};
pub use random::{RandomSource, derive_seed, entropy_seed};
pub use report::{
    PlanReport, RISK_PROFILE_TARGETS, RiskProfile, WealthSummary, build_plan_report,
    build_plan_report_cancellable, run_plan,
};
pub use solver::{
    SolverIteration, SolverTrace, binomial_ci_half_width, find_safe_withdrawal_rate,
    solve_cancellable, solve_with_trace,
};
pub use types::{
    AllocationWeights, AssetParams, BAD_YEAR_LIMIT_DISABLED, BondParams, SimulationConfig,
    SimulationResult, WithdrawalMode,
};
