use rayon::prelude::*;
use tracing::debug;

use super::correlation::{Factor, correlate, equicorrelation_factor};
use super::error::SimulationError;
use super::random::{RandomSource, entropy_seed};
use super::types::{SimulationConfig, lerp};

const MONTHS_PER_YEAR: usize = 12;
const STOCK_CRASH_SEVERITY: f64 = 1.5;
const BOND_CRASH_SEVERITY: f64 = 0.5;
const CRYPTO_CRASH_SEVERITY: f64 = 2.0;
/// A corrected year ends 2% above that year's inflation.
const BAD_YEAR_RECOVERY: f64 = 1.02;

/// Monthly log-returns per asset plus the monthly inflation rate, stored as
/// contiguous `path * months + month` buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketPathSet {
    num_paths: usize,
    months: usize,
    stocks: Vec<f64>,
    bonds: Vec<f64>,
    crypto: Vec<f64>,
    inflation: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthSample {
    pub stocks: f64,
    pub bonds: f64,
    pub crypto: f64,
    pub inflation: f64,
}

impl MonthSample {
    pub fn is_finite(&self) -> bool {
        self.stocks.is_finite()
            && self.bonds.is_finite()
            && self.crypto.is_finite()
            && self.inflation.is_finite()
    }
}

impl MarketPathSet {
    pub fn zeroed(num_paths: usize, months: usize) -> Self {
        let len = num_paths * months;
        Self {
            num_paths,
            months,
            stocks: vec![0.0; len],
            bonds: vec![0.0; len],
            crypto: vec![0.0; len],
            inflation: vec![0.0; len],
        }
    }

    /// Every path and month carries the same sample.
    pub fn constant(num_paths: usize, months: usize, sample: MonthSample) -> Self {
        let len = num_paths * months;
        Self {
            num_paths,
            months,
            stocks: vec![sample.stocks; len],
            bonds: vec![sample.bonds; len],
            crypto: vec![sample.crypto; len],
            inflation: vec![sample.inflation; len],
        }
    }

    pub fn from_buffers(
        num_paths: usize,
        months: usize,
        stocks: Vec<f64>,
        bonds: Vec<f64>,
        crypto: Vec<f64>,
        inflation: Vec<f64>,
    ) -> Result<Self, SimulationError> {
        let expected = num_paths * months;
        for (buffer, actual) in [
            ("stocks", stocks.len()),
            ("bonds", bonds.len()),
            ("crypto", crypto.len()),
            ("inflation", inflation.len()),
        ] {
            if actual != expected {
                return Err(SimulationError::BufferLength {
                    buffer,
                    expected,
                    actual,
                });
            }
        }
        Ok(Self {
            num_paths,
            months,
            stocks,
            bonds,
            crypto,
            inflation,
        })
    }

    pub fn num_paths(&self) -> usize {
        self.num_paths
    }

    pub fn months(&self) -> usize {
        self.months
    }

    pub fn is_empty(&self) -> bool {
        self.num_paths == 0 || self.months == 0
    }

    pub fn stocks(&self) -> &[f64] {
        &self.stocks
    }

    pub fn bonds(&self) -> &[f64] {
        &self.bonds
    }

    pub fn crypto(&self) -> &[f64] {
        &self.crypto
    }

    pub fn inflation(&self) -> &[f64] {
        &self.inflation
    }

    pub fn path(&self, path: usize) -> PathView<'_> {
        let range = path * self.months..(path + 1) * self.months;
        PathView {
            stocks: &self.stocks[range.clone()],
            bonds: &self.bonds[range.clone()],
            crypto: &self.crypto[range.clone()],
            inflation: &self.inflation[range],
        }
    }
}

/// Read-only window onto one path of a `MarketPathSet`.
#[derive(Debug, Clone, Copy)]
pub struct PathView<'a> {
    stocks: &'a [f64],
    bonds: &'a [f64],
    crypto: &'a [f64],
    inflation: &'a [f64],
}

impl<'a> PathView<'a> {
    pub fn months(&self) -> usize {
        self.stocks.len()
    }

    pub fn month(&self, month: usize) -> MonthSample {
        MonthSample {
            stocks: self.stocks[month],
            bonds: self.bonds[month],
            crypto: self.crypto[month],
            inflation: self.inflation[month],
        }
    }

    pub fn stocks(&self) -> &'a [f64] {
        self.stocks
    }

    pub fn bonds(&self) -> &'a [f64] {
        self.bonds
    }

    pub fn crypto(&self) -> &'a [f64] {
        self.crypto
    }

    pub fn inflation(&self) -> &'a [f64] {
        self.inflation
    }
}

struct PathViewMut<'a> {
    stocks: &'a mut [f64],
    bonds: &'a mut [f64],
    crypto: &'a mut [f64],
    inflation: &'a mut [f64],
}

/// Month-dependent parameters, identical for every path.
#[derive(Debug, Clone, Copy)]
struct MonthParams {
    inflation_drift: f64,
    inflation_vol: f64,
    factor: Factor,
    drift: [f64; 3],
    vol: [f64; 3],
    crash: bool,
}

fn build_schedule(config: &SimulationConfig, months: usize) -> Vec<MonthParams> {
    let monthly_vol = |annual: f64| annual / (MONTHS_PER_YEAR as f64).sqrt();
    let monthly_drift = |cagr: f64| (1.0 + cagr).ln() / MONTHS_PER_YEAR as f64;
    let denom = months.saturating_sub(1).max(1) as f64;

    (0..months)
        .map(|m| {
            let t = m as f64 / denom;
            let rho = lerp(config.corr_start, config.corr_end, t);
            MonthParams {
                inflation_drift: config.inflation_mean / MONTHS_PER_YEAR as f64,
                inflation_vol: monthly_vol(config.inflation_vol),
                factor: equicorrelation_factor(rho),
                drift: [
                    monthly_drift(config.stocks.cagr_at(t)),
                    monthly_drift(config.bonds.cagr),
                    monthly_drift(config.crypto.cagr_at(t)),
                ],
                vol: [
                    monthly_vol(config.stocks.vol_at(t)),
                    monthly_vol(config.bonds.vol),
                    monthly_vol(config.crypto.vol_at(t)),
                ],
                crash: config.force_crash
                    && m / MONTHS_PER_YEAR < config.crash_duration_years as usize,
            }
        })
        .collect()
}

/// Generates `num_paths` paths of `years * 12` months. Each path draws from
/// its own stream derived from `config.seed` (or one entropy seed when
/// absent), so output does not depend on how paths are spread over threads.
pub fn generate_market_paths(
    num_paths: usize,
    years: u32,
    config: &SimulationConfig,
) -> MarketPathSet {
    let months = years as usize * MONTHS_PER_YEAR;
    if num_paths == 0 || months == 0 {
        return MarketPathSet::zeroed(0, 0);
    }

    let schedule = build_schedule(config, months);
    let base_seed = config.seed.unwrap_or_else(entropy_seed);
    let bad_year_limit = config.bad_year_limit();

    let mut set = MarketPathSet::zeroed(num_paths, months);
    let corrected_years: usize = set
        .stocks
        .par_chunks_mut(months)
        .zip(set.bonds.par_chunks_mut(months))
        .zip(set.crypto.par_chunks_mut(months))
        .zip(set.inflation.par_chunks_mut(months))
        .enumerate()
        .map(|(path, (((stocks, bonds), crypto), inflation))| {
            let mut view = PathViewMut {
                stocks,
                bonds,
                crypto,
                inflation,
            };
            let mut rng = RandomSource::for_path(base_seed, path);
            fill_path(&mut view, &schedule, &mut rng);

            match bad_year_limit {
                Some(limit) => {
                    correct_bad_year_streaks(view.stocks, view.inflation, limit)
                        + correct_bad_year_streaks(view.bonds, view.inflation, limit)
                        + correct_bad_year_streaks(view.crypto, view.inflation, limit)
                }
                None => 0,
            }
        })
        .sum();

    debug!(
        num_paths,
        months,
        seeded = config.seed.is_some(),
        force_crash = config.force_crash,
        corrected_years,
        "generated market paths"
    );
    set
}

fn fill_path(view: &mut PathViewMut<'_>, schedule: &[MonthParams], rng: &mut RandomSource) {
    for (m, params) in schedule.iter().enumerate() {
        let z_inflation = rng.next_standard_normal();
        view.inflation[m] = params.inflation_drift + params.inflation_vol * z_inflation;

        let independent = [
            rng.next_standard_normal(),
            rng.next_standard_normal(),
            rng.next_standard_normal(),
        ];
        let z = correlate(&params.factor, &independent);

        let mut stocks = params.drift[0] + params.vol[0] * z[0];
        let mut bonds = params.drift[1] + params.vol[1] * z[1];
        let mut crypto = params.drift[2] + params.vol[2] * z[2];

        if params.crash {
            stocks = crash_return(stocks, STOCK_CRASH_SEVERITY);
            bonds = crash_return(bonds, BOND_CRASH_SEVERITY);
            crypto = crash_return(crypto, CRYPTO_CRASH_SEVERITY);
        }

        view.stocks[m] = stocks;
        view.bonds[m] = bonds;
        view.crypto[m] = crypto;
    }
}

/// Positive returns flip into a loss scaled by `severity`; losses pass through.
fn crash_return(log_return: f64, severity: f64) -> f64 {
    if log_return > 0.0 {
        -log_return.abs() * severity
    } else {
        log_return
    }
}

/// Caps runs of years in which an asset trails inflation. Once the run
/// exceeds `limit`, that year receives a uniform monthly boost that lands its
/// growth at exactly 2% over inflation, and the run restarts. Returns the
/// number of corrected years.
fn correct_bad_year_streaks(returns: &mut [f64], inflation: &[f64], limit: u32) -> usize {
    let mut streak = 0_u32;
    let mut corrected = 0;

    for (year, year_inflation) in returns
        .chunks_exact_mut(MONTHS_PER_YEAR)
        .zip(inflation.chunks_exact(MONTHS_PER_YEAR))
    {
        let growth: f64 = year.iter().map(|r| r.exp()).product();
        let inflation_factor: f64 = year_inflation.iter().map(|i| 1.0 + i).product();

        if growth < inflation_factor {
            streak += 1;
        } else {
            streak = 0;
        }

        if streak > limit {
            let boost = ((inflation_factor * BAD_YEAR_RECOVERY).ln() - growth.ln())
                / MONTHS_PER_YEAR as f64;
            for r in year.iter_mut() {
                *r += boost;
            }
            streak = 0;
            corrected += 1;
        }
    }

    corrected
}
