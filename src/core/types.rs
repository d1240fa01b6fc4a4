use serde::Serialize;

use super::error::ConfigError;

/// Annualised return assumptions that drift linearly from `start` to `end`
/// over the horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetParams {
    pub cagr_start: f64,
    pub cagr_end: f64,
    pub vol_start: f64,
    pub vol_end: f64,
}

impl AssetParams {
    pub fn constant(cagr: f64, vol: f64) -> Self {
        Self {
            cagr_start: cagr,
            cagr_end: cagr,
            vol_start: vol,
            vol_end: vol,
        }
    }

    pub fn cagr_at(&self, t: f64) -> f64 {
        lerp(self.cagr_start, self.cagr_end, t)
    }

    pub fn vol_at(&self, t: f64) -> f64 {
        lerp(self.vol_start, self.vol_end, t)
    }
}

/// Bonds are modelled with constant parameters for the whole horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BondParams {
    pub cagr: f64,
    pub vol: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub num_sims: usize,
    pub years: u32,
    pub invested_amount: f64,
    pub cash_buffer: f64,
    pub alloc_stocks: f64,
    pub alloc_crypto: f64,
    pub target_annual_expense: f64,
    pub stocks: AssetParams,
    pub bonds: BondParams,
    pub crypto: AssetParams,
    pub inflation_mean: f64,
    pub inflation_vol: f64,
    pub corr_start: f64,
    pub corr_end: f64,
    pub force_crash: bool,
    pub crash_duration_years: u32,
    pub max_consecutive_bad_years: u32,
    /// Percent of the inflation-adjusted base need that spending never drops below.
    pub floor_pct: f64,
    /// Spending cap in percent of base need for years 1-10.
    pub ceiling_early_pct: f64,
    /// Spending cap in percent of base need from year 11 on.
    pub ceiling_late_pct: f64,
    pub refill_cash_buffer: bool,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_sims: 1000,
            years: 30,
            invested_amount: 1_000_000.0,
            cash_buffer: 0.0,
            alloc_stocks: 0.5,
            alloc_crypto: 0.0,
            target_annual_expense: 40_000.0,
            stocks: AssetParams::constant(0.103, 0.20),
            bonds: BondParams {
                cagr: 0.052,
                vol: 0.06,
            },
            crypto: AssetParams::constant(0.15, 0.60),
            inflation_mean: 0.031,
            inflation_vol: 0.015,
            corr_start: 0.20,
            corr_end: 0.20,
            force_crash: false,
            crash_duration_years: 3,
            max_consecutive_bad_years: 100,
            floor_pct: 100.0,
            ceiling_early_pct: 150.0,
            ceiling_late_pct: 150.0,
            refill_cash_buffer: false,
            seed: None,
        }
    }
}

/// Limits of 50 or more switch the bad-year-streak corrector off.
pub const BAD_YEAR_LIMIT_DISABLED: u32 = 50;

impl SimulationConfig {
    pub fn months(&self) -> usize {
        self.years as usize * 12
    }

    pub fn total_capital(&self) -> f64 {
        self.invested_amount + self.cash_buffer
    }

    pub fn weights(&self) -> AllocationWeights {
        let stocks = self.alloc_stocks.max(0.0);
        let crypto = self.alloc_crypto.max(0.0);
        AllocationWeights {
            stocks,
            bonds: (1.0 - stocks - crypto).max(0.0),
            crypto,
        }
    }

    pub fn bad_year_limit(&self) -> Option<u32> {
        (self.max_consecutive_bad_years < BAD_YEAR_LIMIT_DISABLED)
            .then_some(self.max_consecutive_bad_years)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_sims == 0 {
            return Err(ConfigError::NotPositive { field: "numSims" });
        }
        if self.years == 0 {
            return Err(ConfigError::NotPositive { field: "years" });
        }

        for (field, value) in [
            ("INVESTED_AMOUNT", self.invested_amount),
            ("CASH_BUFFER", self.cash_buffer),
            ("TARGET_ANNUAL_EXP", self.target_annual_expense),
            ("INFL_VOL", self.inflation_vol),
            ("S_VOL_START", self.stocks.vol_start),
            ("S_VOL_END", self.stocks.vol_end),
            ("B_VOL_START", self.bonds.vol),
            ("C_VOL_START", self.crypto.vol_start),
            ("C_VOL_END", self.crypto.vol_end),
        ] {
            non_negative(field, value)?;
        }

        for (field, value) in [
            ("ALLOC_STOCKS", self.alloc_stocks),
            ("ALLOC_CRYPTO", self.alloc_crypto),
        ] {
            in_range(field, value, 0.0, 1.0)?;
        }
        let allocated = self.alloc_stocks + self.alloc_crypto;
        if allocated > 1.0 + 1e-9 {
            return Err(ConfigError::AllocationOverflow { total: allocated });
        }

        for (field, value) in [
            ("S_CAGR_START", self.stocks.cagr_start),
            ("S_CAGR_END", self.stocks.cagr_end),
            ("B_CAGR_START", self.bonds.cagr),
            ("C_CAGR_START", self.crypto.cagr_start),
            ("C_CAGR_END", self.crypto.cagr_end),
        ] {
            finite(field, value)?;
            if value <= -1.0 {
                return Err(ConfigError::CagrTooLow { field, value });
            }
        }
        finite("INFL_MEAN", self.inflation_mean)?;

        for (field, value) in [("CORR_START", self.corr_start), ("CORR_END", self.corr_end)] {
            finite(field, value)?;
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    min: 0.0,
                    max: 1.0,
                    value,
                });
            }
        }

        in_range("FLOOR_PCT", self.floor_pct, 0.0, 100.0)?;
        for (field, value) in [
            ("CEILING_EARLY", self.ceiling_early_pct),
            ("CEILING_LATE", self.ceiling_late_pct),
        ] {
            finite(field, value)?;
            if value < 100.0 {
                return Err(ConfigError::CeilingBelowTarget { field, value });
            }
        }

        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(ConfigError::Negative { field, value });
    }
    Ok(())
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

pub(crate) fn lerp(start: f64, end: f64, t: f64) -> f64 {
    start * (1.0 - t) + end * t
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationWeights {
    pub stocks: f64,
    pub bonds: f64,
    pub crypto: f64,
}

/// How the initial annual withdrawal is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WithdrawalMode {
    /// Fraction of invested capital plus cash buffer.
    Rate(f64),
    /// Use `target_annual_expense` as the initial withdrawal.
    TargetExpense,
}

impl WithdrawalMode {
    /// Negative rates are the "use the configured target expense" sentinel.
    pub fn from_rate(rate: f64) -> Self {
        if rate < 0.0 {
            WithdrawalMode::TargetExpense
        } else {
            WithdrawalMode::Rate(rate)
        }
    }

    pub fn initial_annual_withdrawal(self, config: &SimulationConfig) -> f64 {
        match self {
            WithdrawalMode::Rate(rate) => config.total_capital() * rate,
            WithdrawalMode::TargetExpense => config.target_annual_expense,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub success_rate: f64,
    pub wealths: Vec<f64>,
}

impl SimulationResult {
    pub fn degenerate(num_sims: usize) -> Self {
        Self {
            success_rate: 0.0,
            wealths: vec![0.0; num_sims],
        }
    }
}
