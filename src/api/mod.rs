use axum::{
    Router,
    extract::{Json, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::{
    AssetParams, BondParams, CancelFlag, SimulationConfig, SimulationError, run_plan,
};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TARGET_SUCCESS_PERCENT: f64 = 95.0;

#[derive(Parser, Debug)]
#[command(
    name = "firecast",
    about = "Monte Carlo retirement planner (stocks + bonds + crypto, floor/ceiling withdrawals)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one plan and print the report as JSON
    Run(RunArgs),
    /// Serve the HTTP API
    Serve {
        #[arg(long, short, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(
            long,
            default_value_t = DEFAULT_TIMEOUT_SECS,
            help = "Per-request simulation deadline in seconds"
        )]
        timeout_secs: u64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value_t = 1000)]
    simulations: usize,
    #[arg(long, default_value_t = 30)]
    years: u32,
    #[arg(long, default_value_t = 1_000_000.0)]
    invested_amount: f64,
    #[arg(long, default_value_t = 0.0)]
    cash_buffer: f64,
    #[arg(long, default_value_t = 40_000.0)]
    target_annual_expense: f64,
    #[arg(long, default_value_t = 50.0, help = "Stock allocation in percent")]
    stock_allocation: f64,
    #[arg(long, default_value_t = 0.0, help = "Crypto allocation in percent")]
    crypto_allocation: f64,

    #[arg(long, default_value_t = 10.3, help = "Stock CAGR in percent at the start")]
    stock_growth_rate: f64,
    #[arg(long, help = "Stock CAGR in percent at the end, defaults to stock-growth-rate")]
    stock_growth_rate_end: Option<f64>,
    #[arg(long, default_value_t = 20.0, help = "Stock volatility in percent")]
    stock_volatility: f64,
    #[arg(long, help = "Stock volatility in percent at the end, defaults to stock-volatility")]
    stock_volatility_end: Option<f64>,
    #[arg(long, default_value_t = 5.2, help = "Bond CAGR in percent")]
    bond_growth_rate: f64,
    #[arg(long, default_value_t = 6.0, help = "Bond volatility in percent")]
    bond_volatility: f64,
    #[arg(long, default_value_t = 15.0, help = "Crypto CAGR in percent at the start")]
    crypto_growth_rate: f64,
    #[arg(long)]
    crypto_growth_rate_end: Option<f64>,
    #[arg(long, default_value_t = 60.0, help = "Crypto volatility in percent")]
    crypto_volatility: f64,
    #[arg(long)]
    crypto_volatility_end: Option<f64>,
    #[arg(long, default_value_t = 3.1, help = "Mean annual inflation in percent")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 1.5, help = "Inflation volatility in percent")]
    inflation_volatility: f64,
    #[arg(long, default_value_t = 0.20, help = "Pairwise asset correlation, 0 to <1")]
    correlation: f64,
    #[arg(long, help = "Correlation at the end of the horizon, defaults to correlation")]
    correlation_end: Option<f64>,

    #[arg(long, help = "Turn every gain into a loss for the first crash-duration years")]
    force_crash: bool,
    #[arg(long, default_value_t = 3)]
    crash_duration: u32,
    #[arg(
        long,
        default_value_t = 100,
        help = "Longest run of years an asset may trail inflation; 50 or more disables the cap"
    )]
    max_consecutive_bad_years: u32,
    #[arg(long, default_value_t = 100.0, help = "Spending floor in percent of base need")]
    floor_pct: f64,
    #[arg(long, default_value_t = 150.0, help = "Spending ceiling in percent, years 1-10")]
    ceiling_early: f64,
    #[arg(long, default_value_t = 150.0, help = "Spending ceiling in percent, years 11+")]
    ceiling_late: f64,
    #[arg(long)]
    refill_cash_buffer: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_TARGET_SUCCESS_PERCENT,
        help = "Target success probability in percent"
    )]
    target_success: f64,
    #[arg(long)]
    seed: Option<u64>,
}

/// Keys follow the web client's camelCase names; the aliases accept the
/// configuration names used in saved scenarios. Rates are decimals here,
/// floor and ceiling are percentages.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    num_sims: Option<usize>,
    years: Option<u32>,
    #[serde(alias = "INVESTED_AMOUNT")]
    invested_amount: Option<f64>,
    #[serde(alias = "CASH_BUFFER")]
    cash_buffer: Option<f64>,
    #[serde(alias = "ALLOC_STOCKS")]
    alloc_stocks: Option<f64>,
    #[serde(alias = "ALLOC_CRYPTO")]
    alloc_crypto: Option<f64>,
    #[serde(alias = "TARGET_ANNUAL_EXP")]
    target_annual_exp: Option<f64>,

    #[serde(alias = "S_CAGR_START")]
    s_cagr_start: Option<f64>,
    #[serde(alias = "S_CAGR_END")]
    s_cagr_end: Option<f64>,
    #[serde(alias = "S_VOL_START")]
    s_vol_start: Option<f64>,
    #[serde(alias = "S_VOL_END")]
    s_vol_end: Option<f64>,
    #[serde(alias = "B_CAGR_START")]
    b_cagr_start: Option<f64>,
    #[serde(alias = "B_VOL_START")]
    b_vol_start: Option<f64>,
    #[serde(alias = "C_CAGR_START")]
    c_cagr_start: Option<f64>,
    #[serde(alias = "C_CAGR_END")]
    c_cagr_end: Option<f64>,
    #[serde(alias = "C_VOL_START")]
    c_vol_start: Option<f64>,
    #[serde(alias = "C_VOL_END")]
    c_vol_end: Option<f64>,
    #[serde(alias = "INFL_MEAN")]
    infl_mean: Option<f64>,
    #[serde(alias = "INFL_VOL")]
    infl_vol: Option<f64>,
    #[serde(alias = "CORR_START")]
    corr_start: Option<f64>,
    #[serde(alias = "CORR_END")]
    corr_end: Option<f64>,

    #[serde(alias = "FORCE_CRASH")]
    force_crash: Option<bool>,
    #[serde(alias = "CRASH_DURATION")]
    crash_duration: Option<u32>,
    #[serde(alias = "MAX_CONSECUTIVE_BAD_YEARS")]
    max_consecutive_bad_years: Option<u32>,
    #[serde(alias = "FLOOR_PCT")]
    floor_pct: Option<f64>,
    #[serde(alias = "CEILING_EARLY")]
    ceiling_early: Option<f64>,
    #[serde(alias = "CEILING_LATE")]
    ceiling_late: Option<f64>,
    #[serde(alias = "REFILL_CASH_BUFFER")]
    refill_cash_buffer: Option<bool>,
    #[serde(alias = "RANDOM_SEED", alias = "seed")]
    random_seed: Option<u64>,
    #[serde(alias = "TARGET_SUCCESS_PERCENT")]
    target_success_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct PlanRequest {
    config: SimulationConfig,
    target_success: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Clone, Copy)]
struct AppState {
    timeout: Duration,
}

fn build_config(args: RunArgs) -> Result<PlanRequest, String> {
    let config = SimulationConfig {
        num_sims: args.simulations,
        years: args.years,
        invested_amount: args.invested_amount,
        cash_buffer: args.cash_buffer,
        alloc_stocks: args.stock_allocation / 100.0,
        alloc_crypto: args.crypto_allocation / 100.0,
        target_annual_expense: args.target_annual_expense,
        stocks: AssetParams {
            cagr_start: args.stock_growth_rate / 100.0,
            cagr_end: args.stock_growth_rate_end.unwrap_or(args.stock_growth_rate) / 100.0,
            vol_start: args.stock_volatility / 100.0,
            vol_end: args.stock_volatility_end.unwrap_or(args.stock_volatility) / 100.0,
        },
        bonds: BondParams {
            cagr: args.bond_growth_rate / 100.0,
            vol: args.bond_volatility / 100.0,
        },
        crypto: AssetParams {
            cagr_start: args.crypto_growth_rate / 100.0,
            cagr_end: args.crypto_growth_rate_end.unwrap_or(args.crypto_growth_rate) / 100.0,
            vol_start: args.crypto_volatility / 100.0,
            vol_end: args.crypto_volatility_end.unwrap_or(args.crypto_volatility) / 100.0,
        },
        inflation_mean: args.inflation_rate / 100.0,
        inflation_vol: args.inflation_volatility / 100.0,
        corr_start: args.correlation,
        corr_end: args.correlation_end.unwrap_or(args.correlation),
        force_crash: args.force_crash,
        crash_duration_years: args.crash_duration,
        max_consecutive_bad_years: args.max_consecutive_bad_years,
        floor_pct: args.floor_pct,
        ceiling_early_pct: args.ceiling_early,
        ceiling_late_pct: args.ceiling_late,
        refill_cash_buffer: args.refill_cash_buffer,
        seed: args.seed,
    };
    finish_request(config, args.target_success)
}

fn finish_request(
    config: SimulationConfig,
    target_success_percent: f64,
) -> Result<PlanRequest, String> {
    config.validate().map_err(|e| e.to_string())?;
    if !(target_success_percent > 0.0 && target_success_percent < 100.0) {
        return Err(format!(
            "target success must be between 0 and 100 percent (exclusive), got {target_success_percent}"
        ));
    }
    Ok(PlanRequest {
        config,
        target_success: target_success_percent / 100.0,
    })
}

/// Runs one plan synchronously and renders the report as pretty JSON.
pub fn run_cli(args: RunArgs) -> Result<String, String> {
    let request = build_config(args)?;
    let report = run_plan(&request.config, request.target_success, &CancelFlag::new())
        .map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&report).map_err(|e| format!("failed to encode report: {e}"))
}

pub async fn run_http_server(port: u16, timeout: Duration) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/healthz", get(health_handler))
        .fallback(not_found_handler)
        .with_state(AppState { timeout });

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, timeout_secs = timeout.as_secs(), "firecast HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_handler_impl(state: AppState, payload: SimulatePayload) -> Response {
    let request = match plan_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let cancel = CancelFlag::new();
    let worker_cancel = cancel.clone();
    let task = tokio::task::spawn_blocking(move || {
        run_plan(&request.config, request.target_success, &worker_cancel)
    });

    match tokio::time::timeout(state.timeout, task).await {
        Ok(Ok(Ok(report))) => json_response(StatusCode::OK, report),
        Ok(Ok(Err(SimulationError::Cancelled))) | Err(_) => {
            cancel.cancel();
            warn!(
                timeout_secs = state.timeout.as_secs_f64(),
                "simulation deadline exceeded"
            );
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "simulation deadline exceeded",
            )
        }
        Ok(Ok(Err(e))) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        Ok(Err(e)) => {
            error!(error = %e, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn plan_request_from_json(json: &str) -> Result<PlanRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    plan_request_from_payload(payload)
}

fn plan_request_from_payload(payload: SimulatePayload) -> Result<PlanRequest, String> {
    let mut config = SimulationConfig::default();
    let mut target_success_percent = DEFAULT_TARGET_SUCCESS_PERCENT;

    if let Some(v) = payload.num_sims {
        config.num_sims = v;
    }
    if let Some(v) = payload.years {
        config.years = v;
    }
    if let Some(v) = payload.invested_amount {
        config.invested_amount = v;
    }
    if let Some(v) = payload.cash_buffer {
        config.cash_buffer = v;
    }
    if let Some(v) = payload.alloc_stocks {
        config.alloc_stocks = v;
    }
    if let Some(v) = payload.alloc_crypto {
        config.alloc_crypto = v;
    }
    if let Some(v) = payload.target_annual_exp {
        config.target_annual_expense = v;
    }

    if let Some(v) = payload.s_cagr_start {
        config.stocks.cagr_start = v;
    }
    if let Some(v) = payload.s_cagr_end {
        config.stocks.cagr_end = v;
    }
    if let Some(v) = payload.s_vol_start {
        config.stocks.vol_start = v;
    }
    if let Some(v) = payload.s_vol_end {
        config.stocks.vol_end = v;
    }
    if let Some(v) = payload.b_cagr_start {
        config.bonds.cagr = v;
    }
    if let Some(v) = payload.b_vol_start {
        config.bonds.vol = v;
    }
    if let Some(v) = payload.c_cagr_start {
        config.crypto.cagr_start = v;
    }
    if let Some(v) = payload.c_cagr_end {
        config.crypto.cagr_end = v;
    }
    if let Some(v) = payload.c_vol_start {
        config.crypto.vol_start = v;
    }
    if let Some(v) = payload.c_vol_end {
        config.crypto.vol_end = v;
    }
    if let Some(v) = payload.infl_mean {
        config.inflation_mean = v;
    }
    if let Some(v) = payload.infl_vol {
        config.inflation_vol = v;
    }
    if let Some(v) = payload.corr_start {
        config.corr_start = v;
    }
    if let Some(v) = payload.corr_end {
        config.corr_end = v;
    }

    if let Some(v) = payload.force_crash {
        config.force_crash = v;
    }
    if let Some(v) = payload.crash_duration {
        config.crash_duration_years = v;
    }
    if let Some(v) = payload.max_consecutive_bad_years {
        config.max_consecutive_bad_years = v;
    }
    if let Some(v) = payload.floor_pct {
        config.floor_pct = v;
    }
    if let Some(v) = payload.ceiling_early {
        config.ceiling_early_pct = v;
    }
    if let Some(v) = payload.ceiling_late {
        config.ceiling_late_pct = v;
    }
    if let Some(v) = payload.refill_cash_buffer {
        config.refill_cash_buffer = v;
    }
    if let Some(v) = payload.random_seed {
        config.seed = Some(v);
    }
    if let Some(v) = payload.target_success_percent {
        target_success_percent = v;
    }

    finish_request(config, target_success_percent)
}
