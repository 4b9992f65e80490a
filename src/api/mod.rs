use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    AccountType, CostBasisSummary, DelayCandidate, HedgePlan, Inputs, MAX_DELAY_MONTHS,
    MAX_DURATION_PERIODS, PeriodResult, PurchaseBlock, ResultAggregator, SimulationConfig,
    SummaryRow, TaxDueMonth, TaxPenaltyTable, optimize_delay, run_simulation, size_hedge,
    weighted_cost_basis,
};

const DEFAULT_MAX_DELAY_MONTHS: u32 = 12;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliAccountType {
    Taxable,
    NonTaxable,
    TaxDeferred,
}

impl From<CliAccountType> for AccountType {
    fn from(value: CliAccountType) -> Self {
        match value {
            CliAccountType::Taxable => AccountType::Taxable,
            CliAccountType::NonTaxable => AccountType::NonTaxable,
            CliAccountType::TaxDeferred => AccountType::TaxDeferred,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliView {
    Period,
    Yearly,
    Total,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiAccountType {
    Taxable,
    #[serde(alias = "nonTaxable", alias = "non_taxable", alias = "Non-Taxable")]
    NonTaxable,
    #[serde(
        alias = "taxDeferred",
        alias = "tax_deferred",
        alias = "deferred",
        alias = "Deferred"
    )]
    TaxDeferred,
}

impl From<ApiAccountType> for CliAccountType {
    fn from(value: ApiAccountType) -> Self {
        match value {
            ApiAccountType::Taxable => CliAccountType::Taxable,
            ApiAccountType::NonTaxable => CliAccountType::NonTaxable,
            ApiAccountType::TaxDeferred => CliAccountType::TaxDeferred,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    initial_shares: Option<f64>,
    initial_investment: Option<f64>,
    initial_cost_basis: Option<f64>,
    dividend_per_share: Option<f64>,
    reinvestment_price: Option<f64>,
    account_type: Option<ApiAccountType>,
    federal_tax_rate: Option<f64>,
    state_tax_rate: Option<f64>,
    defer_taxes: Option<bool>,
    federal_penalty_rate: Option<f64>,
    state_penalty_rate: Option<f64>,
    #[serde(alias = "state")]
    jurisdiction: Option<String>,
    dca_amount: Option<f64>,
    withdrawal_amount: Option<f64>,
    current_price: Option<f64>,
    months: Option<u32>,
    start_date: Option<NaiveDate>,
    due_date_offset: Option<u32>,
    max_delay: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CostBasisPayload {
    blocks: Vec<PurchaseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HedgePayload {
    shares_to_hedge: f64,
    premium: f64,
    strike: f64,
    exit_price: f64,
}

#[derive(Parser, Debug)]
#[command(
    name = "drip",
    about = "Monthly dividend reinvestment simulator with deferred-tax and penalty tracking",
    after_help = "Run `drip serve [port]` to start the HTTP API instead."
)]
struct Cli {
    #[arg(long, conflicts_with = "initial_investment")]
    initial_shares: Option<f64>,
    #[arg(
        long,
        help = "Starting capital; converted to shares at --initial-cost-basis"
    )]
    initial_investment: Option<f64>,
    #[arg(long, default_value_t = 250.0, help = "Initial purchase price per share")]
    initial_cost_basis: f64,
    #[arg(long, help = "Average monthly dividend per share")]
    dividend_per_share: f64,
    #[arg(long, help = "Price at which dividends buy new shares")]
    reinvestment_price: f64,
    #[arg(long, value_enum, default_value_t = CliAccountType::Taxable)]
    account_type: CliAccountType,
    #[arg(long, default_value_t = 20.0, help = "Federal tax rate in percent")]
    federal_tax_rate: f64,
    #[arg(long, default_value_t = 5.0, help = "State tax rate in percent")]
    state_tax_rate: f64,
    #[arg(
        long,
        help = "Defer tax payments to the October 15 extension date instead of paying monthly"
    )]
    defer_taxes: bool,
    #[arg(
        long,
        help = "Federal late-payment penalty in percent per month, defaults to the penalty table"
    )]
    federal_penalty_rate: Option<f64>,
    #[arg(
        long,
        help = "State late-payment penalty in percent per month, overrides --jurisdiction"
    )]
    state_penalty_rate: Option<f64>,
    #[arg(long, help = "Two-letter state code used to look up the state penalty rate")]
    jurisdiction: Option<String>,
    #[arg(long, help = "TOML file replacing the built-in penalty table")]
    penalty_table: Option<PathBuf>,
    #[arg(long, default_value_t = 0.0, help = "Cash added every month")]
    dca_amount: f64,
    #[arg(long, default_value_t = 0.0, help = "Cash withdrawn every month")]
    withdrawal_amount: f64,
    #[arg(
        long,
        help = "Market price used to value the portfolio, defaults to reinvestment-price"
    )]
    current_price: Option<f64>,
    #[arg(long, default_value_t = 12, help = "Number of monthly periods")]
    months: u32,
    #[arg(
        long,
        help = "Date of the first period (YYYY-MM-DD), defaults to the first of this month"
    )]
    start_date: Option<NaiveDate>,
    #[arg(
        long,
        default_value_t = 0,
        help = "Months added to every tax due date"
    )]
    due_date_offset: u32,
    #[arg(
        long,
        help = "Search due-date offsets 0..=N months and report the best one"
    )]
    optimize_delay: Option<u32>,
    #[arg(long, value_enum, default_value_t = CliView::Period)]
    view: CliView,
    #[arg(long, help = "Print JSON instead of a table")]
    json: bool,
}

#[derive(Debug)]
struct RunRequest {
    config: SimulationConfig,
    start_date: NaiveDate,
    max_delay: Option<u32>,
}

#[derive(Clone)]
struct AppState {
    penalty_table: Arc<TaxPenaltyTable>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    account_type: AccountType,
    defer_taxes: bool,
    tax_due_month: TaxDueMonth,
    due_date_offset_months: u32,
    start_date: NaiveDate,
    initial_shares: f64,
    federal_penalty_rate: f64,
    state_penalty_rate: f64,
    final_shares: f64,
    periods: Vec<PeriodResult>,
    yearly: Vec<SummaryRow>,
    total: Option<SummaryRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeResponse {
    best_delay_months: u32,
    best_final_shares: f64,
    candidates: Vec<DelayCandidate>,
    best_run: SimulateResponse,
}

#[derive(Debug, Serialize)]
struct PenaltyRatesResponse<'a> {
    federal: f64,
    states: &'a std::collections::BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_request(cli: Cli, table: &TaxPenaltyTable) -> Result<RunRequest, String> {
    if !cli.initial_cost_basis.is_finite() || cli.initial_cost_basis <= 0.0 {
        return Err("--initial-cost-basis must be > 0".to_string());
    }

    let initial_shares = match (cli.initial_shares, cli.initial_investment) {
        (Some(_), Some(_)) => {
            return Err(
                "--initial-shares and --initial-investment cannot be used together".to_string(),
            );
        }
        (Some(shares), None) => shares,
        (None, Some(amount)) => {
            if !amount.is_finite() || amount < 0.0 {
                return Err("--initial-investment must be >= 0".to_string());
            }
            amount / cli.initial_cost_basis
        }
        (None, None) => {
            return Err("one of --initial-shares or --initial-investment is required".to_string());
        }
    };

    if !initial_shares.is_finite() || initial_shares < 0.0 {
        return Err("--initial-shares must be >= 0".to_string());
    }

    if !cli.reinvestment_price.is_finite() || cli.reinvestment_price <= 0.0 {
        return Err("--reinvestment-price must be > 0".to_string());
    }

    if !cli.dividend_per_share.is_finite() || cli.dividend_per_share < 0.0 {
        return Err("--dividend-per-share must be >= 0".to_string());
    }

    for (name, rate) in [
        ("--federal-tax-rate", cli.federal_tax_rate),
        ("--state-tax-rate", cli.state_tax_rate),
    ] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    let federal_penalty_rate = cli.federal_penalty_rate.unwrap_or(table.federal_rate());
    let state_penalty_rate = match (cli.state_penalty_rate, cli.jurisdiction.as_deref()) {
        (Some(rate), _) => rate,
        (None, Some(code)) => table
            .state_rate(code)
            .map_err(|e| format!("--jurisdiction: {e}"))?,
        (None, None) => 0.0,
    };

    for (name, rate) in [
        ("--federal-penalty-rate", federal_penalty_rate),
        ("--state-penalty-rate", state_penalty_rate),
    ] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    for (name, amount) in [
        ("--dca-amount", cli.dca_amount),
        ("--withdrawal-amount", cli.withdrawal_amount),
    ] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    let current_price = cli.current_price.unwrap_or(cli.reinvestment_price);
    if !current_price.is_finite() || current_price < 0.0 {
        return Err("--current-price must be >= 0".to_string());
    }

    if cli.months == 0 {
        return Err("--months must be >= 1".to_string());
    }
    if cli.months > MAX_DURATION_PERIODS {
        return Err(format!("--months must be <= {MAX_DURATION_PERIODS}"));
    }

    if let Some(max) = cli.optimize_delay {
        if max > MAX_DELAY_MONTHS {
            return Err(format!("--optimize-delay must be <= {MAX_DELAY_MONTHS}"));
        }
    }

    let config = SimulationConfig::new(Inputs {
        initial_shares,
        initial_cost_basis: cli.initial_cost_basis,
        dividend_per_share: cli.dividend_per_share,
        reinvestment_price: cli.reinvestment_price,
        account_type: cli.account_type.into(),
        federal_tax_rate: cli.federal_tax_rate,
        state_tax_rate: cli.state_tax_rate,
        defer_taxes: cli.defer_taxes,
        federal_penalty_rate,
        state_penalty_rate,
        dca_amount: cli.dca_amount,
        withdrawal_amount: cli.withdrawal_amount,
        current_price,
        duration_periods: cli.months,
        due_date_offset_months: cli.due_date_offset,
    })
    .map_err(|e| e.to_string())?;

    Ok(RunRequest {
        config,
        start_date: cli.start_date.unwrap_or_else(default_start_date),
        max_delay: cli.optimize_delay,
    })
}

fn default_start_date() -> NaiveDate {
    let today = Local::now().date_naive();
    today.with_day(1).unwrap_or(today)
}

pub fn run_cli() -> Result<(), String> {
    let cli = Cli::parse();
    let table = match &cli.penalty_table {
        Some(path) => TaxPenaltyTable::load(path).map_err(|e| format!("--penalty-table: {e}"))?,
        None => TaxPenaltyTable::from_env(),
    };
    let view = cli.view;
    let json = cli.json;
    let request = build_request(cli, &table)?;

    let output = match request.max_delay {
        Some(max_delay) => {
            let response = optimize_request(&request, max_delay)?;
            if json {
                to_json(&response)?
            } else {
                let mut out = render_candidates(&response);
                out.push_str(&render_view(&response.best_run, view));
                out
            }
        }
        None => {
            let response = simulate_request(&request);
            if json {
                to_json(&response)?
            } else {
                render_view(&response, view)
            }
        }
    };

    println!("{output}");
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize output: {e}"))
}

fn simulate_request(request: &RunRequest) -> SimulateResponse {
    let aggregator = ResultAggregator::new(run_simulation(&request.config, request.start_date));
    build_simulate_response(&request.config, request.start_date, aggregator)
}

fn optimize_request(request: &RunRequest, max_delay: u32) -> Result<OptimizeResponse, String> {
    let optimization =
        optimize_delay(&request.config, request.start_date, max_delay).map_err(|e| e.to_string())?;
    let best_config = request
        .config
        .with_due_date_offset(optimization.best_delay);
    Ok(OptimizeResponse {
        best_delay_months: optimization.best_delay,
        best_final_shares: optimization.best_final_shares,
        candidates: optimization.candidates,
        best_run: build_simulate_response(
            &best_config,
            request.start_date,
            ResultAggregator::new(optimization.best_results),
        ),
    })
}

fn build_simulate_response(
    config: &SimulationConfig,
    start_date: NaiveDate,
    aggregator: ResultAggregator,
) -> SimulateResponse {
    let inputs = config.inputs();
    let yearly = aggregator.yearly();
    let total = aggregator.total();
    let final_shares = aggregator.final_shares().unwrap_or(inputs.initial_shares);

    SimulateResponse {
        account_type: inputs.account_type,
        defer_taxes: inputs.defer_taxes,
        tax_due_month: config.tax_due_month(),
        due_date_offset_months: inputs.due_date_offset_months,
        start_date,
        initial_shares: inputs.initial_shares,
        federal_penalty_rate: inputs.federal_penalty_rate,
        state_penalty_rate: inputs.state_penalty_rate,
        final_shares,
        periods: aggregator.into_periods(),
        yearly,
        total,
    }
}

fn render_view(response: &SimulateResponse, view: CliView) -> String {
    match view {
        CliView::Period => render_periods(&response.periods),
        CliView::Yearly => render_summaries(&response.yearly),
        CliView::Total => render_summaries(response.total.as_slice()),
    }
}

fn render_periods(rows: &[PeriodResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6} {:>10} {:>12} {:>10} {:>10} {:>9} {:>12} {:>12} {:>10} {:>12} {:>14}",
        "Month",
        "Date",
        "Dividend",
        "Tax Owed",
        "Tax Paid",
        "Penalty",
        "Outstanding",
        "Reinvested",
        "New Shrs",
        "Total Shrs",
        "Value"
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{:>6} {:>10} {:>12.2} {:>10.2} {:>10.2} {:>9.2} {:>12.2} {:>12.2} {:>10.4} {:>12.4} {:>14.2}",
            row.period,
            row.date,
            row.dividend_income,
            row.tax_owed,
            row.tax_paid,
            row.penalty,
            row.outstanding_balance,
            row.cash_reinvested,
            row.new_shares,
            row.total_shares,
            row.portfolio_value
        );
    }
    out
}

fn render_summaries(rows: &[SummaryRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6} {:>8} {:>12} {:>10} {:>10} {:>9} {:>12} {:>12} {:>10} {:>12} {:>14}",
        "Year",
        "Months",
        "Dividend",
        "Tax Owed",
        "Tax Paid",
        "Penalty",
        "Outstanding",
        "Reinvested",
        "New Shrs",
        "Total Shrs",
        "Value"
    );
    for row in rows {
        let label = row
            .year
            .map(|year| year.to_string())
            .unwrap_or_else(|| "Total".to_string());
        let _ = writeln!(
            out,
            "{:>6} {:>8} {:>12.2} {:>10.2} {:>10.2} {:>9.2} {:>12.2} {:>12.2} {:>10.4} {:>12.4} {:>14.2}",
            label,
            row.periods,
            row.dividend_income,
            row.tax_owed,
            row.tax_paid,
            row.penalty,
            row.outstanding_balance,
            row.cash_reinvested,
            row.new_shares,
            row.total_shares,
            row.portfolio_value
        );
    }
    out
}

fn render_candidates(response: &OptimizeResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6} {:>14} {:>12} {:>10}",
        "Delay", "Final Shares", "Taxes Paid", "Penalties"
    );
    for candidate in &response.candidates {
        let marker = if candidate.delay_months == response.best_delay_months {
            " *"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{:>6} {:>14.4} {:>12.2} {:>10.2}{marker}",
            candidate.delay_months,
            candidate.final_shares,
            candidate.total_taxes_paid,
            candidate.total_penalties
        );
    }
    out.push('\n');
    out
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = AppState {
        penalty_table: Arc::new(TaxPenaltyTable::from_env()),
    };
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/optimize-delay",
            get(optimize_get_handler).post(optimize_post_handler),
        )
        .route("/api/cost-basis", post(cost_basis_handler))
        .route("/api/hedge", get(hedge_get_handler).post(hedge_post_handler))
        .route("/api/penalty-rates", get(penalty_rates_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!("DRIP HTTP API listening on http://{addr}");
    info!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn simulate_handler_impl(state: &AppState, payload: SimulatePayload) -> Response {
    let request = match run_request_from_payload(payload, &state.penalty_table) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match tokio::task::spawn_blocking(move || simulate_request(&request)).await {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => internal_error(e),
    }
}

async fn optimize_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    optimize_handler_impl(&state, payload).await
}

async fn optimize_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    optimize_handler_impl(&state, payload).await
}

async fn optimize_handler_impl(state: &AppState, payload: SimulatePayload) -> Response {
    let request = match run_request_from_payload(payload, &state.penalty_table) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let max_delay = request.max_delay.unwrap_or(DEFAULT_MAX_DELAY_MONTHS);
    match tokio::task::spawn_blocking(move || optimize_request(&request, max_delay)).await {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(msg)) => error_response(StatusCode::BAD_REQUEST, &msg),
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: tokio::task::JoinError) -> Response {
    error!("simulation task failed: {e}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation failed")
}

async fn cost_basis_handler(Json(payload): Json<CostBasisPayload>) -> Response {
    match weighted_cost_basis(&payload.blocks) {
        Ok(summary) => json_response::<CostBasisSummary>(StatusCode::OK, summary),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn hedge_get_handler(Query(payload): Query<HedgePayload>) -> Response {
    hedge_handler_impl(payload)
}

async fn hedge_post_handler(Json(payload): Json<HedgePayload>) -> Response {
    hedge_handler_impl(payload)
}

fn hedge_handler_impl(payload: HedgePayload) -> Response {
    match size_hedge(
        payload.shares_to_hedge,
        payload.premium,
        payload.strike,
        payload.exit_price,
    ) {
        Ok(plan) => json_response::<HedgePlan>(StatusCode::OK, plan),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn penalty_rates_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        PenaltyRatesResponse {
            federal: state.penalty_table.federal_rate(),
            states: &state.penalty_table.states,
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
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
fn run_request_from_json(json: &str, table: &TaxPenaltyTable) -> Result<RunRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    run_request_from_payload(payload, table)
}

fn run_request_from_payload(
    payload: SimulatePayload,
    table: &TaxPenaltyTable,
) -> Result<RunRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.initial_shares {
        cli.initial_shares = Some(v);
        cli.initial_investment = None;
    }
    if let Some(v) = payload.initial_investment {
        cli.initial_investment = Some(v);
        cli.initial_shares = None;
    }
    if payload.initial_shares.is_some() && payload.initial_investment.is_some() {
        return Err("initialShares and initialInvestment cannot be used together".to_string());
    }
    if let Some(v) = payload.initial_cost_basis {
        cli.initial_cost_basis = v;
    }
    if let Some(v) = payload.dividend_per_share {
        cli.dividend_per_share = v;
    }
    if let Some(v) = payload.reinvestment_price {
        cli.reinvestment_price = v;
    }
    if let Some(v) = payload.account_type {
        cli.account_type = v.into();
    }
    if let Some(v) = payload.federal_tax_rate {
        cli.federal_tax_rate = v;
    }
    if let Some(v) = payload.state_tax_rate {
        cli.state_tax_rate = v;
    }
    if let Some(v) = payload.defer_taxes {
        cli.defer_taxes = v;
    }
    if let Some(v) = payload.federal_penalty_rate {
        cli.federal_penalty_rate = Some(v);
    }
    if let Some(v) = payload.state_penalty_rate {
        cli.state_penalty_rate = Some(v);
    }
    if let Some(v) = payload.jurisdiction {
        cli.jurisdiction = Some(v);
    }
    if let Some(v) = payload.dca_amount {
        cli.dca_amount = v;
    }
    if let Some(v) = payload.withdrawal_amount {
        cli.withdrawal_amount = v;
    }
    if let Some(v) = payload.current_price {
        cli.current_price = Some(v);
    }
    if let Some(v) = payload.months {
        cli.months = v;
    }
    if let Some(v) = payload.start_date {
        cli.start_date = Some(v);
    }
    if let Some(v) = payload.due_date_offset {
        cli.due_date_offset = v;
    }
    if let Some(v) = payload.max_delay {
        cli.optimize_delay = Some(v);
    }

    build_request(cli, table)
}

fn default_cli_for_api() -> Cli {
    Cli {
        initial_shares: None,
        initial_investment: Some(100_000.0),
        initial_cost_basis: 250.0,
        dividend_per_share: 5.0,
        reinvestment_price: 250.0,
        account_type: CliAccountType::Taxable,
        federal_tax_rate: 20.0,
        state_tax_rate: 5.0,
        defer_taxes: false,
        federal_penalty_rate: None,
        state_penalty_rate: None,
        jurisdiction: None,
        penalty_table: None,
        dca_amount: 0.0,
        withdrawal_amount: 0.0,
        current_price: Some(400.0),
        months: 12,
        start_date: None,
        due_date_offset: 0,
        optimize_delay: None,
        view: CliView::Period,
        json: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        let mut cli = default_cli_for_api();
        cli.start_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        cli
    }

    fn table() -> TaxPenaltyTable {
        TaxPenaltyTable::default()
    }

    #[test]
    fn build_request_converts_investment_to_shares() {
        let request = build_request(sample_cli(), &table()).expect("valid request");
        let inputs = request.config.inputs();

        assert_approx(inputs.initial_shares, 400.0);
        assert_approx(inputs.federal_penalty_rate, 0.5);
        assert_approx(inputs.state_penalty_rate, 0.0);
        assert_eq!(inputs.duration_periods, 12);
        assert_eq!(
            request.start_date,
            NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date")
        );
    }

    #[test]
    fn build_request_rejects_both_share_sources() {
        let mut cli = sample_cli();
        cli.initial_shares = Some(10.0);

        let err = build_request(cli, &table()).expect_err("must reject both");
        assert!(err.contains("--initial-shares"));
    }

    #[test]
    fn build_request_requires_a_share_source() {
        let mut cli = sample_cli();
        cli.initial_investment = None;

        let err = build_request(cli, &table()).expect_err("must require shares");
        assert!(err.contains("--initial-investment"));
    }

    #[test]
    fn build_request_rejects_out_of_range_tax_rate() {
        let mut cli = sample_cli();
        cli.state_tax_rate = 101.0;

        let err = build_request(cli, &table()).expect_err("must reject rate");
        assert!(err.contains("--state-tax-rate"));
    }

    #[test]
    fn build_request_rejects_zero_months_and_zero_price() {
        let mut cli = sample_cli();
        cli.months = 0;
        let err = build_request(cli, &table()).expect_err("must reject months");
        assert!(err.contains("--months"));

        let mut cli = sample_cli();
        cli.reinvestment_price = 0.0;
        let err = build_request(cli, &table()).expect_err("must reject price");
        assert!(err.contains("--reinvestment-price"));
    }

    #[test]
    fn build_request_caps_months() {
        let mut cli = sample_cli();
        cli.months = MAX_DURATION_PERIODS;
        let request = build_request(cli, &table()).expect("longest run is valid");
        assert_eq!(request.config.inputs().duration_periods, MAX_DURATION_PERIODS);

        let mut cli = sample_cli();
        cli.months = MAX_DURATION_PERIODS + 1;
        let err = build_request(cli, &table()).expect_err("must reject months");
        assert!(err.contains("--months"));
    }

    #[test]
    fn oversized_months_payload_is_rejected_before_running() {
        let err = run_request_from_json(
            r#"{"months": 4000000000, "startDate": "2024-01-01"}"#,
            &table(),
        )
        .expect_err("must reject months");
        assert!(err.contains("--months must be <= 1200"));
    }

    #[tokio::test]
    async fn simulate_handler_answers_bad_request_for_oversized_months() {
        let state = AppState {
            penalty_table: Arc::new(table()),
        };
        let payload: SimulatePayload =
            serde_json::from_str(r#"{"months": 4000000000}"#).expect("json should parse");
        let response = simulate_handler_impl(&state, payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let payload: SimulatePayload = serde_json::from_str(
            r#"{"months": 24, "deferTaxes": true, "startDate": "2024-01-01", "maxDelay": 3}"#,
        )
        .expect("json should parse");
        let response = optimize_handler_impl(&state, payload).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&header::HeaderValue::from_static("no-store"))
        );
    }

    #[test]
    fn build_request_resolves_state_penalty_from_jurisdiction() {
        let mut cli = sample_cli();
        cli.jurisdiction = Some("ky".to_string());
        let request = build_request(cli, &table()).expect("valid request");
        assert_approx(request.config.inputs().state_penalty_rate, 2.0);

        let mut cli = sample_cli();
        cli.jurisdiction = Some("ky".to_string());
        cli.state_penalty_rate = Some(0.25);
        let request = build_request(cli, &table()).expect("valid request");
        assert_approx(request.config.inputs().state_penalty_rate, 0.25);
    }

    #[test]
    fn build_request_rejects_unknown_jurisdiction() {
        let mut cli = sample_cli();
        cli.jurisdiction = Some("XX".to_string());

        let err = build_request(cli, &table()).expect_err("must reject jurisdiction");
        assert!(err.contains("--jurisdiction"));
    }

    #[test]
    fn build_request_defaults_current_price_to_reinvestment_price() {
        let mut cli = sample_cli();
        cli.current_price = None;
        cli.reinvestment_price = 30.0;

        let request = build_request(cli, &table()).expect("valid request");
        assert_approx(request.config.inputs().current_price, 30.0);
    }

    #[test]
    fn build_request_rejects_oversized_delay_search() {
        let mut cli = sample_cli();
        cli.optimize_delay = Some(MAX_DELAY_MONTHS + 1);

        let err = build_request(cli, &table()).expect_err("must reject delay");
        assert!(err.contains("--optimize-delay"));
    }

    #[test]
    fn run_request_from_json_parses_web_keys() {
        let json = r#"{
          "initialShares": 1000,
          "dividendPerShare": 2,
          "reinvestmentPrice": 25,
          "accountType": "non-taxable",
          "deferTaxes": true,
          "state": "NY",
          "dcaAmount": 50,
          "withdrawalAmount": 10,
          "currentPrice": 27.5,
          "months": 36,
          "startDate": "2024-03-01",
          "dueDateOffset": 2,
          "maxDelay": 6
        }"#;
        let request = run_request_from_json(json, &table()).expect("json should parse");
        let inputs = request.config.inputs();

        assert_approx(inputs.initial_shares, 1_000.0);
        assert_approx(inputs.dividend_per_share, 2.0);
        assert_approx(inputs.reinvestment_price, 25.0);
        assert_eq!(inputs.account_type, AccountType::NonTaxable);
        assert!(inputs.defer_taxes);
        assert_approx(inputs.state_penalty_rate, 0.5);
        assert_approx(inputs.dca_amount, 50.0);
        assert_approx(inputs.withdrawal_amount, 10.0);
        assert_approx(inputs.current_price, 27.5);
        assert_eq!(inputs.duration_periods, 36);
        assert_eq!(inputs.due_date_offset_months, 2);
        assert_eq!(request.max_delay, Some(6));
        assert_eq!(
            request.start_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
        );
    }

    #[test]
    fn run_request_from_json_accepts_legacy_account_labels() {
        let json = r#"{ "accountType": "Deferred", "startDate": "2024-01-01" }"#;
        let request = run_request_from_json(json, &table()).expect("json should parse");
        assert_eq!(request.config.inputs().account_type, AccountType::TaxDeferred);
    }

    #[test]
    fn simulate_response_matches_single_period_scenario() {
        let json = r#"{
          "initialShares": 1000,
          "dividendPerShare": 2,
          "reinvestmentPrice": 25,
          "accountType": "taxable",
          "federalTaxRate": 20,
          "stateTaxRate": 5,
          "months": 1,
          "startDate": "2024-01-01"
        }"#;
        let request = run_request_from_json(json, &table()).expect("json should parse");
        let response = simulate_request(&request);

        assert_eq!(response.periods.len(), 1);
        assert_approx(response.periods[0].tax_owed, 500.0);
        assert_approx(response.periods[0].new_shares, 60.0);
        assert_approx(response.final_shares, 1_060.0);
        assert_eq!(response.tax_due_month, TaxDueMonth::April);
        let total = response.total.expect("total row");
        assert_approx(total.total_shares, 1_060.0);
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let request = build_request(sample_cli(), &table()).expect("valid request");
        let response = simulate_request(&request);
        let json = serde_json::to_string(&response).expect("response should serialize");

        assert!(json.contains("\"accountType\":\"taxable\""));
        assert!(json.contains("\"taxDueMonth\":\"april\""));
        assert!(json.contains("\"periods\""));
        assert!(json.contains("\"yearly\""));
        assert!(json.contains("\"total\""));
        assert!(json.contains("\"dividendIncome\""));
        assert!(json.contains("\"outstandingBalance\""));
        assert!(json.contains("\"date\":\"2024-01-01\""));
    }

    #[test]
    fn repeated_requests_serialize_identically() {
        let first = simulate_request(&build_request(sample_cli(), &table()).expect("valid"));
        let second = simulate_request(&build_request(sample_cli(), &table()).expect("valid"));
        assert_eq!(
            serde_json::to_string(&first).expect("serialize"),
            serde_json::to_string(&second).expect("serialize")
        );
    }

    #[test]
    fn optimize_response_reports_best_run_with_its_offset() {
        let mut cli = sample_cli();
        cli.defer_taxes = true;
        cli.months = 24;
        let request = build_request(cli, &table()).expect("valid request");
        let response = optimize_request(&request, 4).expect("must optimize");

        assert_eq!(response.candidates.len(), 5);
        assert_eq!(response.best_delay_months, 2);
        assert_eq!(response.best_run.due_date_offset_months, 2);
        assert_eq!(response.best_run.tax_due_month, TaxDueMonth::October);
        assert_approx(response.best_final_shares, response.best_run.final_shares);

        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"bestDelayMonths\":2"));
        assert!(json.contains("\"candidates\""));
    }

    #[test]
    fn hedge_payload_parses_camel_case_keys() {
        let payload: HedgePayload = serde_json::from_str(
            r#"{"sharesToHedge": 150, "premium": 2, "strike": 20, "exitPrice": 18}"#,
        )
        .expect("json should parse");
        let plan = size_hedge(
            payload.shares_to_hedge,
            payload.premium,
            payload.strike,
            payload.exit_price,
        )
        .expect("valid hedge");
        assert_eq!(plan.contracts, 2);
        assert_approx(plan.cost, 400.0);
        assert_approx(plan.payout, 400.0);
    }

    #[test]
    fn cost_basis_payload_parses_blocks() {
        let payload: CostBasisPayload = serde_json::from_str(
            r#"{"blocks": [{"shares": 10, "price": 5}, {"shares": 30, "price": 9}]}"#,
        )
        .expect("json should parse");
        let summary = weighted_cost_basis(&payload.blocks).expect("valid blocks");
        assert_approx(summary.average_price, 8.0);
    }

    #[test]
    fn rendered_tables_have_one_line_per_row_plus_header() {
        let request = build_request(sample_cli(), &table()).expect("valid request");
        let response = simulate_request(&request);

        let periods = render_view(&response, CliView::Period);
        assert_eq!(periods.lines().count(), 13);
        assert!(periods.starts_with(" Month"));

        let yearly = render_view(&response, CliView::Yearly);
        assert_eq!(yearly.lines().count(), 2);

        let total = render_view(&response, CliView::Total);
        assert!(total.contains("Total"));
    }
}
