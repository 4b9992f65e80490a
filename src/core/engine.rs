use chrono::{Datelike, Months, NaiveDate};
use tracing::debug;

use super::ledger::TaxLedger;
use super::types::{PeriodResult, SimulationConfig, TaxDueMonth, TaxTreatment};

#[derive(Debug, Clone)]
pub struct SimulationState {
    pub shares: f64,
    pub cumulative_new_shares: f64,
    pub cumulative_dividends: f64,
    pub cumulative_tax_owed: f64,
    pub cumulative_taxes_paid: f64,
    pub cumulative_penalties: f64,
    pub ledger: TaxLedger,
}

impl SimulationState {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            shares: config.inputs().initial_shares,
            cumulative_new_shares: 0.0,
            cumulative_dividends: 0.0,
            cumulative_tax_owed: 0.0,
            cumulative_taxes_paid: 0.0,
            cumulative_penalties: 0.0,
            ledger: TaxLedger::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Settlement {
    tax_paid: f64,
    penalty: f64,
}

pub fn run_simulation(config: &SimulationConfig, start_date: NaiveDate) -> Vec<PeriodResult> {
    let periods = config.inputs().duration_periods;
    debug!(
        periods,
        %start_date,
        account_type = ?config.inputs().account_type,
        defer_taxes = config.inputs().defer_taxes,
        due_offset = config.inputs().due_date_offset_months,
        "starting simulation run"
    );

    let mut state = SimulationState::new(config);
    let mut results = Vec::with_capacity(periods as usize);
    for period in 1..=periods {
        let date = period_date(start_date, period);
        results.push(step(&mut state, config, period, date));
    }

    debug!(
        final_shares = state.shares,
        taxes_paid = state.cumulative_taxes_paid,
        penalties = state.cumulative_penalties,
        outstanding = state.ledger.total_outstanding(),
        "simulation run finished"
    );
    results
}

pub fn period_date(start_date: NaiveDate, period: u32) -> NaiveDate {
    start_date
        .checked_add_months(Months::new(period.saturating_sub(1)))
        .unwrap_or(NaiveDate::MAX)
}

pub fn step(
    state: &mut SimulationState,
    config: &SimulationConfig,
    period: u32,
    date: NaiveDate,
) -> PeriodResult {
    let inputs = config.inputs();
    let treatment = config.tax_treatment();

    let dividend_income = state.shares * inputs.dividend_per_share;
    let gross_cash = dividend_income + inputs.dca_amount;
    let tax_owed = match treatment {
        TaxTreatment::Exempt => 0.0,
        TaxTreatment::Immediate | TaxTreatment::Deferred { .. } => {
            dividend_income * config.combined_tax_rate()
        }
    };

    let tax_year = date.year();
    state.ledger.accrue(tax_year, tax_owed);

    let settlement = match treatment {
        TaxTreatment::Exempt => Settlement::default(),
        TaxTreatment::Immediate => {
            state.ledger.settle(tax_year, tax_owed);
            Settlement {
                tax_paid: tax_owed,
                penalty: 0.0,
            }
        }
        TaxTreatment::Deferred { due_month } => settle_due_years(
            &mut state.ledger,
            config,
            due_month,
            date,
            (gross_cash - inputs.withdrawal_amount).max(0.0),
        ),
    };

    let reinvestable = (gross_cash - inputs.withdrawal_amount - settlement.tax_paid).max(0.0);
    let new_shares = if inputs.reinvestment_price > 0.0 {
        reinvestable / inputs.reinvestment_price
    } else {
        0.0
    };

    state.shares += new_shares;
    state.cumulative_new_shares += new_shares;
    state.cumulative_dividends += dividend_income;
    state.cumulative_tax_owed += tax_owed;
    state.cumulative_taxes_paid += settlement.tax_paid;
    state.cumulative_penalties += settlement.penalty;

    PeriodResult {
        period,
        date,
        dividend_income,
        dca_contribution: inputs.dca_amount,
        withdrawal: inputs.withdrawal_amount,
        tax_owed,
        cumulative_tax_owed: state.cumulative_tax_owed,
        tax_paid: settlement.tax_paid,
        penalty: settlement.penalty,
        outstanding_balance: state.ledger.total_outstanding(),
        cash_reinvested: reinvestable,
        new_shares,
        cumulative_new_shares: state.cumulative_new_shares,
        total_shares: state.shares,
        portfolio_value: state.shares * inputs.current_price,
        reinvestment_profit: new_shares * (inputs.current_price - inputs.reinvestment_price),
    }
}

// Past-due balances are charged the monthly penalty even when no cash is available.
fn settle_due_years(
    ledger: &mut TaxLedger,
    config: &SimulationConfig,
    due_month: TaxDueMonth,
    date: NaiveDate,
    mut available: f64,
) -> Settlement {
    let offset = config.inputs().due_date_offset_months;
    let penalty_rate = config.combined_penalty_rate();
    let mut settlement = Settlement::default();

    for year in ledger.open_years() {
        let Some(due) = due_month.due_date(year, offset) else {
            continue;
        };
        if date < due {
            // Later years fall due later still.
            break;
        }

        let outstanding = ledger.outstanding(year);
        let penalty = if date > due {
            outstanding * penalty_rate
        } else {
            0.0
        };
        let amount_due = outstanding + penalty;
        let payment = available.min(amount_due);
        available -= payment;

        ledger.settle(year, (payment - penalty).max(0.0));
        settlement.tax_paid += payment;
        settlement.penalty += penalty;
    }

    settlement
}
