use chrono::{Months, NaiveDate};
use serde::Serialize;

use super::error::ConfigError;

pub const MAX_DURATION_PERIODS: u32 = 1_200;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountType {
    Taxable,
    NonTaxable,
    TaxDeferred,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxDueMonth {
    April,
    October,
}

impl TaxDueMonth {
    pub fn month(self) -> u32 {
        match self {
            TaxDueMonth::April => 4,
            TaxDueMonth::October => 10,
        }
    }

    /// Date on which the liability for `tax_year` falls due: the 15th of the
    /// due month in the following year, pushed back by `offset_months`.
    pub fn due_date(self, tax_year: i32, offset_months: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(tax_year + 1, self.month(), 15)?
            .checked_add_months(Months::new(offset_months))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaxTreatment {
    Exempt,
    Immediate,
    Deferred { due_month: TaxDueMonth },
}

impl TaxTreatment {
    pub fn for_account(account_type: AccountType, defer_taxes: bool) -> Self {
        match (account_type, defer_taxes) {
            (AccountType::NonTaxable | AccountType::TaxDeferred, _) => TaxTreatment::Exempt,
            (AccountType::Taxable, false) => TaxTreatment::Immediate,
            (AccountType::Taxable, true) => TaxTreatment::Deferred {
                due_month: TaxDueMonth::October,
            },
        }
    }
}

/// Rates are percentages; penalty rates are percent per month.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub initial_shares: f64,
    pub initial_cost_basis: f64,
    pub dividend_per_share: f64,
    pub reinvestment_price: f64,
    pub account_type: AccountType,
    pub federal_tax_rate: f64,
    pub state_tax_rate: f64,
    pub defer_taxes: bool,
    pub federal_penalty_rate: f64,
    pub state_penalty_rate: f64,
    pub dca_amount: f64,
    pub withdrawal_amount: f64,
    pub current_price: f64,
    pub duration_periods: u32,
    pub due_date_offset_months: u32,
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    inputs: Inputs,
}

impl SimulationConfig {
    pub fn new(inputs: Inputs) -> Result<Self, ConfigError> {
        validate_inputs(&inputs)?;
        Ok(Self { inputs })
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn tax_treatment(&self) -> TaxTreatment {
        TaxTreatment::for_account(self.inputs.account_type, self.inputs.defer_taxes)
    }

    pub fn tax_due_month(&self) -> TaxDueMonth {
        if self.inputs.defer_taxes {
            TaxDueMonth::October
        } else {
            TaxDueMonth::April
        }
    }

    pub fn combined_tax_rate(&self) -> f64 {
        match self.inputs.account_type {
            AccountType::Taxable => {
                (self.inputs.federal_tax_rate + self.inputs.state_tax_rate) / 100.0
            }
            AccountType::NonTaxable | AccountType::TaxDeferred => 0.0,
        }
    }

    pub fn combined_penalty_rate(&self) -> f64 {
        (self.inputs.federal_penalty_rate + self.inputs.state_penalty_rate) / 100.0
    }

    pub fn with_due_date_offset(&self, offset_months: u32) -> Self {
        let mut inputs = self.inputs.clone();
        inputs.due_date_offset_months = offset_months;
        Self { inputs }
    }
}

fn validate_inputs(inputs: &Inputs) -> Result<(), ConfigError> {
    for (field, value) in [
        ("initial_shares", inputs.initial_shares),
        ("initial_cost_basis", inputs.initial_cost_basis),
        ("dividend_per_share", inputs.dividend_per_share),
        ("reinvestment_price", inputs.reinvestment_price),
        ("federal_tax_rate", inputs.federal_tax_rate),
        ("state_tax_rate", inputs.state_tax_rate),
        ("federal_penalty_rate", inputs.federal_penalty_rate),
        ("state_penalty_rate", inputs.state_penalty_rate),
        ("dca_amount", inputs.dca_amount),
        ("withdrawal_amount", inputs.withdrawal_amount),
        ("current_price", inputs.current_price),
    ] {
        if !value.is_finite() {
            return Err(ConfigError::NotFinite { field });
        }
    }

    for (field, value) in [
        ("initial_shares", inputs.initial_shares),
        ("dividend_per_share", inputs.dividend_per_share),
        ("dca_amount", inputs.dca_amount),
        ("withdrawal_amount", inputs.withdrawal_amount),
        ("current_price", inputs.current_price),
    ] {
        if value < 0.0 {
            return Err(ConfigError::Negative { field, value });
        }
    }

    for (field, value) in [
        ("initial_cost_basis", inputs.initial_cost_basis),
        ("reinvestment_price", inputs.reinvestment_price),
    ] {
        if value <= 0.0 {
            return Err(ConfigError::NotPositive { field, value });
        }
    }

    for (field, value) in [
        ("federal_tax_rate", inputs.federal_tax_rate),
        ("state_tax_rate", inputs.state_tax_rate),
        ("federal_penalty_rate", inputs.federal_penalty_rate),
        ("state_penalty_rate", inputs.state_penalty_rate),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::RateOutOfRange { field, value });
        }
    }

    if inputs.duration_periods == 0 {
        return Err(ConfigError::NoPeriods);
    }
    if inputs.duration_periods > MAX_DURATION_PERIODS {
        return Err(ConfigError::TooManyPeriods {
            periods: inputs.duration_periods,
            limit: MAX_DURATION_PERIODS,
        });
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodResult {
    pub period: u32,
    pub date: NaiveDate,
    pub dividend_income: f64,
    pub dca_contribution: f64,
    pub withdrawal: f64,
    pub tax_owed: f64,
    pub cumulative_tax_owed: f64,
    pub tax_paid: f64,
    pub penalty: f64,
    pub outstanding_balance: f64,
    pub cash_reinvested: f64,
    pub new_shares: f64,
    pub cumulative_new_shares: f64,
    pub total_shares: f64,
    pub portfolio_value: f64,
    pub reinvestment_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub year: Option<i32>,
    pub first_period: u32,
    pub last_period: u32,
    pub periods: u32,
    pub dividend_income: f64,
    pub dca_contribution: f64,
    pub withdrawal: f64,
    pub tax_owed: f64,
    pub tax_paid: f64,
    pub penalty: f64,
    pub cash_reinvested: f64,
    pub new_shares: f64,
    pub reinvestment_profit: f64,
    pub cumulative_new_shares: f64,
    pub total_shares: f64,
    pub outstanding_balance: f64,
    pub portfolio_value: f64,
}
