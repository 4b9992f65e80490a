use chrono::Datelike;

use super::types::{PeriodResult, SummaryRow};

// Flow fields are summed over a group, stock fields take the group's last value.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    periods: Vec<PeriodResult>,
}

impl ResultAggregator {
    pub fn new(periods: Vec<PeriodResult>) -> Self {
        Self { periods }
    }

    pub fn periods(&self) -> &[PeriodResult] {
        &self.periods
    }

    pub fn into_periods(self) -> Vec<PeriodResult> {
        self.periods
    }

    pub fn yearly(&self) -> Vec<SummaryRow> {
        let mut rows = Vec::new();
        let mut current: Option<(i32, RollupAccumulator)> = None;

        for period in &self.periods {
            let year = period.date.year();
            let same_year = matches!(&current, Some((acc_year, _)) if *acc_year == year);
            if !same_year {
                if let Some((acc_year, acc)) = current.take() {
                    rows.extend(acc.finish(Some(acc_year)));
                }
                current = Some((year, RollupAccumulator::default()));
            }
            if let Some((_, acc)) = current.as_mut() {
                acc.push(period);
            }
        }

        if let Some((acc_year, acc)) = current {
            rows.extend(acc.finish(Some(acc_year)));
        }
        rows
    }

    pub fn total(&self) -> Option<SummaryRow> {
        let mut acc = RollupAccumulator::default();
        for period in &self.periods {
            acc.push(period);
        }
        acc.finish(None)
    }

    pub fn final_shares(&self) -> Option<f64> {
        self.periods.last().map(|period| period.total_shares)
    }
}

#[derive(Debug, Default)]
struct RollupAccumulator {
    first_period: Option<u32>,
    periods: u32,
    dividend_income: f64,
    dca_contribution: f64,
    withdrawal: f64,
    tax_owed: f64,
    tax_paid: f64,
    penalty: f64,
    cash_reinvested: f64,
    new_shares: f64,
    reinvestment_profit: f64,
    last: Option<PeriodResult>,
}

impl RollupAccumulator {
    fn push(&mut self, period: &PeriodResult) {
        self.first_period.get_or_insert(period.period);
        self.periods += 1;
        self.dividend_income += period.dividend_income;
        self.dca_contribution += period.dca_contribution;
        self.withdrawal += period.withdrawal;
        self.tax_owed += period.tax_owed;
        self.tax_paid += period.tax_paid;
        self.penalty += period.penalty;
        self.cash_reinvested += period.cash_reinvested;
        self.new_shares += period.new_shares;
        self.reinvestment_profit += period.reinvestment_profit;
        self.last = Some(period.clone());
    }

    fn finish(self, year: Option<i32>) -> Option<SummaryRow> {
        let last = self.last?;
        Some(SummaryRow {
            year,
            first_period: self.first_period.unwrap_or(last.period),
            last_period: last.period,
            periods: self.periods,
            dividend_income: self.dividend_income,
            dca_contribution: self.dca_contribution,
            withdrawal: self.withdrawal,
            tax_owed: self.tax_owed,
            tax_paid: self.tax_paid,
            penalty: self.penalty,
            cash_reinvested: self.cash_reinvested,
            new_shares: self.new_shares,
            reinvestment_profit: self.reinvestment_profit,
            cumulative_new_shares: last.cumulative_new_shares,
            total_shares: last.total_shares,
            outstanding_balance: last.outstanding_balance,
            portfolio_value: last.portfolio_value,
        })
    }
}
