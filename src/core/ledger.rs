use std::collections::BTreeMap;

use serde::Serialize;

const SETTLE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxYearEntry {
    pub owed: f64,
    pub paid: f64,
}

impl TaxYearEntry {
    pub fn outstanding(self) -> f64 {
        (self.owed - self.paid).max(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaxLedger {
    years: BTreeMap<i32, TaxYearEntry>,
}

impl TaxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accrue(&mut self, year: i32, amount: f64) {
        let entry = self.years.entry(year).or_default();
        if amount.is_finite() && amount > 0.0 {
            entry.owed += amount;
        }
        debug_assert_entry(year, *entry);
    }

    pub fn settle(&mut self, year: i32, payment: f64) -> f64 {
        let Some(entry) = self.years.get_mut(&year) else {
            return 0.0;
        };
        if !payment.is_finite() || payment <= 0.0 {
            return 0.0;
        }

        let outstanding = entry.outstanding();
        let applied = payment.min(outstanding);
        entry.paid += applied;
        if entry.owed - entry.paid < SETTLE_EPSILON {
            entry.paid = entry.owed;
        }
        debug_assert_entry(year, *entry);
        applied
    }

    pub fn outstanding(&self, year: i32) -> f64 {
        self.years
            .get(&year)
            .map(|entry| entry.outstanding())
            .unwrap_or(0.0)
    }

    pub fn total_outstanding(&self) -> f64 {
        self.years.values().map(|entry| entry.outstanding()).sum()
    }

    pub fn entry(&self, year: i32) -> Option<TaxYearEntry> {
        self.years.get(&year).copied()
    }

    pub fn open_years(&self) -> Vec<i32> {
        self.years
            .iter()
            .filter(|(_, entry)| entry.outstanding() > 0.0)
            .map(|(year, _)| *year)
            .collect()
    }

    pub fn years(&self) -> impl Iterator<Item = (i32, TaxYearEntry)> + '_ {
        self.years.iter().map(|(year, entry)| (*year, *entry))
    }
}

fn debug_assert_entry(year: i32, entry: TaxYearEntry) {
    debug_assert!(
        entry.paid >= 0.0 && entry.owed >= entry.paid,
        "ledger invariant violated for {year}: owed {} paid {}",
        entry.owed,
        entry.paid
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn accrue_and_settle_track_outstanding_per_year() {
        let mut ledger = TaxLedger::new();
        ledger.accrue(2024, 100.0);
        ledger.accrue(2024, 50.0);
        ledger.accrue(2025, 30.0);

        assert_approx(ledger.outstanding(2024), 150.0);
        assert_approx(ledger.settle(2024, 40.0), 40.0);
        assert_approx(ledger.outstanding(2024), 110.0);
        assert_approx(ledger.outstanding(2025), 30.0);
        assert_approx(ledger.total_outstanding(), 140.0);
    }

    #[test]
    fn settle_clamps_to_outstanding_and_reports_applied_amount() {
        let mut ledger = TaxLedger::new();
        ledger.accrue(2024, 100.0);

        assert_approx(ledger.settle(2024, 250.0), 100.0);
        let entry = ledger.entry(2024).expect("entry kept");
        assert_approx(entry.owed, 100.0);
        assert_approx(entry.paid, 100.0);
        assert_approx(ledger.outstanding(2024), 0.0);
    }

    #[test]
    fn settling_zero_balance_is_a_no_op() {
        let mut ledger = TaxLedger::new();
        ledger.accrue(2024, 10.0);
        ledger.settle(2024, 10.0);

        assert_approx(ledger.settle(2024, 5.0), 0.0);
        assert_approx(ledger.settle(1999, 5.0), 0.0);
        assert!(ledger.entry(2024).is_some());
        assert!(ledger.entry(1999).is_none());
    }

    #[test]
    fn negative_and_non_finite_amounts_are_ignored() {
        let mut ledger = TaxLedger::new();
        ledger.accrue(2024, -5.0);
        ledger.accrue(2024, f64::NAN);
        ledger.accrue(2024, 20.0);

        assert_approx(ledger.settle(2024, -3.0), 0.0);
        assert_approx(ledger.settle(2024, f64::INFINITY), 0.0);
        assert_approx(ledger.outstanding(2024), 20.0);
    }

    #[test]
    fn dust_left_by_float_rounding_is_closed() {
        let mut ledger = TaxLedger::new();
        ledger.accrue(2024, 0.1);
        ledger.accrue(2024, 0.2);
        ledger.settle(2024, 0.3 - 1e-12);

        assert_eq!(ledger.outstanding(2024), 0.0);
        assert!(ledger.open_years().is_empty());
    }

    #[test]
    fn open_years_are_ascending_and_skip_paid_years() {
        let mut ledger = TaxLedger::new();
        ledger.accrue(2026, 1.0);
        ledger.accrue(2024, 1.0);
        ledger.accrue(2025, 1.0);
        ledger.settle(2025, 1.0);

        assert_eq!(ledger.open_years(), vec![2024, 2026]);
        assert_eq!(ledger.years().count(), 3);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_random_accrue_settle_sequences_keep_owed_ge_paid_ge_zero(
            ops in proptest::collection::vec((0u8..2, 2020i32..2026, 0u32..100_000), 1..60)
        ) {
            let mut ledger = TaxLedger::new();
            for (kind, year, cents) in ops {
                let amount = cents as f64 / 100.0;
                if kind == 0 {
                    ledger.accrue(year, amount);
                } else {
                    let before = ledger.outstanding(year);
                    let applied = ledger.settle(year, amount);
                    prop_assert!(applied >= 0.0);
                    prop_assert!(applied <= before + EPS);
                }

                for (_, entry) in ledger.years() {
                    prop_assert!(entry.paid >= 0.0);
                    prop_assert!(entry.owed + EPS >= entry.paid);
                    prop_assert!(entry.outstanding() >= 0.0);
                }
            }
        }
    }
}
