use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::PenaltyTableError;

pub const PENALTY_TABLE_ENV: &str = "DRIP_PENALTY_TABLE";

const FEDERAL_PENALTY_RATE: f64 = 0.5;

// Percent per month. States without an income tax on dividends carry zero.
const STATE_PENALTY_RATES: &[(&str, f64)] = &[
    ("AK", 0.0),
    ("AL", 1.0),
    ("AR", 1.0),
    ("AZ", 0.5),
    ("CA", 0.5),
    ("CO", 0.5),
    ("CT", 1.0),
    ("DC", 0.5),
    ("DE", 0.5),
    ("FL", 0.0),
    ("GA", 0.5),
    ("HI", 1.0),
    ("IA", 1.0),
    ("ID", 0.5),
    ("IL", 1.0),
    ("IN", 1.0),
    ("KS", 1.0),
    ("KY", 2.0),
    ("LA", 0.5),
    ("MA", 0.5),
    ("MD", 1.0),
    ("ME", 1.0),
    ("MI", 0.5),
    ("MN", 1.0),
    ("MO", 0.5),
    ("MS", 0.5),
    ("MT", 0.5),
    ("NC", 1.0),
    ("ND", 0.5),
    ("NE", 0.5),
    ("NH", 0.0),
    ("NJ", 0.5),
    ("NM", 2.0),
    ("NV", 0.0),
    ("NY", 0.5),
    ("OH", 0.5),
    ("OK", 0.5),
    ("OR", 0.5),
    ("PA", 0.5),
    ("RI", 0.5),
    ("SC", 0.5),
    ("SD", 0.0),
    ("TN", 0.0),
    ("TX", 0.0),
    ("UT", 0.5),
    ("VA", 0.5),
    ("VT", 1.0),
    ("WA", 0.0),
    ("WI", 0.5),
    ("WV", 0.5),
    ("WY", 0.0),
];

/// Monthly penalty rates. The built-in values can be replaced wholesale
/// from a TOML file:
///
/// ```toml
/// federal = 0.5
///
/// [states]
/// CA = 0.5
/// NY = 0.5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxPenaltyTable {
    #[serde(default = "default_federal_rate")]
    pub federal: f64,
    #[serde(default)]
    pub states: BTreeMap<String, f64>,
}

fn default_federal_rate() -> f64 {
    FEDERAL_PENALTY_RATE
}

impl Default for TaxPenaltyTable {
    fn default() -> Self {
        Self {
            federal: FEDERAL_PENALTY_RATE,
            states: STATE_PENALTY_RATES
                .iter()
                .map(|(code, rate)| (code.to_string(), *rate))
                .collect(),
        }
    }
}

impl TaxPenaltyTable {
    pub fn from_toml_str(contents: &str) -> Result<Self, PenaltyTableError> {
        let raw: Self = toml::from_str(contents)?;
        raw.normalized()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PenaltyTableError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_env() -> Self {
        let Ok(path) = std::env::var(PENALTY_TABLE_ENV) else {
            debug!("using built-in penalty table");
            return Self::default();
        };

        Self::load(&path).unwrap_or_else(|e| {
            warn!("ignoring penalty table {path}: {e}");
            Self::default()
        })
    }

    pub fn federal_rate(&self) -> f64 {
        self.federal
    }

    pub fn state_rate(&self, code: &str) -> Result<f64, PenaltyTableError> {
        let key = code.trim().to_ascii_uppercase();
        self.states
            .get(&key)
            .copied()
            .ok_or_else(|| PenaltyTableError::UnknownJurisdiction(code.to_string()))
    }

    fn normalized(self) -> Result<Self, PenaltyTableError> {
        check_rate("federal", self.federal)?;
        let mut states = BTreeMap::new();
        for (code, rate) in self.states {
            let key = code.trim().to_ascii_uppercase();
            check_rate(&key, rate)?;
            states.insert(key, rate);
        }
        Ok(Self {
            federal: self.federal,
            states,
        })
    }
}

fn check_rate(jurisdiction: &str, rate: f64) -> Result<(), PenaltyTableError> {
    if rate.is_finite() && (0.0..=100.0).contains(&rate) {
        Ok(())
    } else {
        Err(PenaltyTableError::InvalidRate {
            jurisdiction: jurisdiction.to_string(),
            rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_table_covers_states_and_dc() {
        let table = TaxPenaltyTable::default();
        assert_eq!(table.states.len(), 51);
        assert_eq!(table.federal_rate(), 0.5);
        assert_eq!(table.state_rate("TX").expect("known"), 0.0);
        assert_eq!(table.state_rate("ky").expect("known"), 2.0);
        assert_eq!(table.state_rate(" ca ").expect("known"), 0.5);
    }

    #[test]
    fn unknown_jurisdiction_is_an_error() {
        let err = TaxPenaltyTable::default()
            .state_rate("ZZ")
            .expect_err("unknown code");
        assert!(matches!(err, PenaltyTableError::UnknownJurisdiction(code) if code == "ZZ"));
    }

    #[test]
    fn toml_table_replaces_built_in_data() {
        let table = TaxPenaltyTable::from_toml_str(
            r#"
            federal = 0.25

            [states]
            ca = 0.75
            Ny = 1.5
            "#,
        )
        .expect("valid toml");

        assert_eq!(table.federal_rate(), 0.25);
        assert_eq!(table.states.len(), 2);
        assert_eq!(table.state_rate("CA").expect("known"), 0.75);
        assert_eq!(table.state_rate("ny").expect("known"), 1.5);
        assert!(table.state_rate("TX").is_err());
    }

    #[test]
    fn toml_table_defaults_federal_rate() {
        let table = TaxPenaltyTable::from_toml_str("[states]\nOR = 0.5\n").expect("valid toml");
        assert_eq!(table.federal_rate(), 0.5);
    }

    #[test]
    fn toml_table_rejects_negative_rate() {
        let err = TaxPenaltyTable::from_toml_str("federal = 0.5\n[states]\nCA = -1.0\n")
            .expect_err("negative rate");
        assert!(matches!(err, PenaltyTableError::InvalidRate { jurisdiction, .. } if jurisdiction == "CA"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = TaxPenaltyTable::from_toml_str("federal = \"high\"").expect_err("bad type");
        assert!(matches!(err, PenaltyTableError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = TaxPenaltyTable::load("/nonexistent/drip/penalties.toml").expect_err("missing");
        assert!(matches!(err, PenaltyTableError::Io(_)));
    }
}
