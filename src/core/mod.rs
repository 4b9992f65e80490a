mod aggregate;
mod cost_basis;
mod engine;
mod error;
mod hedge;
mod ledger;
mod optimizer;
mod penalty;
mod types;

pub use aggregate::ResultAggregator;
pub use cost_basis::{CostBasisSummary, PurchaseBlock, weighted_cost_basis};
pub use engine::{SimulationState, period_date, run_simulation, step};
pub use error::{ConfigError, PenaltyTableError};
pub use hedge::{CONTRACT_SIZE, HedgePlan, size_hedge};
pub use ledger::{TaxLedger, TaxYearEntry};
pub use optimizer::{DelayCandidate, DelayOptimization, MAX_DELAY_MONTHS, optimize_delay};
pub use penalty::{PENALTY_TABLE_ENV, TaxPenaltyTable};
pub use types::{
    AccountType, Inputs, MAX_DURATION_PERIODS, PeriodResult, SimulationConfig, SummaryRow,
    TaxDueMonth, TaxTreatment,
};
