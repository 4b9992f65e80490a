use chrono::NaiveDate;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use tracing::info;

use super::engine::run_simulation;
use super::error::ConfigError;
use super::types::{PeriodResult, SimulationConfig};

pub const MAX_DELAY_MONTHS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayCandidate {
    pub delay_months: u32,
    pub final_shares: f64,
    pub total_taxes_paid: f64,
    pub total_penalties: f64,
}

#[derive(Debug, Clone)]
pub struct DelayOptimization {
    pub best_delay: u32,
    pub best_final_shares: f64,
    pub best_results: Vec<PeriodResult>,
    pub candidates: Vec<DelayCandidate>,
}

/// Ties go to the smallest offset.
pub fn optimize_delay(
    config: &SimulationConfig,
    start_date: NaiveDate,
    max_delay_months: u32,
) -> Result<DelayOptimization, ConfigError> {
    if max_delay_months > MAX_DELAY_MONTHS {
        return Err(ConfigError::DelayRangeTooLarge {
            max: max_delay_months,
            limit: MAX_DELAY_MONTHS,
        });
    }

    let mut runs = (0..=max_delay_months)
        .into_par_iter()
        .map(|delay| {
            let candidate_config = config.with_due_date_offset(delay);
            (delay, run_simulation(&candidate_config, start_date))
        })
        .collect::<Vec<_>>();

    let candidates = runs
        .iter()
        .map(|(delay, results)| evaluate_candidate(*delay, results))
        .collect::<Vec<_>>();

    let mut best_index = 0;
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.final_shares > candidates[best_index].final_shares {
            best_index = idx;
        }
    }

    let best = candidates[best_index];
    let best_results = runs.swap_remove(best_index).1;
    info!(
        best_delay = best.delay_months,
        best_final_shares = best.final_shares,
        candidates = candidates.len(),
        "delay search finished"
    );

    Ok(DelayOptimization {
        best_delay: best.delay_months,
        best_final_shares: best.final_shares,
        best_results,
        candidates,
    })
}

fn evaluate_candidate(delay_months: u32, results: &[PeriodResult]) -> DelayCandidate {
    DelayCandidate {
        delay_months,
        final_shares: results.last().map(|r| r.total_shares).unwrap_or(0.0),
        total_taxes_paid: results.iter().map(|r| r.tax_paid).sum(),
        total_penalties: results.iter().map(|r| r.penalty).sum(),
    }
}
