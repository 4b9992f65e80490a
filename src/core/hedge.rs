use serde::Serialize;

use super::error::ConfigError;

pub const CONTRACT_SIZE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HedgePlan {
    pub contracts: u64,
    pub cost: f64,
    pub payout: f64,
    pub net: f64,
}

pub fn size_hedge(
    shares_to_hedge: f64,
    premium: f64,
    strike: f64,
    exit_price: f64,
) -> Result<HedgePlan, ConfigError> {
    for (field, value) in [
        ("shares_to_hedge", shares_to_hedge),
        ("premium", premium),
        ("strike", strike),
        ("exit_price", exit_price),
    ] {
        if !value.is_finite() {
            return Err(ConfigError::NotFinite { field });
        }
        if value < 0.0 {
            return Err(ConfigError::Negative { field, value });
        }
    }

    let contracts = (shares_to_hedge / CONTRACT_SIZE).ceil() as u64;
    let covered = contracts as f64 * CONTRACT_SIZE;
    let cost = covered * premium;
    let payout = covered * (strike - exit_price);
    Ok(HedgePlan {
        contracts,
        cost,
        payout,
        net: payout - cost,
    })
}
