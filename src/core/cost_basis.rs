use serde::{Deserialize, Serialize};

use super::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PurchaseBlock {
    pub shares: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBasisSummary {
    pub total_shares: f64,
    pub total_cost: f64,
    pub average_price: f64,
}

pub fn weighted_cost_basis(blocks: &[PurchaseBlock]) -> Result<CostBasisSummary, ConfigError> {
    let mut total_shares = 0.0;
    let mut total_cost = 0.0;
    for block in blocks {
        for (field, value) in [("shares", block.shares), ("price", block.price)] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field });
            }
            if value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        total_shares += block.shares;
        total_cost += block.shares * block.price;
    }

    let average_price = if total_shares > 0.0 {
        total_cost / total_shares
    } else {
        0.0
    };
    Ok(CostBasisSummary {
        total_shares,
        total_cost,
        average_price,
    })
}
