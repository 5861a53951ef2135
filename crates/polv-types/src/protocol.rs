use crate::id::MinerId;
use crate::job::{Constraints, RoundType};
use crate::position::{Inventory, Position};
use serde::{Deserialize, Serialize};

/// Rebalance request sent to a miner at every checkpoint.
///
/// Carries the miner's full simulated context so the miner is stateless
/// between checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceQuery {
    pub job_id: String,
    pub vault_address: String,
    pub pair_address: String,
    pub chain_id: u64,
    pub round_id: String,
    pub round_type: RoundType,
    pub block_number: u64,
    /// Current price, token1 per token0.
    pub current_price: f64,
    pub current_positions: Vec<Position>,
    pub inventory_remaining: Inventory,
    pub rebalances_so_far: u32,
    pub constraints: Constraints,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerMetadata {
    pub version: String,
    pub model_info: String,
}

/// Miner's answer to a [`RebalanceQuery`].
///
/// `accepted = false` opts the miner out of the entire round; the
/// coordinator must not query it again. `accepted = true` with
/// `desired_positions` set-equal to the current positions is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceResponse {
    pub miner_id: MinerId,
    pub accepted: bool,
    pub refusal_reason: Option<String>,
    pub desired_positions: Vec<Position>,
    pub miner_metadata: Option<MinerMetadata>,
}

impl RebalanceResponse {
    pub fn refusal(miner_id: MinerId, reason: impl Into<String>) -> Self {
        Self {
            miner_id,
            accepted: false,
            refusal_reason: Some(reason.into()),
            desired_positions: Vec::new(),
            miner_metadata: None,
        }
    }

    pub fn rebalance(miner_id: MinerId, desired_positions: Vec<Position>) -> Self {
        Self {
            miner_id,
            accepted: true,
            refusal_reason: None,
            desired_positions,
            miner_metadata: None,
        }
    }

    /// Structural validity: a refusal carries no positions, an acceptance
    /// carries well-formed ones. Anything else is a malformed response.
    pub fn is_well_formed(&self) -> bool {
        if !self.accepted {
            return self.desired_positions.is_empty();
        }
        self.desired_positions
            .iter()
            .all(|p| p.tick_upper > p.tick_lower)
    }
}
