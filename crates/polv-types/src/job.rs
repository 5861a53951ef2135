use crate::id::MinerId;
use crate::position::{Inventory, MinerPortfolio, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Optimization target for a job. Only proof-of-liquidity today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    #[default]
    #[serde(rename = "PoL")]
    PoL,
}

/// Per-round validity constraints. Violating strategies score 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Maximum tolerated impermanent loss, as a fraction in `[0, 1]`.
    pub max_il: f64,
    pub min_tick_width: i32,
    pub max_rebalances: u32,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_il: 0.10,
            min_tick_width: 60,
            max_rebalances: 4,
        }
    }
}

/// A managed vault/pair the coordinator runs rounds for.
///
/// Created from configuration; immutable except `active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub pair_address: String,
    pub vault_address: String,
    pub chain_id: u64,
    pub round_duration_secs: u64,
    /// Blocks between rebalance checkpoints within a round.
    pub checkpoint_interval: u64,
    /// Simulated block span of one round.
    pub blocks_per_round: u64,
    /// Pool fee tier as a fraction (0.003 = 0.3%).
    pub fee_rate: f64,
    pub target: Target,
    pub constraints: Constraints,
    pub active: bool,
}

impl Job {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }

    /// Soft deadline for a round of this job.
    pub fn round_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.round_duration_secs as f64 * 1.25)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundType {
    Eval,
    Live,
}

impl RoundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundType::Eval => "eval",
            RoundType::Live => "live",
        }
    }
}

impl fmt::Display for RoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Active,
    Completed,
    Aborted,
}

/// One scored forward simulation for a job. Frozen once executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub round_id: String,
    pub job_id: String,
    pub round_type: RoundType,
    /// Per-job, per-type sequence number; restored from the store on restart.
    pub round_number: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RoundStatus,
    pub constraints: Constraints,
    pub initial_inventory: Inventory,
    pub initial_positions: Vec<Position>,
    pub winner: Option<MinerId>,
}

impl Round {
    pub fn new(
        job: &Job,
        round_type: RoundType,
        round_number: u64,
        start_block: u64,
        started_at: DateTime<Utc>,
        initial_inventory: Inventory,
        initial_positions: Vec<Position>,
    ) -> Self {
        let round_id = format!(
            "{}_{}_{}_{}",
            job.job_id,
            round_type,
            round_number,
            started_at.timestamp()
        );
        Self {
            round_id,
            job_id: job.job_id.clone(),
            round_type,
            round_number,
            start_block,
            end_block: start_block + job.blocks_per_round,
            started_at,
            finished_at: None,
            status: RoundStatus::Active,
            constraints: job.constraints,
            initial_inventory,
            initial_positions,
            winner: None,
        }
    }
}

/// One applied rebalance inside a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceDecision {
    pub block: u64,
    pub price: f64,
    pub old_positions: Vec<Position>,
    pub new_positions: Vec<Position>,
    pub inventory_after: Inventory,
}

/// A miner's outcome for one round, keyed by `round_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub round_id: String,
    pub miner_id: MinerId,
    pub accepted: bool,
    pub refusal_reason: Option<String>,
    /// Set when the miner broke a round constraint; such predictions score 0.
    pub violation: Option<String>,
    pub final_portfolio: MinerPortfolio,
    /// Portfolio value in token1 at the round's final price.
    pub final_value: f64,
    pub raw_score: Option<f64>,
    /// 1.0 = best scored miner, 0.0 = worst; `None` when unscored.
    pub normalized_rank: Option<f64>,
    pub decisions: Vec<RebalanceDecision>,
    pub response_time_ms: u64,
}

/// Per-(miner, job) reputation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerScore {
    pub miner_id: MinerId,
    pub job_id: String,
    /// EMA over evaluation-round scores; `None` until first observation.
    pub eval_ema: Option<f64>,
    pub live_ema: Option<f64>,
    pub combined: f64,
    pub last_eval_at: Option<DateTime<Utc>>,
    pub last_live_at: Option<DateTime<Utc>>,
    pub total_evaluations: u32,
    pub total_live_rounds: u32,
    pub refusals: u32,
}

impl MinerScore {
    pub fn new(miner_id: MinerId, job_id: impl Into<String>) -> Self {
        Self {
            miner_id,
            job_id: job_id.into(),
            eval_ema: None,
            live_ema: None,
            combined: 0.0,
            last_eval_at: None,
            last_live_at: None,
            total_evaluations: 0,
            total_live_rounds: 0,
            refusals: 0,
        }
    }
}

/// Record of one decision handoff to the external executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveExecution {
    pub round_id: String,
    pub job_id: String,
    pub miner_id: MinerId,
    pub decisions: Vec<RebalanceDecision>,
    pub submitted_at: DateTime<Utc>,
}
