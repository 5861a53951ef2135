use chrono::Utc;
use futures::future::join_all;
use polv_events::{with_retries, EventsSource, RetryPolicy};
use polv_math::tick_of_price;
use polv_score::{rank_scored, score_pol, validate_positions, PolScore, ScoreInputs};
use polv_sim::{PoolSimulator, SimConfig, SimError};
use polv_transport::{MinerTransport, TransportError};
use polv_types::position::same_position_set;
use polv_types::{
    Job, MinerId, MinerPortfolio, PoolState, Prediction, RebalanceDecision, RebalanceQuery,
    RebalanceResponse, Round, RoundStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RoundError {
    /// The events source stayed unavailable for the round's block range;
    /// the round is aborted and must not touch reputation.
    #[error("Events source unavailable for round: {0}")]
    EventsUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub miner_timeout: Duration,
    /// Consecutive transport failures before a miner is dropped for the round.
    pub max_consecutive_failures: u32,
    pub retry: RetryPolicy,
    /// Fee-share denominator floor handed to the simulators.
    pub baseline_liquidity: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            miner_timeout: Duration::from_secs(polv_types::DEFAULT_MINER_TIMEOUT_SECS),
            max_consecutive_failures: 3,
            retry: RetryPolicy::default(),
            baseline_liquidity: 1e19,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub round: Round,
    pub predictions: Vec<Prediction>,
    pub winner: Option<MinerId>,
}

/// Runs a single round: forward simulation with checkpointed rebalance
/// queries fanned out to every active miner.
///
/// All miners see the same checkpoint schedule over the same event stream;
/// responses are folded back in miner order, so two runs with identical
/// streams and responses produce identical predictions.
pub struct RoundExecutor {
    events: Arc<dyn EventsSource>,
    transport: Arc<dyn MinerTransport>,
    config: ExecutorConfig,
}

struct MinerState {
    sim: PoolSimulator,
    refused: bool,
    refusal_reason: Option<String>,
    violation: Option<String>,
    consecutive_failures: u32,
    rebalance_count: u32,
    decisions: Vec<RebalanceDecision>,
    response_time_ms: u64,
}

impl MinerState {
    fn active(&self) -> bool {
        !self.refused && self.violation.is_none()
    }
}

impl RoundExecutor {
    pub fn new(
        events: Arc<dyn EventsSource>,
        transport: Arc<dyn MinerTransport>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            events,
            transport,
            config,
        }
    }

    pub async fn execute(
        &self,
        job: &Job,
        mut round: Round,
        miners: &[MinerId],
    ) -> Result<RoundOutcome, RoundError> {
        info!(
            round_id = %round.round_id,
            round_type = %round.round_type,
            miners = miners.len(),
            start_block = round.start_block,
            end_block = round.end_block,
            "Starting round"
        );

        if miners.is_empty() {
            warn!(round_id = %round.round_id, "No active miners, round completes empty");
            round.finished_at = Some(Utc::now());
            round.status = RoundStatus::Completed;
            return Ok(RoundOutcome {
                round,
                predictions: Vec::new(),
                winner: None,
            });
        }

        let stream = self.fetch_round_stream(job, &round).await?;
        let initial_price = self.initial_price(job, &round).await?;

        let mut states = self.init_miners(job, &round, miners, initial_price, stream);

        for checkpoint in checkpoint_schedule(
            round.start_block,
            round.end_block,
            job.checkpoint_interval,
        ) {
            self.run_checkpoint(&round, job, miners, &mut states, checkpoint)
                .await;
            if miners.iter().all(|m| !states[m].active()) {
                debug!(round_id = %round.round_id, "All miners frozen, ending checkpoints early");
                break;
            }
        }

        let outcome = self.finalize(job, round, miners, states, initial_price);
        Ok(outcome)
    }

    async fn fetch_round_stream(
        &self,
        job: &Job,
        round: &Round,
    ) -> Result<Arc<Vec<polv_types::PoolEvent>>, RoundError> {
        // One fetch per round; every miner's simulator replays this slice.
        let events = with_retries(self.config.retry, || {
            self.events
                .events_in(&job.pair_address, round.start_block, round.end_block)
        })
        .await
        .map_err(|e| RoundError::EventsUnavailable(e.to_string()))?;
        debug!(
            round_id = %round.round_id,
            events = events.len(),
            "Fetched round event stream"
        );
        Ok(Arc::new(events))
    }

    async fn initial_price(&self, job: &Job, round: &Round) -> Result<f64, RoundError> {
        let price = with_retries(self.config.retry, || {
            self.events
                .price_at_or_before(&job.pair_address, round.start_block)
        })
        .await
        .map_err(|e| RoundError::EventsUnavailable(e.to_string()))?;
        Ok(price.unwrap_or_else(|| {
            warn!(
                round_id = %round.round_id,
                block = round.start_block,
                "No price history at round start, falling back to parity"
            );
            1.0
        }))
    }

    fn init_miners(
        &self,
        job: &Job,
        round: &Round,
        miners: &[MinerId],
        initial_price: f64,
        stream: Arc<Vec<polv_types::PoolEvent>>,
    ) -> HashMap<MinerId, MinerState> {
        let initial_state = PoolState {
            block: round.start_block,
            sqrt_price: initial_price.sqrt(),
            current_tick: tick_of_price(initial_price),
            fee_rate: job.fee_rate,
        };
        let sim_config = SimConfig {
            fee_rate: job.fee_rate,
            baseline_liquidity: self.config.baseline_liquidity,
        };

        let mut states = HashMap::new();
        for miner in miners {
            let mut sim = PoolSimulator::new(initial_state, sim_config, stream.clone());
            sim.register_owner(miner.clone(), round.initial_inventory);
            let mut violation = None;
            if !round.initial_positions.is_empty() {
                if let Err(e) = sim.apply_rebalance(miner, &round.initial_positions) {
                    warn!(miner = %miner, error = %e, "Failed to seed initial positions");
                    violation = Some(format!("initial positions rejected: {}", e));
                }
            }
            states.insert(
                miner.clone(),
                MinerState {
                    sim,
                    refused: false,
                    refusal_reason: None,
                    violation,
                    consecutive_failures: 0,
                    rebalance_count: 0,
                    decisions: Vec::new(),
                    response_time_ms: 0,
                },
            );
        }
        states
    }

    async fn run_checkpoint(
        &self,
        round: &Round,
        job: &Job,
        miners: &[MinerId],
        states: &mut HashMap<MinerId, MinerState>,
        checkpoint: u64,
    ) {
        // Advance active miners first so every query sees the same stream
        // prefix at this checkpoint.
        for miner in miners {
            let Some(state) = states.get_mut(miner) else {
                continue;
            };
            if !state.active() {
                continue;
            }
            if let Err(e) = state.sim.advance_to(checkpoint) {
                warn!(miner = %miner, error = %e, "Simulator advance failed");
                state.violation = Some(format!("simulation error: {}", e));
            }
        }

        // Parallel fan-out with a shared deadline, one query per active miner.
        let queries: Vec<(MinerId, RebalanceQuery)> = miners
            .iter()
            .filter(|m| states.get(*m).map(|s| s.active()).unwrap_or(false))
            .filter_map(|miner| {
                let state = states.get(miner)?;
                let (positions, inventory, _) = state.sim.portfolio_of(miner).ok()?;
                let query = RebalanceQuery {
                    job_id: job.job_id.clone(),
                    vault_address: job.vault_address.clone(),
                    pair_address: job.pair_address.clone(),
                    chain_id: job.chain_id,
                    round_id: round.round_id.clone(),
                    round_type: round.round_type,
                    block_number: checkpoint,
                    current_price: state.sim.price(),
                    current_positions: positions,
                    inventory_remaining: inventory,
                    rebalances_so_far: state.rebalance_count,
                    constraints: round.constraints,
                };
                Some((miner.clone(), query))
            })
            .collect();

        let timeout = self.config.miner_timeout;
        let responses = join_all(queries.into_iter().map(|(miner, query)| {
            let transport = self.transport.clone();
            async move {
                let started = Instant::now();
                let result =
                    match tokio::time::timeout(timeout, transport.query(&miner, query, timeout))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout),
                    };
                (miner, result, started.elapsed())
            }
        }))
        .await;

        // Fold responses back in miner order for determinism.
        let mut by_miner: HashMap<MinerId, (Result<RebalanceResponse, TransportError>, Duration)> =
            responses
                .into_iter()
                .map(|(miner, result, elapsed)| (miner, (result, elapsed)))
                .collect();
        for miner in miners {
            let Some((result, elapsed)) = by_miner.remove(miner) else {
                continue;
            };
            let Some(state) = states.get_mut(miner) else {
                continue;
            };
            state.response_time_ms += elapsed.as_millis() as u64;
            self.apply_response(round, miner, state, checkpoint, result);
        }
    }

    fn apply_response(
        &self,
        round: &Round,
        miner: &MinerId,
        state: &mut MinerState,
        checkpoint: u64,
        result: Result<RebalanceResponse, TransportError>,
    ) {
        let response = match result {
            Err(e) => {
                state.consecutive_failures += 1;
                debug!(
                    miner = %miner,
                    block = checkpoint,
                    failures = state.consecutive_failures,
                    error = %e,
                    "Miner query failed"
                );
                if state.consecutive_failures >= self.config.max_consecutive_failures {
                    warn!(miner = %miner, block = checkpoint, "Miner dropped after consecutive failures");
                    state.refused = true;
                    state.refusal_reason = Some(format!(
                        "{} consecutive transport failures",
                        state.consecutive_failures
                    ));
                }
                return;
            }
            Ok(response) => {
                if !response.is_well_formed() {
                    // Malformed payloads count as transport failures.
                    state.consecutive_failures += 1;
                    if state.consecutive_failures >= self.config.max_consecutive_failures {
                        state.refused = true;
                        state.refusal_reason = Some(format!(
                            "{} consecutive transport failures",
                            state.consecutive_failures
                        ));
                    }
                    return;
                }
                state.consecutive_failures = 0;
                response
            }
        };

        if !response.accepted {
            info!(miner = %miner, block = checkpoint, reason = ?response.refusal_reason, "Miner refused round");
            state.refused = true;
            state.refusal_reason = response
                .refusal_reason
                .or_else(|| Some("refused".to_string()));
            return;
        }

        let current_positions = match state.sim.portfolio_of(miner) {
            Ok((positions, _, _)) => positions,
            Err(e) => {
                state.violation = Some(format!("simulation error: {}", e));
                return;
            }
        };
        if same_position_set(&response.desired_positions, &current_positions) {
            return;
        }

        let violations = validate_positions(&round.constraints, &response.desired_positions);
        if !violations.is_empty() {
            state.violation = Some(violations.join("; "));
            return;
        }

        let price = state.sim.price();
        match state.sim.apply_rebalance(miner, &response.desired_positions) {
            Ok(()) => {
                state.rebalance_count += 1;
                let inventory_after = state
                    .sim
                    .portfolio_of(miner)
                    .map(|(_, inventory, _)| inventory)
                    .unwrap_or_default();
                state.decisions.push(RebalanceDecision {
                    block: checkpoint,
                    price,
                    old_positions: current_positions,
                    new_positions: response.desired_positions,
                    inventory_after,
                });
                if state.rebalance_count > round.constraints.max_rebalances {
                    warn!(miner = %miner, count = state.rebalance_count, "Rebalance budget exceeded");
                    state.violation = Some(format!(
                        "rebalance count {} exceeds maximum {}",
                        state.rebalance_count, round.constraints.max_rebalances
                    ));
                }
            }
            Err(e @ SimError::InsufficientInventory { .. }) => {
                state.violation = Some(e.to_string());
            }
            Err(e) => {
                warn!(miner = %miner, error = %e, "Rebalance rejected");
                state.violation = Some(e.to_string());
            }
        }
    }

    fn finalize(
        &self,
        job: &Job,
        mut round: Round,
        miners: &[MinerId],
        mut states: HashMap<MinerId, MinerState>,
        initial_price: f64,
    ) -> RoundOutcome {
        let mut predictions = Vec::with_capacity(miners.len());
        let mut scored: Vec<(MinerId, PolScore)> = Vec::new();

        for miner in miners {
            let Some(mut state) = states.remove(miner) else {
                continue;
            };

            if state.active() {
                if let Err(e) = state.sim.advance_to(round.end_block) {
                    warn!(miner = %miner, error = %e, "Final advance failed");
                    state.violation = Some(format!("simulation error: {}", e));
                }
            }
            // Close whatever is open at the miner's terminal price. Frozen
            // miners settle at the state they froze in.
            if let Err(e) = state.sim.apply_rebalance(miner, &[]) {
                warn!(miner = %miner, error = %e, "Final close failed");
            }
            let (inventory, fees_accrued) = state
                .sim
                .portfolio_of(miner)
                .map(|(_, inventory, fees)| (inventory, fees))
                .unwrap_or_default();
            let final_price = state.sim.price();
            let final_value = inventory.amount0 as f64 * final_price
                + inventory.amount1 as f64
                + fees_accrued.0 * final_price
                + fees_accrued.1;

            let metrics = ScoreInputs {
                initial_amount0: round.initial_inventory.amount0,
                initial_amount1: round.initial_inventory.amount1,
                final_amount0: inventory.amount0,
                final_amount1: inventory.amount1,
                fees_accrued,
                initial_price,
                final_price,
            };

            let raw_score = if state.refused {
                None
            } else if state.violation.is_some() {
                let mut result = score_pol(&metrics);
                result.score = 0.0;
                scored.push((miner.clone(), result));
                Some(0.0)
            } else {
                let result = score_pol(&metrics);
                scored.push((miner.clone(), result));
                Some(result.score)
            };

            predictions.push(Prediction {
                round_id: round.round_id.clone(),
                miner_id: miner.clone(),
                accepted: !state.refused,
                refusal_reason: state.refusal_reason,
                violation: state.violation,
                final_portfolio: MinerPortfolio {
                    positions: Vec::new(),
                    inventory,
                    fees_accrued,
                    rebalance_count: state.rebalance_count,
                    refused: state.refused,
                },
                final_value,
                raw_score,
                normalized_rank: None,
                decisions: state.decisions,
                response_time_ms: state.response_time_ms,
            });
        }

        rank_scored(&mut scored);
        let ranks: HashMap<&MinerId, f64> = scored
            .iter()
            .enumerate()
            .map(|(i, (miner, _))| {
                let rank = if scored.len() > 1 {
                    1.0 - i as f64 / (scored.len() - 1) as f64
                } else {
                    1.0
                };
                (miner, rank)
            })
            .collect();
        for prediction in &mut predictions {
            prediction.normalized_rank = ranks.get(&prediction.miner_id).copied();
        }

        let winner = scored.first().map(|(miner, _)| miner.clone());
        round.finished_at = Some(Utc::now());
        round.status = RoundStatus::Completed;
        round.winner = winner.clone();
        info!(
            round_id = %round.round_id,
            job_id = %job.job_id,
            winner = ?winner,
            predictions = predictions.len(),
            "Round complete"
        );

        RoundOutcome {
            round,
            predictions,
            winner,
        }
    }
}

/// Blocks `{start, start+Δ, …, end}`; `end` always closes the schedule.
fn checkpoint_schedule(start_block: u64, end_block: u64, interval: u64) -> Vec<u64> {
    let interval = interval.max(1);
    let mut blocks: Vec<u64> = (start_block..=end_block).step_by(interval as usize).collect();
    if blocks.last() != Some(&end_block) {
        blocks.push(end_block);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_schedule_spans_the_round() {
        assert_eq!(checkpoint_schedule(0, 450, 150), vec![0, 150, 300, 450]);
        assert_eq!(checkpoint_schedule(100, 460, 150), vec![100, 250, 400, 460]);
        assert_eq!(checkpoint_schedule(5, 5, 150), vec![5]);
    }
}
