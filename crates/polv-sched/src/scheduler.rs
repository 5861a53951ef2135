use crate::inventory::InventoryProvider;
use crate::live::LiveGate;
use crate::registry::MinerRegistry;
use chrono::Utc;
use polv_events::EventsSource;
use polv_round::{RoundError, RoundExecutor, RoundOutcome};
use polv_store::{ReputationStore, ScoreOutcome, StoreError};
use polv_types::{Job, MinerId, Prediction, Round, RoundStatus, RoundType};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Grace given to in-flight rounds on shutdown; at most one miner
    /// query's worth.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(polv_types::DEFAULT_MINER_TIMEOUT_SECS),
        }
    }
}

/// Everything a job loop needs, shared across jobs.
pub struct SchedulerHandles {
    pub store: Arc<ReputationStore>,
    pub events: Arc<dyn EventsSource>,
    pub executor: Arc<RoundExecutor>,
    pub registry: Arc<dyn MinerRegistry>,
    pub inventory: Arc<dyn InventoryProvider>,
    pub live_gate: LiveGate,
    pub config: SchedulerConfig,
}

/// Drives every active job on its own task. Jobs run fully concurrently;
/// rounds within one job never overlap.
pub struct JobsScheduler {
    handles: Arc<SchedulerHandles>,
}

impl JobsScheduler {
    pub fn new(handles: Arc<SchedulerHandles>) -> Self {
        Self { handles }
    }

    /// Spawn a runner per active job and wait for all of them to wind down
    /// after `shutdown` flips.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), SchedulerError> {
        let jobs = self.handles.store.list_active_jobs().await?;
        info!(jobs = jobs.len(), "Starting job schedulers");

        let mut tasks = JoinSet::new();
        for job in jobs {
            let runner = JobRunner::new(job, self.handles.clone());
            let shutdown = shutdown.clone();
            tasks.spawn(async move { runner.run(shutdown).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Job runner task panicked");
            }
        }
        Ok(())
    }
}

/// The per-job round loop: one evaluation round per tick, plus a live
/// round when the previous winner has earned it.
pub struct JobRunner {
    job: Job,
    handles: Arc<SchedulerHandles>,
}

impl JobRunner {
    pub fn new(job: Job, handles: Arc<SchedulerHandles>) -> Self {
        Self { job, handles }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(job_id = %self.job.job_id, "Job runner started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let tick = self.tick();
            tokio::pin!(tick);
            tokio::select! {
                _ = &mut tick => {}
                _ = shutdown.changed() => {
                    // Let the in-flight rounds finish within the grace
                    // period; otherwise drop them on the floor unarchived.
                    let grace = self.handles.config.shutdown_grace;
                    if tokio::time::timeout(grace, &mut tick).await.is_err() {
                        warn!(job_id = %self.job.job_id, "In-flight rounds cancelled on shutdown");
                    }
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.job.round_duration()) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(job_id = %self.job.job_id, "Job runner stopped");
    }

    /// One scheduling tick: an evaluation round against the full roster
    /// and, concurrently, a live round for an eligible previous winner.
    pub async fn tick(&self) {
        let miners = self.handles.registry.active_miners().await;
        if miners.is_empty() {
            warn!(job_id = %self.job.job_id, "No miners registered, skipping tick");
            return;
        }

        let eval = self.prepare_round(RoundType::Eval).await;
        let live = self.prepare_live_round().await;

        let eval_task = async {
            match eval {
                Some(round) => self.run_round(round, &miners).await,
                None => None,
            }
        };
        let live_task = async {
            match live {
                Some((round, winner)) => {
                    let outcome = self.run_round(round, std::slice::from_ref(&winner)).await;
                    outcome.map(|o| (o, winner))
                }
                None => None,
            }
        };
        let (eval_outcome, live_outcome) = tokio::join!(eval_task, live_task);

        if let Some(outcome) = eval_outcome {
            self.settle(&outcome, RoundType::Eval).await;
        }
        if let Some((outcome, winner)) = live_outcome {
            self.settle(&outcome, RoundType::Live).await;
            self.hand_off_live(&outcome, winner);
        }
    }

    async fn prepare_round(&self, round_type: RoundType) -> Option<Round> {
        let number = match self
            .handles
            .store
            .last_round_number(&self.job.job_id, round_type)
            .await
        {
            Ok(n) => n + 1,
            Err(e) => {
                error!(job_id = %self.job.job_id, error = %e, "Cannot read round sequence");
                return None;
            }
        };

        let start_block = match self
            .handles
            .events
            .latest_block(&self.job.pair_address)
            .await
        {
            Ok(Some(latest)) => latest.saturating_sub(self.job.blocks_per_round),
            Ok(None) => {
                warn!(job_id = %self.job.job_id, "Events store has no data for pool, skipping round");
                return None;
            }
            Err(e) => {
                warn!(job_id = %self.job.job_id, error = %e, "Cannot read block cursor, skipping round");
                return None;
            }
        };

        let (inventory, positions) = self.handles.inventory.initial_state(&self.job).await;
        Some(Round::new(
            &self.job,
            round_type,
            number,
            start_block,
            Utc::now(),
            inventory,
            positions,
        ))
    }

    /// A live round happens only when the previous evaluation winner sits
    /// on the eligibility list.
    async fn prepare_live_round(&self) -> Option<(Round, MinerId)> {
        let winner = match self.handles.store.previous_winner(&self.job.job_id).await {
            Ok(Some(winner)) => winner,
            Ok(None) => return None,
            Err(e) => {
                error!(job_id = %self.job.job_id, error = %e, "Cannot read previous winner");
                return None;
            }
        };

        let today = Utc::now().date_naive();
        let eligible = match self
            .handles
            .store
            .list_eligible(&self.job.job_id, today)
            .await
        {
            Ok(eligible) => eligible,
            Err(e) => {
                error!(job_id = %self.job.job_id, error = %e, "Cannot read eligibility list");
                return None;
            }
        };
        if !eligible.contains(&winner) {
            info!(
                job_id = %self.job.job_id,
                winner = %winner,
                "Previous winner not yet eligible for live rounds"
            );
            return None;
        }

        let round = self.prepare_round(RoundType::Live).await?;
        Some((round, winner))
    }

    /// Execute one round under its soft deadline. `None` means the round
    /// aborted: one structured record, nothing archived, no score updates.
    async fn run_round(&self, round: Round, miners: &[MinerId]) -> Option<RoundOutcome> {
        let round_id = round.round_id.clone();
        let round_type = round.round_type;
        let deadline = self.job.round_deadline();
        let result =
            tokio::time::timeout(deadline, self.handles.executor.execute(&self.job, round, miners))
                .await;

        match result {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(RoundError::EventsUnavailable(reason))) => {
                error!(
                    round_id = %round_id,
                    round_type = %round_type,
                    status = ?RoundStatus::Aborted,
                    reason = %reason,
                    "Round aborted"
                );
                None
            }
            Err(_) => {
                error!(
                    round_id = %round_id,
                    round_type = %round_type,
                    status = ?RoundStatus::Aborted,
                    reason = "soft deadline exceeded",
                    "Round aborted"
                );
                None
            }
        }
    }

    /// Archive the round, fold scores into the reputation store, and (for
    /// evaluation rounds) credit participation.
    async fn settle(&self, outcome: &RoundOutcome, round_type: RoundType) {
        let store = &self.handles.store;
        if let Err(e) = store
            .archive_round(&outcome.round, &outcome.predictions)
            .await
        {
            error!(round_id = %outcome.round.round_id, error = %e, "Archive failed, will retry scores next tick");
            return;
        }

        let outcomes: Vec<(MinerId, ScoreOutcome)> = outcome
            .predictions
            .iter()
            .map(|p| (p.miner_id.clone(), score_outcome(p)))
            .collect();
        if let Err(e) = store
            .update_scores(&self.job.job_id, round_type, &outcomes, Utc::now())
            .await
        {
            error!(round_id = %outcome.round.round_id, error = %e, "Score update failed");
        }

        if round_type == RoundType::Eval {
            let today = Utc::now().date_naive();
            for prediction in outcome.predictions.iter().filter(|p| p.accepted) {
                if let Err(e) = store
                    .record_participation(&self.job.job_id, &prediction.miner_id, today)
                    .await
                {
                    error!(miner = %prediction.miner_id, error = %e, "Participation record failed");
                }
            }
        }
    }

    fn hand_off_live(&self, outcome: &RoundOutcome, winner: MinerId) {
        let decisions = outcome
            .predictions
            .iter()
            .find(|p| p.miner_id == winner)
            .map(|p| p.decisions.clone())
            .unwrap_or_default();
        self.handles.live_gate.enqueue(
            outcome.round.round_id.clone(),
            self.job.job_id.clone(),
            winner,
            decisions,
        );
    }
}

fn score_outcome(prediction: &Prediction) -> ScoreOutcome {
    if !prediction.accepted {
        ScoreOutcome::Refused
    } else if prediction.violation.is_some() {
        ScoreOutcome::Violation
    } else {
        ScoreOutcome::Scored(prediction.raw_score.unwrap_or(0.0))
    }
}
