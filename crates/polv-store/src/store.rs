use crate::backend::{Result, StoreBackend};
use chrono::{DateTime, Days, NaiveDate, Utc};
use polv_score::{combined_score, ema_update, ViolationPolicy, EVAL_ALPHA, LIVE_ALPHA};
use polv_types::{
    Job, LiveExecution, MinerId, MinerScore, Prediction, Round, RoundType,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// How one miner's round fed the reputation update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreOutcome {
    Scored(f64),
    /// Constraint violation: recorded as zero or skipped, per policy.
    Violation,
    /// Refusals never touch the EMA.
    Refused,
}

/// Engine over a [`StoreBackend`].
///
/// EMA updates for one job are serialized behind a per-job mutex; distinct
/// jobs update in parallel. Holders must not await miner I/O while the
/// lock is held.
pub struct ReputationStore {
    backend: Arc<dyn StoreBackend>,
    violation_policy: ViolationPolicy,
    job_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReputationStore {
    pub fn new(backend: Arc<dyn StoreBackend>, violation_policy: ViolationPolicy) -> Self {
        Self {
            backend,
            violation_policy,
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.job_locks.lock().await;
        locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn put_job(&self, job: &Job) -> Result<()> {
        self.backend.put_job(job).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.backend.get_job(job_id).await
    }

    pub async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        self.backend.list_active_jobs().await
    }

    pub async fn last_round_number(&self, job_id: &str, round_type: RoundType) -> Result<u64> {
        self.backend.last_round_number(job_id, round_type).await
    }

    pub async fn archive_round(&self, round: &Round, predictions: &[Prediction]) -> Result<()> {
        info!(
            round_id = %round.round_id,
            predictions = predictions.len(),
            winner = ?round.winner,
            "Archiving round"
        );
        self.backend.archive_round(round, predictions).await
    }

    pub async fn get_round(&self, round_id: &str) -> Result<Option<Round>> {
        self.backend.get_round(round_id).await
    }

    pub async fn predictions_for(&self, round_id: &str) -> Result<Vec<Prediction>> {
        self.backend.predictions_for(round_id).await
    }

    pub async fn get_scores(&self, job_id: &str) -> Result<Vec<MinerScore>> {
        self.backend.scores_for_job(job_id).await
    }

    /// Fold one round's outcomes into the per-(miner, job) EMAs, under the
    /// job's write lock.
    pub async fn update_scores(
        &self,
        job_id: &str,
        round_type: RoundType,
        outcomes: &[(MinerId, ScoreOutcome)],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let lock = self.job_lock(job_id).await;
        let _guard = lock.lock().await;

        for (miner_id, outcome) in outcomes {
            let mut row = self
                .backend
                .get_miner_score(job_id, miner_id)
                .await?
                .unwrap_or_else(|| MinerScore::new(miner_id.clone(), job_id));

            match outcome {
                ScoreOutcome::Scored(score) => {
                    apply_ema(&mut row, *score, round_type, now);
                }
                ScoreOutcome::Violation => match self.violation_policy {
                    ViolationPolicy::UpdateEmaWithZero => {
                        apply_ema(&mut row, 0.0, round_type, now);
                    }
                    ViolationPolicy::SkipLikeRefusal => {
                        debug!(miner = %miner_id, job = job_id, "Violation skipped per policy");
                        continue;
                    }
                },
                ScoreOutcome::Refused => {
                    row.refusals += 1;
                }
            }

            self.backend.put_miner_score(&row).await?;
        }
        Ok(())
    }

    pub async fn record_participation(
        &self,
        job_id: &str,
        miner_id: &MinerId,
        date: NaiveDate,
    ) -> Result<()> {
        self.backend
            .record_participation(job_id, miner_id, date)
            .await
    }

    /// Miners with participation on each of the 7 calendar days ending at
    /// `as_of` (that is, `as_of - 6 ..= as_of`).
    pub async fn list_eligible(&self, job_id: &str, as_of: NaiveDate) -> Result<Vec<MinerId>> {
        let mut eligible: Option<BTreeSet<MinerId>> = None;
        for offset in 0..7u64 {
            let date = as_of
                .checked_sub_days(Days::new(offset))
                .unwrap_or(NaiveDate::MIN);
            let day: BTreeSet<MinerId> = self
                .backend
                .participants_on(job_id, date)
                .await?
                .into_iter()
                .collect();
            eligible = Some(match eligible {
                None => day,
                Some(acc) => acc.intersection(&day).cloned().collect(),
            });
            if eligible.as_ref().map(|s| s.is_empty()).unwrap_or(false) {
                return Ok(Vec::new());
            }
        }
        Ok(eligible.unwrap_or_default().into_iter().collect())
    }

    /// Winner of the most recent completed evaluation round.
    pub async fn previous_winner(&self, job_id: &str) -> Result<Option<MinerId>> {
        Ok(self
            .backend
            .latest_completed_round(job_id, RoundType::Eval)
            .await?
            .and_then(|round| round.winner))
    }

    pub async fn record_live_execution(&self, execution: &LiveExecution) -> Result<()> {
        self.backend.put_live_execution(execution).await
    }

    pub async fn get_live_execution(&self, round_id: &str) -> Result<Option<LiveExecution>> {
        self.backend.get_live_execution(round_id).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.backend.flush().await
    }
}

fn apply_ema(row: &mut MinerScore, score: f64, round_type: RoundType, now: DateTime<Utc>) {
    match round_type {
        RoundType::Eval => {
            row.eval_ema = Some(ema_update(row.eval_ema, score, EVAL_ALPHA));
            row.last_eval_at = Some(now);
            row.total_evaluations += 1;
        }
        RoundType::Live => {
            row.live_ema = Some(ema_update(row.live_ema, score, LIVE_ALPHA));
            row.last_live_at = Some(now);
            row.total_live_rounds += 1;
        }
    }
    row.combined = combined_score(row.eval_ema, row.live_ema);
}
