use crate::backend::{Result, StoreBackend};
use async_trait::async_trait;
use chrono::NaiveDate;
use polv_types::{Job, LiveExecution, MinerId, MinerScore, Prediction, Round, RoundStatus, RoundType};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type ScoreKey = (String, MinerId);
type ParticipationKey = (String, NaiveDate, MinerId);

/// In-memory store backend for tests and development.
#[derive(Default)]
pub struct MemoryBackend {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    rounds: Arc<RwLock<HashMap<String, Round>>>,
    predictions: Arc<RwLock<HashMap<String, Vec<Prediction>>>>,
    scores: Arc<RwLock<HashMap<ScoreKey, MinerScore>>>,
    participation: Arc<RwLock<BTreeSet<ParticipationKey>>>,
    live_executions: Arc<RwLock<HashMap<String, LiveExecution>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn put_job(&self, job: &Job) -> Result<()> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.active)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(jobs)
    }

    async fn archive_round(&self, round: &Round, predictions: &[Prediction]) -> Result<()> {
        // Both maps are locked for the whole write so readers never observe
        // a round without its predictions.
        let mut rounds = self.rounds.write().await;
        let mut preds = self.predictions.write().await;
        rounds.insert(round.round_id.clone(), round.clone());
        preds.insert(round.round_id.clone(), predictions.to_vec());
        Ok(())
    }

    async fn get_round(&self, round_id: &str) -> Result<Option<Round>> {
        Ok(self.rounds.read().await.get(round_id).cloned())
    }

    async fn last_round_number(&self, job_id: &str, round_type: RoundType) -> Result<u64> {
        Ok(self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| r.job_id == job_id && r.round_type == round_type)
            .map(|r| r.round_number)
            .max()
            .unwrap_or(0))
    }

    async fn latest_completed_round(
        &self,
        job_id: &str,
        round_type: RoundType,
    ) -> Result<Option<Round>> {
        Ok(self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| {
                r.job_id == job_id
                    && r.round_type == round_type
                    && r.status == RoundStatus::Completed
            })
            .max_by_key(|r| r.round_number)
            .cloned())
    }

    async fn predictions_for(&self, round_id: &str) -> Result<Vec<Prediction>> {
        Ok(self
            .predictions
            .read()
            .await
            .get(round_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_miner_score(
        &self,
        job_id: &str,
        miner_id: &MinerId,
    ) -> Result<Option<MinerScore>> {
        let key = (job_id.to_string(), miner_id.clone());
        Ok(self.scores.read().await.get(&key).cloned())
    }

    async fn put_miner_score(&self, score: &MinerScore) -> Result<()> {
        let key = (score.job_id.clone(), score.miner_id.clone());
        self.scores.write().await.insert(key, score.clone());
        Ok(())
    }

    async fn scores_for_job(&self, job_id: &str) -> Result<Vec<MinerScore>> {
        let mut scores: Vec<MinerScore> = self
            .scores
            .read()
            .await
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        scores.sort_by(|a, b| a.miner_id.cmp(&b.miner_id));
        Ok(scores)
    }

    async fn record_participation(
        &self,
        job_id: &str,
        miner_id: &MinerId,
        date: NaiveDate,
    ) -> Result<()> {
        self.participation
            .write()
            .await
            .insert((job_id.to_string(), date, miner_id.clone()));
        Ok(())
    }

    async fn participants_on(&self, job_id: &str, date: NaiveDate) -> Result<Vec<MinerId>> {
        Ok(self
            .participation
            .read()
            .await
            .iter()
            .filter(|(job, day, _)| job == job_id && *day == date)
            .map(|(_, _, miner)| miner.clone())
            .collect())
    }

    async fn put_live_execution(&self, execution: &LiveExecution) -> Result<()> {
        self.live_executions
            .write()
            .await
            .insert(execution.round_id.clone(), execution.clone());
        Ok(())
    }

    async fn get_live_execution(&self, round_id: &str) -> Result<Option<LiveExecution>> {
        Ok(self.live_executions.read().await.get(round_id).cloned())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
