use async_trait::async_trait;
use chrono::NaiveDate;
use polv_types::{Job, LiveExecution, MinerId, MinerScore, Prediction, Round, RoundType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence contract for the mutable reputation & jobs store.
///
/// Tables: jobs, rounds, predictions, miner_scores, participation,
/// live_executions. Round archives are append-only; `archive_round` must
/// land the round and its predictions atomically.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn put_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    async fn list_active_jobs(&self) -> Result<Vec<Job>>;

    /// Persist a round and all of its predictions in one write.
    async fn archive_round(&self, round: &Round, predictions: &[Prediction]) -> Result<()>;

    async fn get_round(&self, round_id: &str) -> Result<Option<Round>>;

    /// Highest archived round number for `(job, round_type)`, 0 when none.
    async fn last_round_number(&self, job_id: &str, round_type: RoundType) -> Result<u64>;

    /// Most recently archived completed round of the given type.
    async fn latest_completed_round(
        &self,
        job_id: &str,
        round_type: RoundType,
    ) -> Result<Option<Round>>;

    async fn predictions_for(&self, round_id: &str) -> Result<Vec<Prediction>>;

    async fn get_miner_score(&self, job_id: &str, miner_id: &MinerId)
        -> Result<Option<MinerScore>>;

    async fn put_miner_score(&self, score: &MinerScore) -> Result<()>;

    async fn scores_for_job(&self, job_id: &str) -> Result<Vec<MinerScore>>;

    async fn record_participation(
        &self,
        job_id: &str,
        miner_id: &MinerId,
        date: NaiveDate,
    ) -> Result<()>;

    /// Miners with a participation bit for `(job, date)`.
    async fn participants_on(&self, job_id: &str, date: NaiveDate) -> Result<Vec<MinerId>>;

    async fn put_live_execution(&self, execution: &LiveExecution) -> Result<()>;

    async fn get_live_execution(&self, round_id: &str) -> Result<Option<LiveExecution>>;

    /// Flush any pending writes.
    async fn flush(&self) -> Result<()>;
}
