use crate::backend::{Result, StoreBackend, StoreError};
use async_trait::async_trait;
use chrono::NaiveDate;
use polv_types::{Job, LiveExecution, MinerId, MinerScore, Prediction, Round, RoundStatus, RoundType};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// RocksDB-backed reputation & jobs store.
///
/// One keyspace, prefix per table; rows are JSON. Round keys embed
/// `(job, type, number)` so restart recovery and winner lookups are
/// bounded reverse scans.
pub struct RocksBackend {
    db: Arc<DB>,
}

impl RocksBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| StoreError::BackendError(format!("Failed to open RocksDB: {}", e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn job_key(job_id: &str) -> Vec<u8> {
        format!("job:{}", job_id).into_bytes()
    }

    fn round_key(job_id: &str, round_type: RoundType, number: u64) -> Vec<u8> {
        format!("round:{}:{}:{:010}", job_id, round_type, number).into_bytes()
    }

    fn round_id_key(round_id: &str) -> Vec<u8> {
        format!("round_id:{}", round_id).into_bytes()
    }

    fn prediction_key(round_id: &str, miner_id: &MinerId) -> Vec<u8> {
        format!("pred:{}:{}", round_id, miner_id).into_bytes()
    }

    fn score_key(job_id: &str, miner_id: &MinerId) -> Vec<u8> {
        format!("score:{}:{}", job_id, miner_id).into_bytes()
    }

    fn participation_key(job_id: &str, date: NaiveDate, miner_id: &MinerId) -> Vec<u8> {
        format!("part:{}:{}:{}", job_id, date, miner_id).into_bytes()
    }

    fn live_key(round_id: &str) -> Vec<u8> {
        format!("live:{}", round_id).into_bytes()
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self
            .db
            .get(key)
            .map_err(|e| StoreError::BackendError(e.to_string()))?
        {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::SerializationError(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    /// All values under a key prefix, in key order.
    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| StoreError::BackendError(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(
                serde_json::from_slice(&value)
                    .map_err(|e| StoreError::SerializationError(e.to_string()))?,
            );
        }
        Ok(values)
    }
}

#[async_trait]
impl StoreBackend for RocksBackend {
    async fn put_job(&self, job: &Job) -> Result<()> {
        self.db
            .put(Self::job_key(&job.job_id), Self::encode(job)?)
            .map_err(|e| StoreError::BackendError(e.to_string()))
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.get_json(&Self::job_key(job_id))
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let jobs: Vec<Job> = self.scan_prefix(b"job:")?;
        Ok(jobs.into_iter().filter(|job| job.active).collect())
    }

    async fn archive_round(&self, round: &Round, predictions: &[Prediction]) -> Result<()> {
        let mut batch = WriteBatch::default();
        let encoded = Self::encode(round)?;
        batch.put(
            Self::round_key(&round.job_id, round.round_type, round.round_number),
            &encoded,
        );
        batch.put(Self::round_id_key(&round.round_id), &encoded);
        for prediction in predictions {
            batch.put(
                Self::prediction_key(&round.round_id, &prediction.miner_id),
                Self::encode(prediction)?,
            );
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::BackendError(e.to_string()))
    }

    async fn get_round(&self, round_id: &str) -> Result<Option<Round>> {
        self.get_json(&Self::round_id_key(round_id))
    }

    async fn last_round_number(&self, job_id: &str, round_type: RoundType) -> Result<u64> {
        let prefix = format!("round:{}:{}:", job_id, round_type).into_bytes();
        let rounds: Vec<Round> = self.scan_prefix(&prefix)?;
        Ok(rounds.iter().map(|r| r.round_number).max().unwrap_or(0))
    }

    async fn latest_completed_round(
        &self,
        job_id: &str,
        round_type: RoundType,
    ) -> Result<Option<Round>> {
        let prefix = format!("round:{}:{}:", job_id, round_type).into_bytes();
        let rounds: Vec<Round> = self.scan_prefix(&prefix)?;
        Ok(rounds
            .into_iter()
            .filter(|r| r.status == RoundStatus::Completed)
            .max_by_key(|r| r.round_number))
    }

    async fn predictions_for(&self, round_id: &str) -> Result<Vec<Prediction>> {
        let prefix = format!("pred:{}:", round_id).into_bytes();
        self.scan_prefix(&prefix)
    }

    async fn get_miner_score(
        &self,
        job_id: &str,
        miner_id: &MinerId,
    ) -> Result<Option<MinerScore>> {
        self.get_json(&Self::score_key(job_id, miner_id))
    }

    async fn put_miner_score(&self, score: &MinerScore) -> Result<()> {
        self.db
            .put(
                Self::score_key(&score.job_id, &score.miner_id),
                Self::encode(score)?,
            )
            .map_err(|e| StoreError::BackendError(e.to_string()))
    }

    async fn scores_for_job(&self, job_id: &str) -> Result<Vec<MinerScore>> {
        let prefix = format!("score:{}:", job_id).into_bytes();
        self.scan_prefix(&prefix)
    }

    async fn record_participation(
        &self,
        job_id: &str,
        miner_id: &MinerId,
        date: NaiveDate,
    ) -> Result<()> {
        self.db
            .put(Self::participation_key(job_id, date, miner_id), [1u8])
            .map_err(|e| StoreError::BackendError(e.to_string()))
    }

    async fn participants_on(&self, job_id: &str, date: NaiveDate) -> Result<Vec<MinerId>> {
        let prefix = format!("part:{}:{}:", job_id, date).into_bytes();
        let mut miners = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::BackendError(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let suffix = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            miners.push(MinerId::new(suffix));
        }
        Ok(miners)
    }

    async fn put_live_execution(&self, execution: &LiveExecution) -> Result<()> {
        self.db
            .put(
                Self::live_key(&execution.round_id),
                Self::encode(execution)?,
            )
            .map_err(|e| StoreError::BackendError(e.to_string()))
    }

    async fn get_live_execution(&self, round_id: &str) -> Result<Option<LiveExecution>> {
        self.get_json(&Self::live_key(round_id))
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| StoreError::BackendError(e.to_string()))
    }
}
