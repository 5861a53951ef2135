use async_trait::async_trait;
use chrono::Utc;
use polv_store::ReputationStore;
use polv_types::{LiveExecution, MinerId, RebalanceDecision};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Executor sink unavailable: {0}")]
    Unavailable(String),
}

/// Downstream consumer of winning live decisions. Must be idempotent by
/// `round_id`; the gate hands off at-least-once.
#[async_trait]
pub trait ExecutorSink: Send + Sync {
    async fn submit(
        &self,
        round_id: &str,
        decisions: &[RebalanceDecision],
    ) -> Result<(), SinkError>;
}

/// Sink that only logs. Used under `--dry-run`.
pub struct NullSink;

#[async_trait]
impl ExecutorSink for NullSink {
    async fn submit(
        &self,
        round_id: &str,
        decisions: &[RebalanceDecision],
    ) -> Result<(), SinkError> {
        info!(
            round_id,
            decisions = decisions.len(),
            "Dry run: suppressing executor submission"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Handoff {
    round_id: String,
    job_id: String,
    miner_id: MinerId,
    decisions: Vec<RebalanceDecision>,
}

/// Hands winning live decisions to the executor sink without ever blocking
/// the scheduler. Failed submissions retry with capped exponential backoff;
/// an already-recorded round is skipped, which makes the at-least-once
/// queue effectively exactly-once.
pub struct LiveGate {
    tx: mpsc::UnboundedSender<Handoff>,
}

impl LiveGate {
    pub fn spawn(sink: Arc<dyn ExecutorSink>, store: Arc<ReputationStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain(rx, sink, store));
        (Self { tx }, handle)
    }

    /// Queue one round's winning decisions. Returns immediately.
    pub fn enqueue(
        &self,
        round_id: impl Into<String>,
        job_id: impl Into<String>,
        miner_id: MinerId,
        decisions: Vec<RebalanceDecision>,
    ) {
        let handoff = Handoff {
            round_id: round_id.into(),
            job_id: job_id.into(),
            miner_id,
            decisions,
        };
        if self.tx.send(handoff).is_err() {
            error!("Live gate worker is gone, dropping handoff");
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<Handoff>,
    sink: Arc<dyn ExecutorSink>,
    store: Arc<ReputationStore>,
) {
    while let Some(handoff) = rx.recv().await {
        match store.get_live_execution(&handoff.round_id).await {
            Ok(Some(_)) => {
                info!(round_id = %handoff.round_id, "Round already handed off, skipping");
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(round_id = %handoff.round_id, error = %e, "Handoff dedupe check failed");
            }
        }

        let mut delay = Duration::from_secs(1);
        loop {
            match sink.submit(&handoff.round_id, &handoff.decisions).await {
                Ok(()) => {
                    let execution = LiveExecution {
                        round_id: handoff.round_id.clone(),
                        job_id: handoff.job_id.clone(),
                        miner_id: handoff.miner_id.clone(),
                        decisions: handoff.decisions.clone(),
                        submitted_at: Utc::now(),
                    };
                    if let Err(e) = store.record_live_execution(&execution).await {
                        error!(round_id = %handoff.round_id, error = %e, "Failed to record live execution");
                    }
                    info!(
                        round_id = %handoff.round_id,
                        miner = %handoff.miner_id,
                        "Submitted live decisions to executor"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        round_id = %handoff.round_id,
                        error = %e,
                        retry_in_secs = delay.as_secs(),
                        "Executor sink unavailable, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(60));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polv_score::ViolationPolicy;
    use polv_store::MemoryBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySink {
        failures_left: AtomicU32,
        submissions: AtomicU32,
    }

    #[async_trait]
    impl ExecutorSink for FlakySink {
        async fn submit(&self, _: &str, _: &[RebalanceDecision]) -> Result<(), SinkError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SinkError::Unavailable("down".into()));
            }
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn store() -> Arc<ReputationStore> {
        Arc::new(ReputationStore::new(
            Arc::new(MemoryBackend::new()),
            ViolationPolicy::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoff_retries_until_sink_recovers() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(2),
            submissions: AtomicU32::new(0),
        });
        let store = store();
        let (gate, handle) = LiveGate::spawn(sink.clone(), store.clone());

        gate.enqueue("r1", "j1", MinerId::new("m0"), vec![]);
        drop(gate);
        handle.await.unwrap();

        assert_eq!(sink.submissions.load(Ordering::SeqCst), 1);
        assert!(store.get_live_execution("r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recorded_round_is_not_resubmitted() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(0),
            submissions: AtomicU32::new(0),
        });
        let store = store();
        store
            .record_live_execution(&LiveExecution {
                round_id: "r1".into(),
                job_id: "j1".into(),
                miner_id: MinerId::new("m0"),
                decisions: vec![],
                submitted_at: Utc::now(),
            })
            .await
            .unwrap();

        let (gate, handle) = LiveGate::spawn(sink.clone(), store);
        gate.enqueue("r1", "j1", MinerId::new("m0"), vec![]);
        drop(gate);
        handle.await.unwrap();

        assert_eq!(sink.submissions.load(Ordering::SeqCst), 0);
    }
}
