use async_trait::async_trait;
use chrono::{Days, Utc};
use polv_events::MemoryEvents;
use polv_round::{ExecutorConfig, RoundExecutor};
use polv_sched::{
    ExecutorSink, JobRunner, JobsScheduler, LiveGate, SchedulerConfig, SchedulerHandles, SinkError,
    StaticInventory, StaticRegistry,
};
use polv_score::ViolationPolicy;
use polv_store::{MemoryBackend, ReputationStore};
use polv_transport::MockTransport;
use polv_types::{
    Constraints, Inventory, Job, MinerId, PoolEvent, PoolEventKind, Position, RebalanceDecision,
    Round, RoundStatus, RoundType, Target,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct RecordingSink {
    submissions: Mutex<Vec<String>>,
}

#[async_trait]
impl ExecutorSink for RecordingSink {
    async fn submit(&self, round_id: &str, _: &[RebalanceDecision]) -> Result<(), SinkError> {
        self.submissions.lock().unwrap().push(round_id.to_string());
        Ok(())
    }
}

fn job() -> Job {
    Job {
        job_id: "weth-usdc".into(),
        pair_address: "0xpool".into(),
        vault_address: "0xvault".into(),
        chain_id: 8453,
        round_duration_secs: 1,
        checkpoint_interval: 150,
        blocks_per_round: 450,
        fee_rate: 0.003,
        target: Target::PoL,
        constraints: Constraints::default(),
        active: true,
    }
}

fn parity_swap(block: u64, volume: f64) -> PoolEvent {
    PoolEvent {
        block_number: block,
        log_index: 0,
        kind: PoolEventKind::Swap {
            amount0_delta: volume,
            amount1_delta: -volume,
            sqrt_price_x96: 1 << 96,
            new_tick: 0,
        },
    }
}

struct Fixture {
    store: Arc<ReputationStore>,
    sink: Arc<RecordingSink>,
    gate_handle: tokio::task::JoinHandle<()>,
    handles: Arc<SchedulerHandles>,
}

async fn fixture(miners: &[&str]) -> Fixture {
    let store = Arc::new(ReputationStore::new(
        Arc::new(MemoryBackend::new()),
        ViolationPolicy::default(),
    ));
    store.put_job(&job()).await.unwrap();

    let events = Arc::new(MemoryEvents::new());
    events
        .insert_all(
            "0xpool",
            vec![
                parity_swap(1000, 0.0),
                parity_swap(1100, 200_000.0),
                parity_swap(1450, 100_000.0),
            ],
        )
        .await;

    let transport = Arc::new(MockTransport::new());
    let executor = Arc::new(RoundExecutor::new(
        events.clone(),
        transport,
        ExecutorConfig {
            miner_timeout: Duration::from_secs(1),
            baseline_liquidity: 1e9,
            ..ExecutorConfig::default()
        },
    ));

    let sink = Arc::new(RecordingSink::default());
    let (live_gate, gate_handle) = LiveGate::spawn(sink.clone(), store.clone());

    let handles = Arc::new(SchedulerHandles {
        store: store.clone(),
        events,
        executor,
        registry: Arc::new(StaticRegistry::new(miners.iter().copied())),
        inventory: Arc::new(StaticInventory::new(
            Inventory::new(1_000_000, 2_000_000),
            vec![Position::new(-600, 600, 400_000, 400_000).unwrap()],
        )),
        live_gate,
        config: SchedulerConfig::default(),
    });

    Fixture {
        store,
        sink,
        gate_handle,
        handles,
    }
}

#[tokio::test]
async fn test_eval_tick_archives_scores_and_participation() {
    let fixture = fixture(&["alice", "bob"]).await;
    let runner = JobRunner::new(job(), fixture.handles.clone());

    runner.tick().await;

    let store = &fixture.store;
    assert_eq!(
        store.last_round_number("weth-usdc", RoundType::Eval).await.unwrap(),
        1
    );

    let scores = store.get_scores("weth-usdc").await.unwrap();
    assert_eq!(scores.len(), 2);
    assert!(scores.iter().all(|s| s.eval_ema.is_some()));
    assert!(scores.iter().all(|s| s.total_evaluations == 1));

    let today = Utc::now().date_naive();
    let eligible_later = store.list_eligible("weth-usdc", today).await.unwrap();
    // One day of participation is not seven.
    assert!(eligible_later.is_empty());

    // No previous winner existed at tick time, so no live round ran.
    assert_eq!(
        store.last_round_number("weth-usdc", RoundType::Live).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_round_numbers_continue_across_restarts() {
    let fixture = fixture(&["alice"]).await;
    let runner = JobRunner::new(job(), fixture.handles.clone());
    runner.tick().await;
    drop(runner);

    // A fresh runner over the same store continues the sequence.
    let runner = JobRunner::new(job(), fixture.handles.clone());
    runner.tick().await;

    assert_eq!(
        fixture
            .store
            .last_round_number("weth-usdc", RoundType::Eval)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_eligible_winner_gets_a_live_round() {
    let fixture = fixture(&["alice", "bob"]).await;
    let store = fixture.store.clone();
    let alice = MinerId::new("alice");

    // Alice won the previous evaluation round and has a full seven-day
    // participation window.
    let mut previous = Round::new(
        &job(),
        RoundType::Eval,
        1,
        1000,
        Utc::now(),
        Inventory::new(1, 1),
        vec![],
    );
    previous.status = RoundStatus::Completed;
    previous.winner = Some(alice.clone());
    store.archive_round(&previous, &[]).await.unwrap();

    let today = Utc::now().date_naive();
    for offset in 0..7 {
        let day = today.checked_sub_days(Days::new(offset)).unwrap();
        store
            .record_participation("weth-usdc", &alice, day)
            .await
            .unwrap();
    }

    let runner = JobRunner::new(job(), fixture.handles.clone());
    runner.tick().await;
    drop(runner);

    assert_eq!(
        store.last_round_number("weth-usdc", RoundType::Live).await.unwrap(),
        1
    );
    let scores = store.get_scores("weth-usdc").await.unwrap();
    let alice_row = scores.iter().find(|s| s.miner_id == alice).unwrap();
    assert!(alice_row.live_ema.is_some());
    assert_eq!(alice_row.total_live_rounds, 1);

    // Close the gate and wait for the handoff to drain.
    drop(fixture.handles);
    fixture.gate_handle.await.unwrap();
    let live_round_id = {
        let submissions = fixture.sink.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].contains("_live_1_"));
        submissions[0].clone()
    };
    assert!(store
        .get_live_execution(&live_round_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_ineligible_winner_stays_in_evaluation() {
    let fixture = fixture(&["alice", "bob"]).await;
    let store = fixture.store.clone();

    let mut previous = Round::new(
        &job(),
        RoundType::Eval,
        1,
        1000,
        Utc::now(),
        Inventory::new(1, 1),
        vec![],
    );
    previous.status = RoundStatus::Completed;
    previous.winner = Some(MinerId::new("alice"));
    store.archive_round(&previous, &[]).await.unwrap();
    // No participation history: six days are not enough either way.

    let runner = JobRunner::new(job(), fixture.handles.clone());
    runner.tick().await;

    assert_eq!(
        store.last_round_number("weth-usdc", RoundType::Live).await.unwrap(),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_jobs_and_stops_on_shutdown() {
    let fixture = fixture(&["alice"]).await;
    let scheduler = JobsScheduler::new(fixture.handles.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    // A few virtual seconds is a few ticks of a one-second job.
    tokio::time::sleep(Duration::from_secs(3)).await;
    shutdown_tx.send(true).unwrap();
    run.await.unwrap().unwrap();

    assert!(
        fixture
            .store
            .last_round_number("weth-usdc", RoundType::Eval)
            .await
            .unwrap()
            >= 1
    );
}
