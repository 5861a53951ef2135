use crate::config::NodeConfig;
use anyhow::Result;
use async_trait::async_trait;
use polv_events::{EventsSource, MemoryEvents};
use polv_round::{ExecutorConfig, RoundExecutor};
use polv_sched::{
    InventoryProvider, JobsScheduler, LiveGate, NullSink, SchedulerConfig, SchedulerHandles,
    StaticRegistry,
};
use polv_store::{MemoryBackend, ReputationStore, StoreBackend};
use polv_transport::MockTransport;
use polv_types::{Inventory, Job, Position};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Per-job bankroll read from configuration. Deployments that pull the
/// vault state on-chain swap this for their own provider.
struct ConfigInventory {
    inventories: HashMap<String, Inventory>,
}

#[async_trait]
impl InventoryProvider for ConfigInventory {
    async fn initial_state(&self, job: &Job) -> (Inventory, Vec<Position>) {
        let inventory = self
            .inventories
            .get(&job.job_id)
            .copied()
            .unwrap_or_default();
        (inventory, Vec::new())
    }
}

/// The coordinator process: wires store, events source, transport and
/// scheduler together and runs until shutdown.
pub struct ValidatorNode {
    config: NodeConfig,
    store: Arc<ReputationStore>,
    handles: Arc<SchedulerHandles>,
    gate_handle: JoinHandle<()>,
}

impl ValidatorNode {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        info!(name = %config.node.name, netuid = config.node.netuid, "Initializing validator node");
        info!(
            wallet = %config.node.wallet_name,
            hotkey = %config.node.wallet_hotkey,
            network = %config.node.network,
            "Operator identity"
        );

        let store_backend = Self::store_backend(&config)?;
        let store = Arc::new(ReputationStore::new(
            store_backend,
            config.scheduler.violation_policy,
        ));

        // Jobs come from config; the store is their system of record.
        let mut inventories = HashMap::new();
        for job_config in &config.jobs {
            let job = job_config.to_job();
            store.put_job(&job).await?;
            inventories.insert(job.job_id.clone(), job_config.initial_inventory()?);
        }
        info!(jobs = config.jobs.len(), "Registered jobs");

        let events = Self::events_source(&config)?;
        // In-process loopback transport; a networked deployment plugs its
        // own MinerTransport here.
        let transport = Arc::new(MockTransport::new());

        let executor = Arc::new(RoundExecutor::new(
            events.clone(),
            transport,
            ExecutorConfig {
                miner_timeout: Duration::from_secs(config.scheduler.miner_timeout_secs),
                baseline_liquidity: config.scheduler.baseline_liquidity,
                ..ExecutorConfig::default()
            },
        ));

        if !config.node.dry_run {
            warn!("No executor sink configured; live decisions are logged, not executed");
        }
        let (live_gate, gate_handle) = LiveGate::spawn(Arc::new(NullSink), store.clone());

        let handles = Arc::new(SchedulerHandles {
            store: store.clone(),
            events,
            executor,
            registry: Arc::new(StaticRegistry::new(config.miners.iter().cloned())),
            inventory: Arc::new(ConfigInventory { inventories }),
            live_gate,
            config: SchedulerConfig {
                shutdown_grace: Duration::from_secs(config.scheduler.miner_timeout_secs),
            },
        });

        Ok(Self {
            config,
            store,
            handles,
            gate_handle,
        })
    }

    fn store_backend(config: &NodeConfig) -> Result<Arc<dyn StoreBackend>> {
        match config.store.backend.as_str() {
            "rocksdb" => {
                #[cfg(feature = "rocksdb")]
                {
                    let path = config.node.data_dir.join("store");
                    Ok(Arc::new(polv_store::RocksBackend::new(path)?))
                }
                #[cfg(not(feature = "rocksdb"))]
                {
                    warn!("RocksDB store requested but feature not enabled, using memory");
                    Ok(Arc::new(MemoryBackend::new()))
                }
            }
            _ => Ok(Arc::new(MemoryBackend::new())),
        }
    }

    fn events_source(config: &NodeConfig) -> Result<Arc<dyn EventsSource>> {
        match config.events.backend.as_str() {
            "rocksdb" => {
                #[cfg(feature = "rocksdb")]
                {
                    let path = config.node.data_dir.join("events");
                    Ok(Arc::new(polv_events::RocksEvents::new(path)?))
                }
                #[cfg(not(feature = "rocksdb"))]
                {
                    warn!("RocksDB events store requested but feature not enabled, using memory");
                    Ok(Arc::new(MemoryEvents::new()))
                }
            }
            _ => Ok(Arc::new(MemoryEvents::new())),
        }
    }

    /// Run the scheduler until a shutdown signal arrives, then drain and
    /// flush.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        });

        if self.config.node.dry_run {
            info!("Running in dry-run mode: executor emission suppressed");
        }

        let scheduler = JobsScheduler::new(self.handles.clone());
        scheduler.run(shutdown_rx).await?;

        // Scheduler is down; close the live gate and let it drain.
        drop(scheduler);
        drop(self.handles);
        if let Err(e) = self.gate_handle.await {
            warn!(error = %e, "Live gate worker ended abnormally");
        }
        self.store.flush().await?;
        info!("Validator node stopped");
        Ok(())
    }
}
