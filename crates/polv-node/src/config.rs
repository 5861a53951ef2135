use anyhow::{bail, Context, Result};
use polv_score::ViolationPolicy;
use polv_types::{Constraints, Inventory, Job, Target};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Static miner roster; a dynamic registry replaces this in deployments
    /// that discover miners elsewhere. Kept ahead of the table sections so
    /// TOML can emit it at the document root.
    #[serde(default)]
    pub miners: Vec<String>,
    pub node: NodeSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub events: EventsSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub name: String,
    pub wallet_name: String,
    pub wallet_hotkey: String,
    pub network: String,
    pub netuid: u16,
    pub data_dir: PathBuf,
    /// Suppress executor-sink emission and any on-chain side effects.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_miner_timeout_secs")]
    pub miner_timeout_secs: u64,
    #[serde(default)]
    pub violation_policy: ViolationPolicy,
    #[serde(default = "default_baseline_liquidity")]
    pub baseline_liquidity: f64,
}

fn default_miner_timeout_secs() -> u64 {
    polv_types::DEFAULT_MINER_TIMEOUT_SECS
}

fn default_baseline_liquidity() -> f64 {
    1e19
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            miner_timeout_secs: default_miner_timeout_secs(),
            violation_policy: ViolationPolicy::default(),
            baseline_liquidity: default_baseline_liquidity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    pub backend: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsSettings {
    pub backend: String,
}

impl Default for EventsSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: String,
    pub pair_address: String,
    pub vault_address: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_round_duration_secs")]
    pub round_duration_secs: u64,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    #[serde(default = "default_blocks_per_round")]
    pub blocks_per_round: u64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    /// Token amounts in base units, as strings; wei-scale values overflow
    /// TOML integers.
    pub initial_amount0: String,
    pub initial_amount1: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Table section; must trail the scalar fields for TOML emission.
    #[serde(default)]
    pub constraints: Constraints,
}

fn default_chain_id() -> u64 {
    8453
}

fn default_round_duration_secs() -> u64 {
    900
}

fn default_checkpoint_interval() -> u64 {
    150
}

fn default_blocks_per_round() -> u64 {
    450
}

fn default_fee_rate() -> f64 {
    0.003
}

fn default_true() -> bool {
    true
}

impl JobConfig {
    pub fn to_job(&self) -> Job {
        Job {
            job_id: self.job_id.clone(),
            pair_address: self.pair_address.clone(),
            vault_address: self.vault_address.clone(),
            chain_id: self.chain_id,
            round_duration_secs: self.round_duration_secs,
            checkpoint_interval: self.checkpoint_interval,
            blocks_per_round: self.blocks_per_round,
            fee_rate: self.fee_rate,
            target: Target::PoL,
            constraints: self.constraints,
            active: self.active,
        }
    }

    pub fn initial_inventory(&self) -> Result<Inventory> {
        let amount0: u128 = self
            .initial_amount0
            .parse()
            .with_context(|| format!("job {}: bad initial_amount0", self.job_id))?;
        let amount1: u128 = self
            .initial_amount1
            .parse()
            .with_context(|| format!("job {}: bad initial_amount1", self.job_id))?;
        Ok(Inventory::new(amount0, amount1))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            miners: Vec::new(),
            node: NodeSettings {
                name: "polv-validator".to_string(),
                wallet_name: "default".to_string(),
                wallet_hotkey: "default".to_string(),
                network: "finney".to_string(),
                netuid: 98,
                data_dir: PathBuf::from("./data"),
                dry_run: false,
            },
            scheduler: SchedulerSettings::default(),
            store: StoreSettings::default(),
            events: EventsSettings::default(),
            logging: LoggingConfig::default(),
            jobs: vec![JobConfig {
                job_id: "example-pool".to_string(),
                pair_address: "0x0000000000000000000000000000000000000000".to_string(),
                vault_address: "0x0000000000000000000000000000000000000000".to_string(),
                chain_id: default_chain_id(),
                round_duration_secs: default_round_duration_secs(),
                checkpoint_interval: default_checkpoint_interval(),
                blocks_per_round: default_blocks_per_round(),
                fee_rate: default_fee_rate(),
                initial_amount0: "1000000000000000000".to_string(),
                initial_amount1: "2500000000".to_string(),
                active: true,
                constraints: Constraints::default(),
            }],
        }
    }
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config {}", path.as_ref().display()))?;
        let config: NodeConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), raw)
            .with_context(|| format!("Failed to write config {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            bail!("At least one job must be configured");
        }
        for job in &self.jobs {
            if job.checkpoint_interval == 0 {
                bail!("job {}: checkpoint_interval must be positive", job.job_id);
            }
            if job.blocks_per_round == 0 {
                bail!("job {}: blocks_per_round must be positive", job.job_id);
            }
            if !(0.0..=1.0).contains(&job.constraints.max_il) {
                bail!("job {}: max_il must be within [0, 1]", job.job_id);
            }
            if job.constraints.min_tick_width < 1 {
                bail!("job {}: min_tick_width must be at least 1", job.job_id);
            }
            job.initial_inventory()?;
        }
        match self.store.backend.as_str() {
            "memory" | "rocksdb" => {}
            other => bail!("Unknown store backend '{}'", other),
        }
        match self.events.backend.as_str() {
            "memory" | "rocksdb" => {}
            other => bail!("Unknown events backend '{}'", other),
        }
        Ok(())
    }
}
