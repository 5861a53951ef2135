pub mod error;
pub mod id;
pub mod job;
pub mod pool;
pub mod position;
pub mod protocol;

pub use error::{PolvError, Result};
pub use id::MinerId;
pub use job::{
    Constraints, Job, LiveExecution, MinerScore, Prediction, RebalanceDecision, Round,
    RoundStatus, RoundType, Target,
};
pub use pool::{PoolEvent, PoolEventKind, PoolState};
pub use position::{Inventory, MinerPortfolio, Position};
pub use protocol::{MinerMetadata, RebalanceQuery, RebalanceResponse};

/// Tick bounds of the concentrated-liquidity tick space.
pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

/// Default per-query miner deadline in seconds.
pub const DEFAULT_MINER_TIMEOUT_SECS: u64 = 60;
