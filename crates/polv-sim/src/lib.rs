pub mod simulator;

pub use simulator::{PoolSimulator, SimConfig, SimError};

pub type Result<T> = std::result::Result<T, SimError>;
