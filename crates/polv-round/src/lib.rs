pub mod executor;

pub use executor::{ExecutorConfig, RoundError, RoundExecutor, RoundOutcome};
