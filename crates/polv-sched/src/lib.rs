pub mod inventory;
pub mod live;
pub mod registry;
pub mod scheduler;

pub use inventory::{InventoryProvider, StaticInventory};
pub use live::{ExecutorSink, LiveGate, NullSink, SinkError};
pub use registry::{MinerRegistry, StaticRegistry};
pub use scheduler::{JobRunner, JobsScheduler, SchedulerConfig, SchedulerError, SchedulerHandles};
