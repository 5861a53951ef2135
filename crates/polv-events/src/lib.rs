pub mod memory;
pub mod retry;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod source;

pub use memory::MemoryEvents;
pub use retry::{with_retries, RetryPolicy};
#[cfg(feature = "rocksdb")]
pub use rocks::RocksEvents;
pub use source::{EventsError, EventsSource, Result};
