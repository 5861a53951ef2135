use async_trait::async_trait;
use polv_types::PoolEvent;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    /// Transient backend failure; callers may retry.
    #[error("Events source unavailable: {0}")]
    Unavailable(String),

    #[error("Events backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EventsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventsError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, EventsError>;

/// Read-only query contract over the historical pool-events store.
///
/// An empty range is a valid empty stream, not an error. Pool addresses are
/// accepted with or without the `0x` prefix; implementations normalize.
#[async_trait]
pub trait EventsSource: Send + Sync {
    /// Events for `pool` in `[from_block, to_block]`, strictly ascending by
    /// `(block_number, log_index)`.
    async fn events_in(&self, pool: &str, from_block: u64, to_block: u64)
        -> Result<Vec<PoolEvent>>;

    /// Price derived from the last swap at or before `block`, or `None`
    /// when the store holds nothing that early.
    async fn price_at_or_before(&self, pool: &str, block: u64) -> Result<Option<f64>>;

    /// Highest block the store has seen for `pool`. The scheduler anchors
    /// new rounds to this cursor.
    async fn latest_block(&self, pool: &str) -> Result<Option<u64>>;
}
