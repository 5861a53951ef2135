use crate::source::{EventsError, EventsSource, Result};
use async_trait::async_trait;
use polv_math::sqrt_price_x96_to_price;
use polv_types::pool::normalize_pool_address;
use polv_types::{PoolEvent, PoolEventKind};
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;

/// RocksDB-backed events store.
///
/// Keys are `evt:{pool}:{block:012}:{idx:010}` so a block range is one
/// forward scan from the range start.
pub struct RocksEvents {
    db: Arc<DB>,
}

impl RocksEvents {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| EventsError::BackendError(format!("Failed to open RocksDB: {}", e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn event_key(pool: &str, block: u64, log_index: u32) -> Vec<u8> {
        format!("evt:{}:{:012}:{:010}", pool, block, log_index).into_bytes()
    }

    /// Write an event. The store is read-only for the coordinator; this is
    /// the ingestion-side hook and the test fixture path.
    pub fn put_event(&self, pool: &str, event: &PoolEvent) -> Result<()> {
        let pool = normalize_pool_address(pool);
        let key = Self::event_key(&pool, event.block_number, event.log_index);
        let value = serde_json::to_vec(event)
            .map_err(|e| EventsError::SerializationError(e.to_string()))?;
        self.db
            .put(key, value)
            .map_err(|e| EventsError::BackendError(e.to_string()))
    }

    fn scan(&self, pool: &str, from_block: u64, to_block: u64) -> Result<Vec<PoolEvent>> {
        let start = Self::event_key(pool, from_block, 0);
        let end = Self::event_key(pool, to_block, u32::MAX);
        let mut events = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| EventsError::BackendError(e.to_string()))?;
            if key.as_ref() > end.as_slice() {
                break;
            }
            let event: PoolEvent = serde_json::from_slice(&value)
                .map_err(|e| EventsError::SerializationError(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventsSource for RocksEvents {
    async fn events_in(
        &self,
        pool: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>> {
        let pool = normalize_pool_address(pool);
        self.scan(&pool, from_block, to_block)
    }

    async fn price_at_or_before(&self, pool: &str, block: u64) -> Result<Option<f64>> {
        let pool = normalize_pool_address(pool);
        let events = self.scan(&pool, 0, block)?;
        Ok(events.iter().rev().find_map(|event| match event.kind {
            PoolEventKind::Swap { sqrt_price_x96, .. } => {
                Some(sqrt_price_x96_to_price(sqrt_price_x96))
            }
            _ => None,
        }))
    }

    async fn latest_block(&self, pool: &str) -> Result<Option<u64>> {
        let pool = normalize_pool_address(pool);
        let events = self.scan(&pool, 0, u64::MAX)?;
        Ok(events.last().map(|event| event.block_number))
    }
}
