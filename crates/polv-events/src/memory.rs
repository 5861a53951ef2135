use crate::source::{EventsSource, Result};
use async_trait::async_trait;
use polv_math::sqrt_price_x96_to_price;
use polv_types::pool::normalize_pool_address;
use polv_types::{PoolEvent, PoolEventKind};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

type EventKey = (String, u64, u32);

/// In-memory events source for tests and development. Also serves as the
/// fixture builder for the round and scheduler test suites.
#[derive(Default)]
pub struct MemoryEvents {
    events: Arc<RwLock<BTreeMap<EventKey, PoolEvent>>>,
}

impl MemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, pool: &str, event: PoolEvent) {
        let key = (
            normalize_pool_address(pool),
            event.block_number,
            event.log_index,
        );
        self.events.write().await.insert(key, event);
    }

    pub async fn insert_all(&self, pool: &str, events: impl IntoIterator<Item = PoolEvent>) {
        let pool = normalize_pool_address(pool);
        let mut map = self.events.write().await;
        for event in events {
            map.insert((pool.clone(), event.block_number, event.log_index), event);
        }
    }
}

#[async_trait]
impl EventsSource for MemoryEvents {
    async fn events_in(
        &self,
        pool: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>> {
        let pool = normalize_pool_address(pool);
        let events = self.events.read().await;
        let lower = Bound::Included((pool.clone(), from_block, 0));
        let upper = Bound::Included((pool, to_block, u32::MAX));
        Ok(events
            .range((lower, upper))
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn price_at_or_before(&self, pool: &str, block: u64) -> Result<Option<f64>> {
        let pool = normalize_pool_address(pool);
        let events = self.events.read().await;
        let lower = Bound::Included((pool.clone(), 0, 0));
        let upper = Bound::Included((pool, block, u32::MAX));
        let price = events
            .range((lower, upper))
            .rev()
            .find_map(|(_, event)| match event.kind {
                PoolEventKind::Swap { sqrt_price_x96, .. } => {
                    Some(sqrt_price_x96_to_price(sqrt_price_x96))
                }
                _ => None,
            });
        Ok(price)
    }

    async fn latest_block(&self, pool: &str) -> Result<Option<u64>> {
        let pool = normalize_pool_address(pool);
        let events = self.events.read().await;
        let lower = Bound::Included((pool.clone(), 0, 0));
        let upper = Bound::Included((pool, u64::MAX, u32::MAX));
        Ok(events
            .range((lower, upper))
            .next_back()
            .map(|((_, block, _), _)| *block))
    }
}
