use crate::transport::{MinerTransport, Result, TransportError};
use async_trait::async_trait;
use polv_types::{MinerId, RebalanceQuery, RebalanceResponse};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

type ReplyFn = dyn Fn(&RebalanceQuery) -> RebalanceResponse + Send + Sync;

/// Scripted behavior for one query to a mocked miner.
pub enum MockBehavior {
    /// Answer built from the query.
    Reply(Arc<ReplyFn>),
    Refuse(String),
    Timeout,
    Error(String),
}

impl MockBehavior {
    /// A well-behaved miner that keeps its current positions.
    pub fn echo() -> Self {
        MockBehavior::Reply(Arc::new(|query: &RebalanceQuery| {
            RebalanceResponse::rebalance(
                MinerId::new("mock"),
                query.current_positions.clone(),
            )
        }))
    }

    pub fn reply<F>(f: F) -> Self
    where
        F: Fn(&RebalanceQuery) -> RebalanceResponse + Send + Sync + 'static,
    {
        MockBehavior::Reply(Arc::new(f))
    }
}

/// In-process transport for tests and dry runs.
///
/// Each miner consumes its scripted behaviors in order; once the script is
/// exhausted the miner falls back to echoing its current positions.
#[derive(Default)]
pub struct MockTransport {
    scripts: RwLock<HashMap<MinerId, VecDeque<MockBehavior>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, miner_id: impl Into<MinerId>, behaviors: Vec<MockBehavior>) {
        self.scripts
            .write()
            .await
            .entry(miner_id.into())
            .or_default()
            .extend(behaviors);
    }
}

#[async_trait]
impl MinerTransport for MockTransport {
    async fn query(
        &self,
        miner_id: &MinerId,
        request: RebalanceQuery,
        _timeout: Duration,
    ) -> Result<RebalanceResponse> {
        let behavior = self
            .scripts
            .write()
            .await
            .get_mut(miner_id)
            .and_then(|queue| queue.pop_front());

        debug!(miner = %miner_id, block = request.block_number, "Mock query");
        match behavior {
            None => {
                let mut response = RebalanceResponse::rebalance(
                    miner_id.clone(),
                    request.current_positions.clone(),
                );
                response.miner_id = miner_id.clone();
                Ok(response)
            }
            Some(MockBehavior::Reply(f)) => {
                let mut response = f(&request);
                response.miner_id = miner_id.clone();
                Ok(response)
            }
            Some(MockBehavior::Refuse(reason)) => {
                Ok(RebalanceResponse::refusal(miner_id.clone(), reason))
            }
            Some(MockBehavior::Timeout) => Err(TransportError::Timeout),
            Some(MockBehavior::Error(message)) => Err(TransportError::Transport(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polv_types::{Constraints, Inventory, Position, RoundType};

    fn query(block: u64) -> RebalanceQuery {
        RebalanceQuery {
            job_id: "j".into(),
            vault_address: "0xvault".into(),
            pair_address: "0xpool".into(),
            chain_id: 8453,
            round_id: "j_eval_1_0".into(),
            round_type: RoundType::Eval,
            block_number: block,
            current_price: 1.0,
            current_positions: vec![Position::new(-60, 60, 5, 5).unwrap()],
            inventory_remaining: Inventory::new(100, 100),
            rebalances_so_far: 0,
            constraints: Constraints::default(),
        }
    }

    #[tokio::test]
    async fn test_script_is_consumed_in_order_then_echoes() {
        let transport = MockTransport::new();
        let miner = MinerId::new("m0");
        transport
            .script(
                miner.clone(),
                vec![MockBehavior::Timeout, MockBehavior::Refuse("busy".into())],
            )
            .await;

        let timeout = Duration::from_secs(1);
        assert!(matches!(
            transport.query(&miner, query(1), timeout).await,
            Err(TransportError::Timeout)
        ));
        let refusal = transport.query(&miner, query(2), timeout).await.unwrap();
        assert!(!refusal.accepted);

        // Script exhausted: echo the current positions.
        let echo = transport.query(&miner, query(3), timeout).await.unwrap();
        assert!(echo.accepted);
        assert_eq!(echo.desired_positions, query(3).current_positions);
        assert_eq!(echo.miner_id, miner);
    }
}
