use async_trait::async_trait;
use polv_types::{MinerId, RebalanceQuery, RebalanceResponse};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The miner did not answer before the deadline.
    #[error("Query to miner timed out")]
    Timeout,

    #[error("Transport failure: {0}")]
    Transport(String),

    /// The miner answered with something that does not decode into a valid
    /// response; treated like any other transport failure.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Unary request/response to a named miner with a hard deadline.
///
/// The wire is deliberately unspecified: an RPC mesh, HTTP, or an
/// in-process mock all satisfy this. A refusal is a *successful* response
/// with `accepted = false`, not an error.
#[async_trait]
pub trait MinerTransport: Send + Sync {
    async fn query(
        &self,
        miner_id: &MinerId,
        request: RebalanceQuery,
        timeout: Duration,
    ) -> Result<RebalanceResponse>;
}
