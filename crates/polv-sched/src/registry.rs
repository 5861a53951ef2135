use async_trait::async_trait;
use polv_types::MinerId;

/// Where the coordinator learns which miners exist. Discovery itself is
/// someone else's problem (a metagraph, a directory service); the
/// scheduler only asks for the current roster.
#[async_trait]
pub trait MinerRegistry: Send + Sync {
    async fn active_miners(&self) -> Vec<MinerId>;
}

/// Fixed roster from configuration.
pub struct StaticRegistry {
    miners: Vec<MinerId>,
}

impl StaticRegistry {
    pub fn new(miners: impl IntoIterator<Item = impl Into<MinerId>>) -> Self {
        Self {
            miners: miners.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl MinerRegistry for StaticRegistry {
    async fn active_miners(&self) -> Vec<MinerId> {
        self.miners.clone()
    }
}
