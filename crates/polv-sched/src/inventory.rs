use async_trait::async_trait;
use polv_types::{Inventory, Job, Position};

/// Supplies the bankroll and starting deployment a round simulates from.
/// Production implementations read the vault; tests and dry runs pin it.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn initial_state(&self, job: &Job) -> (Inventory, Vec<Position>);
}

/// Fixed inventory, no starting positions, for every job.
pub struct StaticInventory {
    inventory: Inventory,
    positions: Vec<Position>,
}

impl StaticInventory {
    pub fn new(inventory: Inventory, positions: Vec<Position>) -> Self {
        Self {
            inventory,
            positions,
        }
    }
}

#[async_trait]
impl InventoryProvider for StaticInventory {
    async fn initial_state(&self, _job: &Job) -> (Inventory, Vec<Position>) {
        (self.inventory, self.positions.clone())
    }
}
