use polv_math::{amounts_for_liquidity, liquidity_and_used_amounts, Q96};
use polv_types::{Inventory, MinerId, PoolEvent, PoolEventKind, PoolState, Position};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Simulator cannot move backwards: at block {at}, asked for {requested}")]
    NonMonotonicAdvance { at: u64, requested: u64 },

    #[error("Unknown owner: {0}")]
    UnknownOwner(MinerId),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Insufficient inventory: need ({need0}, {need1}), held ({held0}, {held1})")]
    InsufficientInventory {
        need0: u128,
        need1: u128,
        held0: u128,
        held1: u128,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub fee_rate: f64,
    /// Denominator floor for fee shares when the event stream carries no
    /// mint/burn history for the range.
    pub baseline_liquidity: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fee_rate: 0.003,
            baseline_liquidity: 1e19,
        }
    }
}

/// An open range: the position as the owner requested it, plus what opening
/// it actually consumed.
#[derive(Debug, Clone)]
struct OpenPosition {
    position: Position,
    liquidity: f64,
    used0: u128,
    used1: u128,
    entry_sqrt_price: f64,
}

#[derive(Debug, Clone, Default)]
struct OwnerBook {
    open: Vec<OpenPosition>,
    inventory: Inventory,
    fees_accrued: (f64, f64),
}

/// Forward simulator for one pool.
///
/// Consumes a pre-fetched, ordered event stream; tracks pool price/tick,
/// pool-wide liquidity from mint/burn events, and per-owner position books.
/// Deterministic given the same stream and the same call sequence.
pub struct PoolSimulator {
    state: PoolState,
    config: SimConfig,
    events: Arc<Vec<PoolEvent>>,
    cursor: usize,
    /// Net liquidity deltas at tick boundaries (mint adds at the lower
    /// bound, removes at the upper).
    liquidity_deltas: BTreeMap<i32, f64>,
    books: HashMap<MinerId, OwnerBook>,
}

impl PoolSimulator {
    pub fn new(initial_state: PoolState, config: SimConfig, events: Arc<Vec<PoolEvent>>) -> Self {
        Self {
            state: initial_state,
            config,
            events,
            cursor: 0,
            liquidity_deltas: BTreeMap::new(),
            books: HashMap::new(),
        }
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    /// Current price, token1 per token0.
    pub fn price(&self) -> f64 {
        self.state.sqrt_price * self.state.sqrt_price
    }

    pub fn register_owner(&mut self, owner: MinerId, inventory: Inventory) {
        self.books.insert(
            owner,
            OwnerBook {
                inventory,
                ..OwnerBook::default()
            },
        );
    }

    /// Consume all events up to and including `block`, updating pool state
    /// and crediting swap fees to in-range tracked positions.
    pub fn advance_to(&mut self, block: u64) -> Result<(), SimError> {
        if block < self.state.block {
            return Err(SimError::NonMonotonicAdvance {
                at: self.state.block,
                requested: block,
            });
        }
        while self.cursor < self.events.len() && self.events[self.cursor].block_number <= block {
            let event = self.events[self.cursor].clone();
            self.apply_event(&event);
            self.cursor += 1;
        }
        self.state.block = block;
        Ok(())
    }

    fn apply_event(&mut self, event: &PoolEvent) {
        match event.kind {
            PoolEventKind::Swap {
                amount0_delta,
                amount1_delta,
                sqrt_price_x96,
                new_tick,
            } => {
                let pre_tick = self.state.current_tick;
                self.credit_swap_fees(pre_tick, new_tick, amount0_delta, amount1_delta);
                self.state.sqrt_price = sqrt_price_x96 as f64 / Q96;
                self.state.current_tick = new_tick;
            }
            PoolEventKind::Mint {
                tick_lower,
                tick_upper,
                liquidity,
            } => {
                *self.liquidity_deltas.entry(tick_lower).or_insert(0.0) += liquidity;
                *self.liquidity_deltas.entry(tick_upper).or_insert(0.0) -= liquidity;
            }
            PoolEventKind::Burn {
                tick_lower,
                tick_upper,
                liquidity,
            } => {
                *self.liquidity_deltas.entry(tick_lower).or_insert(0.0) -= liquidity;
                *self.liquidity_deltas.entry(tick_upper).or_insert(0.0) += liquidity;
            }
            // Collects move already-attributed fees on chain; tracked
            // portfolios account fees at swap time.
            PoolEventKind::Collect { .. } => {}
        }
    }

    /// Pool-wide active liquidity at a tick, from the mint/burn history.
    fn active_liquidity_at(&self, tick: i32) -> f64 {
        let tracked: f64 = self
            .liquidity_deltas
            .range(..=tick)
            .map(|(_, delta)| *delta)
            .sum();
        if tracked > 0.0 {
            tracked
        } else {
            self.config.baseline_liquidity
        }
    }

    fn credit_swap_fees(&mut self, pre_tick: i32, new_tick: i32, amount0: f64, amount1: f64) {
        let fee0 = amount0.abs() * self.config.fee_rate;
        let fee1 = amount1.abs() * self.config.fee_rate;
        if fee0 == 0.0 && fee1 == 0.0 {
            return;
        }
        let pool_liquidity = self.active_liquidity_at(pre_tick);

        for book in self.books.values_mut() {
            for open in &book.open {
                let weight = traversal_weight(&open.position, pre_tick, new_tick);
                if weight == 0.0 {
                    continue;
                }
                let share = (open.liquidity / pool_liquidity).min(1.0);
                book.fees_accrued.0 += fee0 * share * weight;
                book.fees_accrued.1 += fee1 * share * weight;
            }
        }
    }

    /// Close all of `owner`'s positions at the current price, then open
    /// `new_positions` from inventory. Atomic: on failure nothing changes.
    ///
    /// Opening consumes only the binding-side amounts; the residue of each
    /// request stays in inventory. The book records positions as requested,
    /// which is what the no-rebalance set equality compares against.
    pub fn apply_rebalance(
        &mut self,
        owner: &MinerId,
        new_positions: &[Position],
    ) -> Result<(), SimError> {
        let price = self.price();
        let sqrt_price = self.state.sqrt_price;
        let book = self
            .books
            .get(owner)
            .ok_or_else(|| SimError::UnknownOwner(owner.clone()))?;

        // Tentative inventory after closing everything.
        let mut inventory = book.inventory;
        for open in &book.open {
            let (amount0, amount1) = close_amounts(open, sqrt_price, price);
            inventory.deposit(amount0, amount1);
        }

        // Validate and price the new set before committing.
        let mut opens = Vec::with_capacity(new_positions.len());
        let (mut need0, mut need1) = (0u128, 0u128);
        for position in new_positions {
            if position.tick_upper <= position.tick_lower {
                return Err(SimError::InvalidPosition(format!(
                    "tick_upper {} <= tick_lower {}",
                    position.tick_upper, position.tick_lower
                )));
            }
            let (liquidity, used0, used1) = liquidity_and_used_amounts(
                position.tick_lower,
                position.tick_upper,
                position.amount0,
                position.amount1,
                price,
            );
            need0 = need0.saturating_add(used0);
            need1 = need1.saturating_add(used1);
            opens.push(OpenPosition {
                position: *position,
                liquidity,
                used0,
                used1,
                entry_sqrt_price: sqrt_price,
            });
        }
        if need0 > inventory.amount0 || need1 > inventory.amount1 {
            return Err(SimError::InsufficientInventory {
                need0,
                need1,
                held0: inventory.amount0,
                held1: inventory.amount1,
            });
        }
        inventory.amount0 -= need0;
        inventory.amount1 -= need1;

        let book = self
            .books
            .get_mut(owner)
            .ok_or_else(|| SimError::UnknownOwner(owner.clone()))?;
        debug!(
            owner = %owner,
            closed = book.open.len(),
            opened = opens.len(),
            block = self.state.block,
            "Applied rebalance"
        );
        book.open = opens;
        book.inventory = inventory;
        Ok(())
    }

    /// Owner's current positions (as requested), free inventory and accrued
    /// fees.
    pub fn portfolio_of(
        &self,
        owner: &MinerId,
    ) -> Result<(Vec<Position>, Inventory, (f64, f64)), SimError> {
        let book = self
            .books
            .get(owner)
            .ok_or_else(|| SimError::UnknownOwner(owner.clone()))?;
        let positions = book.open.iter().map(|o| o.position).collect();
        Ok((positions, book.inventory, book.fees_accrued))
    }
}

/// Amounts returned when closing a position. When the price has not moved
/// since entry the consumed amounts come back exactly; otherwise they are
/// recomputed from liquidity at the closing price.
fn close_amounts(open: &OpenPosition, sqrt_price: f64, price: f64) -> (u128, u128) {
    if sqrt_price == open.entry_sqrt_price {
        return (open.used0, open.used1);
    }
    let (amount0, amount1) = amounts_for_liquidity(
        open.liquidity,
        open.position.tick_lower,
        open.position.tick_upper,
        price,
    );
    (
        amount0.round().max(0.0) as u128,
        amount1.round().max(0.0) as u128,
    )
}

/// Fraction of a swap's fee a position participates in.
///
/// A swap that stays on one tick pays positions containing the pre-swap
/// tick in full; a tick-crossing swap is weighted by the fraction of the
/// traversed span overlapping the position's range.
fn traversal_weight(position: &Position, pre_tick: i32, new_tick: i32) -> f64 {
    if pre_tick == new_tick {
        return if position.contains_tick(pre_tick) {
            1.0
        } else {
            0.0
        };
    }
    let span_lo = pre_tick.min(new_tick) as f64;
    let span_hi = pre_tick.max(new_tick) as f64;
    let overlap_lo = span_lo.max(position.tick_lower as f64);
    let overlap_hi = span_hi.min(position.tick_upper as f64);
    ((overlap_hi - overlap_lo) / (span_hi - span_lo)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parity_state(block: u64) -> PoolState {
        PoolState {
            block,
            sqrt_price: 1.0,
            current_tick: 0,
            fee_rate: 0.003,
        }
    }

    fn swap_at(block: u64, log_index: u32, volume0: f64, volume1: f64) -> PoolEvent {
        // Price-preserving swap at parity: fee volume without tick movement.
        PoolEvent {
            block_number: block,
            log_index,
            kind: PoolEventKind::Swap {
                amount0_delta: volume0,
                amount1_delta: volume1,
                sqrt_price_x96: 1 << 96,
                new_tick: 0,
            },
        }
    }

    fn miner() -> MinerId {
        MinerId::new("m0")
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut sim = PoolSimulator::new(parity_state(100), SimConfig::default(), Arc::new(vec![]));
        sim.advance_to(150).unwrap();
        assert!(matches!(
            sim.advance_to(140),
            Err(SimError::NonMonotonicAdvance { .. })
        ));
    }

    #[test]
    fn test_in_range_position_earns_fees_out_of_range_does_not() {
        let events = Arc::new(vec![swap_at(101, 0, 1_000_000.0, 1_000_000.0)]);
        let mut sim = PoolSimulator::new(
            parity_state(100),
            SimConfig {
                fee_rate: 0.003,
                baseline_liquidity: 1e9,
            },
            events,
        );
        let in_range = MinerId::new("in");
        let out_of_range = MinerId::new("out");
        sim.register_owner(in_range.clone(), Inventory::new(1_000_000, 1_000_000));
        sim.register_owner(out_of_range.clone(), Inventory::new(1_000_000, 1_000_000));

        sim.apply_rebalance(&in_range, &[Position::new(-600, 600, 500_000, 500_000).unwrap()])
            .unwrap();
        sim.apply_rebalance(
            &out_of_range,
            &[Position::new(6000, 6600, 500_000, 0).unwrap()],
        )
        .unwrap();

        sim.advance_to(150).unwrap();

        let (_, _, fees_in) = sim.portfolio_of(&in_range).unwrap();
        let (_, _, fees_out) = sim.portfolio_of(&out_of_range).unwrap();
        assert!(fees_in.0 > 0.0 && fees_in.1 > 0.0);
        assert_eq!(fees_out, (0.0, 0.0));
    }

    #[test]
    fn test_rebalance_roundtrip_restores_portfolio() {
        let mut sim = PoolSimulator::new(parity_state(100), SimConfig::default(), Arc::new(vec![]));
        sim.register_owner(miner(), Inventory::new(1_000_000, 2_000_000));

        let first = Position::new(-600, 600, 400_000, 400_000).unwrap();
        sim.apply_rebalance(&miner(), &[first]).unwrap();
        let (original_positions, original_inventory, _) = sim.portfolio_of(&miner()).unwrap();

        let second = Position::new(-1200, 1200, 300_000, 300_000).unwrap();
        sim.apply_rebalance(&miner(), &[second]).unwrap();

        // Price unchanged: restoring the original set restores the book.
        sim.apply_rebalance(&miner(), &original_positions).unwrap();
        let (positions, inventory, _) = sim.portfolio_of(&miner()).unwrap();
        assert_eq!(positions, original_positions);
        assert_eq!(inventory, original_inventory);
    }

    #[test]
    fn test_noop_rebalance_equals_not_rebalancing() {
        let events = Arc::new(vec![swap_at(110, 0, 50_000.0, 50_000.0)]);
        let make = |events: Arc<Vec<PoolEvent>>| {
            let mut sim = PoolSimulator::new(parity_state(100), SimConfig::default(), events);
            sim.register_owner(miner(), Inventory::new(1_000_000, 1_000_000));
            sim.apply_rebalance(&miner(), &[Position::new(-600, 600, 500_000, 500_000).unwrap()])
                .unwrap();
            sim
        };

        let mut with_noop = make(events.clone());
        with_noop.advance_to(120).unwrap();
        let (current, _, _) = with_noop.portfolio_of(&miner()).unwrap();
        with_noop.apply_rebalance(&miner(), &current).unwrap();

        let mut without = make(events);
        without.advance_to(120).unwrap();

        let (p1, i1, _) = with_noop.portfolio_of(&miner()).unwrap();
        let (p2, i2, _) = without.portfolio_of(&miner()).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(i1, i2);
    }

    #[test]
    fn test_insufficient_inventory_rejected_without_mutation() {
        let mut sim = PoolSimulator::new(parity_state(100), SimConfig::default(), Arc::new(vec![]));
        sim.register_owner(miner(), Inventory::new(1_000, 1_000));

        let before = sim.portfolio_of(&miner()).unwrap();
        let oversized = Position::new(-600, 600, 10_000, 10_000).unwrap();
        assert!(matches!(
            sim.apply_rebalance(&miner(), &[oversized]),
            Err(SimError::InsufficientInventory { .. })
        ));
        assert_eq!(sim.portfolio_of(&miner()).unwrap(), before);
    }

    #[test]
    fn test_close_all_conserves_tokens_without_price_movement() {
        let mut sim = PoolSimulator::new(parity_state(100), SimConfig::default(), Arc::new(vec![]));
        sim.register_owner(miner(), Inventory::new(1_000_000, 2_000_000));
        sim.apply_rebalance(&miner(), &[Position::new(-600, 600, 600_000, 600_000).unwrap()])
            .unwrap();

        // Close everything back into inventory; no swaps happened, so every
        // unit must come back.
        sim.apply_rebalance(&miner(), &[]).unwrap();
        let (positions, inventory, fees) = sim.portfolio_of(&miner()).unwrap();
        assert!(positions.is_empty());
        assert_eq!(inventory, Inventory::new(1_000_000, 2_000_000));
        assert_eq!(fees, (0.0, 0.0));
    }

    #[test]
    fn test_determinism_bitwise() {
        let events = Arc::new(vec![
            swap_at(105, 0, 10_000.0, 10_000.0),
            swap_at(117, 0, 7_000.0, 3_000.0),
        ]);
        let run = || {
            let mut sim =
                PoolSimulator::new(parity_state(100), SimConfig::default(), events.clone());
            sim.register_owner(miner(), Inventory::new(1_000_000, 1_000_000));
            sim.apply_rebalance(&miner(), &[Position::new(-600, 600, 500_000, 500_000).unwrap()])
                .unwrap();
            sim.advance_to(120).unwrap();
            let (_, _, fees) = sim.portfolio_of(&miner()).unwrap();
            (fees.0.to_bits(), fees.1.to_bits())
        };
        assert_eq!(run(), run());
    }
}
