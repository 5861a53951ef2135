use crate::error::{PolvError, Result};
use serde::{Deserialize, Serialize};

/// A concentrated-liquidity range with the token amounts allocated to it.
///
/// `tick_upper` must be strictly greater than `tick_lower`; the minimum
/// width is a per-round constraint checked by the validator, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0: u128,
    pub amount1: u128,
}

impl Position {
    pub fn new(tick_lower: i32, tick_upper: i32, amount0: u128, amount1: u128) -> Result<Self> {
        if tick_upper <= tick_lower {
            return Err(PolvError::InvalidPosition(format!(
                "tick_upper {} must be greater than tick_lower {}",
                tick_upper, tick_lower
            )));
        }
        Ok(Self {
            tick_lower,
            tick_upper,
            amount0,
            amount1,
        })
    }

    pub fn tick_width(&self) -> i32 {
        self.tick_upper - self.tick_lower
    }

    /// Whether `tick` falls inside the half-open range `[tick_lower, tick_upper)`.
    pub fn contains_tick(&self, tick: i32) -> bool {
        self.tick_lower <= tick && tick < self.tick_upper
    }
}

/// Uncommitted token holdings, denominated in token units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub amount0: u128,
    pub amount1: u128,
}

impl Inventory {
    pub fn new(amount0: u128, amount1: u128) -> Self {
        Self { amount0, amount1 }
    }

    pub fn deposit(&mut self, amount0: u128, amount1: u128) {
        self.amount0 = self.amount0.saturating_add(amount0);
        self.amount1 = self.amount1.saturating_add(amount1);
    }

    pub fn withdraw(&mut self, amount0: u128, amount1: u128) -> Result<()> {
        if amount0 > self.amount0 {
            return Err(PolvError::InsufficientInventory {
                token: 0,
                requested: amount0,
                held: self.amount0,
            });
        }
        if amount1 > self.amount1 {
            return Err(PolvError::InsufficientInventory {
                token: 1,
                requested: amount1,
                held: self.amount1,
            });
        }
        self.amount0 -= amount0;
        self.amount1 -= amount1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.amount0 == 0 && self.amount1 == 0
    }
}

/// A miner's holdings over the course of one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerPortfolio {
    pub positions: Vec<Position>,
    pub inventory: Inventory,
    /// Fees accrued to in-range positions, per token.
    pub fees_accrued: (f64, f64),
    pub rebalance_count: u32,
    pub refused: bool,
}

/// Set equality on `(tick_lower, tick_upper, amount0, amount1)`, the
/// no-rebalance test from the miner protocol.
pub fn same_position_set(a: &[Position], b: &[Position]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<Position> = a.to_vec();
    let mut b: Vec<Position> = b.to_vec();
    let key = |p: &Position| (p.tick_lower, p.tick_upper, p.amount0, p.amount1);
    a.sort_by_key(key);
    b.sort_by_key(key);
    a == b
}
