use serde::{Deserialize, Serialize};

/// Pool state at a block.
///
/// `current_tick` is the tick consistent with `sqrt_price` (the floor tick
/// of `sqrt_price^2`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub block: u64,
    pub sqrt_price: f64,
    pub current_tick: i32,
    pub fee_rate: f64,
}

/// One on-chain pool event, ordered by `(block_number, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    pub block_number: u64,
    pub log_index: u32,
    pub kind: PoolEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEventKind {
    Swap {
        /// Signed pool-side token deltas.
        amount0_delta: f64,
        amount1_delta: f64,
        sqrt_price_x96: u128,
        new_tick: i32,
    },
    Mint {
        tick_lower: i32,
        tick_upper: i32,
        liquidity: f64,
    },
    Burn {
        tick_lower: i32,
        tick_upper: i32,
        liquidity: f64,
    },
    Collect {
        tick_lower: i32,
        tick_upper: i32,
        amount0: f64,
        amount1: f64,
    },
}

impl PoolEvent {
    /// Stable stream ordering key.
    pub fn ordering_key(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// Normalize a pool address for keying: lowercase, no `0x` prefix.
///
/// The backing events store indexes addresses without the prefix; callers
/// may pass either form.
pub fn normalize_pool_address(address: &str) -> String {
    let lower = address.to_ascii_lowercase();
    lower.strip_prefix("0x").unwrap_or(&lower).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pool_address() {
        assert_eq!(normalize_pool_address("0xAbCd01"), "abcd01");
        assert_eq!(normalize_pool_address("abcd01"), "abcd01");
        assert_eq!(normalize_pool_address("0XABCD01"), "abcd01");
    }

    #[test]
    fn test_event_kind_roundtrips_through_json() {
        let ev = PoolEvent {
            block_number: 12,
            log_index: 3,
            kind: PoolEventKind::Swap {
                amount0_delta: -5.0,
                amount1_delta: 10.0,
                sqrt_price_x96: 1 << 96,
                new_tick: 0,
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: PoolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
