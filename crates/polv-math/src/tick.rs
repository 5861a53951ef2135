use polv_types::{MAX_TICK, MIN_TICK};

/// 2^96, the fixed-point scale of on-chain sqrt prices.
pub const Q96: f64 = 79228162514264337593543950336.0;

const TICK_BASE: f64 = 1.0001;

/// Price (token1 per token0) at a tick: `1.0001^tick`.
pub fn price_of_tick(tick: i32) -> f64 {
    TICK_BASE.powi(tick.clamp(MIN_TICK, MAX_TICK))
}

/// Floor tick of a price: `⌊log(p) / log(1.0001)⌋`, clamped to the tick
/// space. Non-positive prices map to the minimum tick.
pub fn tick_of_price(price: f64) -> i32 {
    if price <= 0.0 || !price.is_finite() {
        return MIN_TICK;
    }
    let tick = (price.ln() / TICK_BASE.ln()).floor() as i64;
    tick.clamp(MIN_TICK as i64, MAX_TICK as i64) as i32
}

pub fn sqrt_price_of_tick(tick: i32) -> f64 {
    price_of_tick(tick).sqrt()
}

/// Price from an on-chain `sqrtPriceX96`: `(x / 2^96)^2`.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: u128) -> f64 {
    let sqrt_price = sqrt_price_x96 as f64 / Q96;
    sqrt_price * sqrt_price
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_of_tick_zero_is_unity() {
        assert_eq!(price_of_tick(0), 1.0);
    }

    #[test]
    fn test_tick_of_price_floors() {
        // 1.0001^100 < 1.011 < 1.0001^110
        assert_eq!(tick_of_price(1.011), 109);
    }

    #[test]
    fn test_tick_of_price_clamps_degenerate_input() {
        assert_eq!(tick_of_price(0.0), MIN_TICK);
        assert_eq!(tick_of_price(-1.0), MIN_TICK);
    }

    #[test]
    fn test_sqrt_price_x96_at_parity() {
        let x96: u128 = 1 << 96;
        let price = sqrt_price_x96_to_price(x96);
        assert!((price - 1.0).abs() < 1e-12);
    }
}
