use crate::tick::sqrt_price_of_tick;
use polv_types::Position;

/// Liquidity `L` of a position funded with `amount0`/`amount1` at the given
/// price, standard v3 inversion. When the price is in range both sides are
/// computed and the binding (smaller) one is taken.
pub fn liquidity_from_amounts(
    amount0: u128,
    amount1: u128,
    tick_lower: i32,
    tick_upper: i32,
    price: f64,
) -> f64 {
    let sqrt_p = price.sqrt();
    let sqrt_a = sqrt_price_of_tick(tick_lower);
    let sqrt_b = sqrt_price_of_tick(tick_upper);
    if sqrt_b <= sqrt_a {
        return 0.0;
    }
    let amount0 = amount0 as f64;
    let amount1 = amount1 as f64;

    let liquidity = if sqrt_p <= sqrt_a {
        amount0 * sqrt_a * sqrt_b / (sqrt_b - sqrt_a)
    } else if sqrt_p < sqrt_b {
        let l0 = if sqrt_b > sqrt_p {
            amount0 * sqrt_p * sqrt_b / (sqrt_b - sqrt_p)
        } else {
            0.0
        };
        let l1 = if sqrt_p > sqrt_a {
            amount1 / (sqrt_p - sqrt_a)
        } else {
            0.0
        };
        if l0 > 0.0 && l1 > 0.0 {
            l0.min(l1)
        } else {
            l0.max(l1)
        }
    } else {
        amount1 / (sqrt_b - sqrt_a)
    };

    liquidity.max(0.0)
}

/// Token amounts held by liquidity `L` in `[tick_lower, tick_upper)` at the
/// given price. Inverse of [`liquidity_from_amounts`].
pub fn amounts_for_liquidity(
    liquidity: f64,
    tick_lower: i32,
    tick_upper: i32,
    price: f64,
) -> (f64, f64) {
    if liquidity <= 0.0 {
        return (0.0, 0.0);
    }
    let sqrt_p = price.sqrt();
    let sqrt_a = sqrt_price_of_tick(tick_lower);
    let sqrt_b = sqrt_price_of_tick(tick_upper);
    if sqrt_b <= sqrt_a {
        return (0.0, 0.0);
    }

    if sqrt_p <= sqrt_a {
        let amount0 = liquidity * (sqrt_b - sqrt_a) / (sqrt_a * sqrt_b);
        (amount0.max(0.0), 0.0)
    } else if sqrt_p < sqrt_b {
        let amount0 = liquidity * (sqrt_b - sqrt_p) / (sqrt_p * sqrt_b);
        let amount1 = liquidity * (sqrt_p - sqrt_a);
        (amount0.max(0.0), amount1.max(0.0))
    } else {
        let amount1 = liquidity * (sqrt_b - sqrt_a);
        (0.0, amount1.max(0.0))
    }
}

/// Liquidity obtained from the requested amounts plus the amounts actually
/// consumed opening it (the non-binding side is only partially used).
/// Used amounts are rounded into token units and never exceed the request.
pub fn liquidity_and_used_amounts(
    tick_lower: i32,
    tick_upper: i32,
    amount0: u128,
    amount1: u128,
    price: f64,
) -> (f64, u128, u128) {
    let liquidity = liquidity_from_amounts(amount0, amount1, tick_lower, tick_upper, price);
    let (used0, used1) = amounts_for_liquidity(liquidity, tick_lower, tick_upper, price);
    let used0 = (used0.round().max(0.0) as u128).min(amount0);
    let used1 = (used1.round().max(0.0) as u128).min(amount1);
    (liquidity, used0, used1)
}

/// Value of a position in token1 at the given price.
pub fn position_value(position: &Position, price: f64) -> f64 {
    let liquidity = liquidity_from_amounts(
        position.amount0,
        position.amount1,
        position.tick_lower,
        position.tick_upper,
        price,
    );
    let (amount0, amount1) =
        amounts_for_liquidity(liquidity, position.tick_lower, position.tick_upper, price);
    amount0 * price + amount1
}
