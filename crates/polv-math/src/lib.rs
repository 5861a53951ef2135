pub mod liquidity;
pub mod tick;

pub use liquidity::{
    amounts_for_liquidity, liquidity_and_used_amounts, liquidity_from_amounts, position_value,
};
pub use tick::{price_of_tick, sqrt_price_of_tick, sqrt_price_x96_to_price, tick_of_price, Q96};
