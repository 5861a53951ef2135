use polv_types::{Constraints, Position};
use tracing::warn;

/// Check a desired position set against round constraints. Returns every
/// violation found; a non-empty list zeroes the miner's round score.
///
/// Rebalance-count and impermanent-loss limits are enforced where they are
/// observed (during and after simulation), not here.
pub fn validate_positions(constraints: &Constraints, positions: &[Position]) -> Vec<String> {
    let mut violations = Vec::new();

    for (i, position) in positions.iter().enumerate() {
        let width = position.tick_width();
        if width < constraints.min_tick_width {
            let violation = format!(
                "position {}: tick width {} is less than minimum {}",
                i, width, constraints.min_tick_width
            );
            warn!(violation = %violation, "Constraint violation");
            violations.push(violation);
        }
        if position.amount0 == 0 && position.amount1 == 0 {
            let violation = format!("position {}: both allocations are zero", i);
            warn!(violation = %violation, "Constraint violation");
            violations.push(violation);
        }
    }

    violations
}
