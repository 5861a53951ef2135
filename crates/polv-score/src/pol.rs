use polv_types::MinerId;

/// Smooth-max sharpness for the inventory-loss penalty.
const SMOOTH_K: f64 = 20.0;
/// Exponent of the loss penalty.
const LOSS_PENALTY: f64 = 10.0;

/// Everything the proof-of-liquidity score needs about one miner's round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub initial_amount0: u128,
    pub initial_amount1: u128,
    pub final_amount0: u128,
    pub final_amount1: u128,
    /// Fees accrued over the round, per token.
    pub fees_accrued: (f64, f64),
    pub initial_price: f64,
    pub final_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolScore {
    pub score: f64,
    pub value_gain: f64,
    pub inv_loss: f64,
    pub penalty: f64,
}

/// Proof-of-liquidity score: token1-denominated value gain, discounted by a
/// smooth-max of the per-token inventory loss ratios.
///
/// Positive gains are multiplied by `exp(-10·inv_loss)`; negative gains are
/// divided by it, so losing inventory while losing value hurts twice.
pub fn score_pol(inputs: &ScoreInputs) -> PolScore {
    let initial_value =
        inputs.initial_amount0 as f64 * inputs.initial_price + inputs.initial_amount1 as f64;
    let fees_in_token1 = inputs.fees_accrued.0 * inputs.final_price + inputs.fees_accrued.1;
    let final_value = inputs.final_amount0 as f64 * inputs.final_price
        + inputs.final_amount1 as f64
        + fees_in_token1;
    let value_gain = final_value - initial_value;

    let loss0 = loss_ratio(inputs.initial_amount0, inputs.final_amount0);
    let loss1 = loss_ratio(inputs.initial_amount1, inputs.final_amount1);
    let inv_loss = smooth_max(loss0, loss1);
    let penalty = (-LOSS_PENALTY * inv_loss).exp();

    let score = if value_gain >= 0.0 {
        value_gain * penalty
    } else {
        value_gain / penalty
    };

    PolScore {
        score,
        value_gain,
        inv_loss,
        penalty,
    }
}

fn loss_ratio(initial: u128, fin: u128) -> f64 {
    if initial == 0 || fin >= initial {
        return 0.0;
    }
    (initial - fin) as f64 / initial as f64
}

/// `(1/k)·ln(e^{k·a} + e^{k·b}) − ln2/k`: a differentiable max that is
/// exactly zero when both inputs are zero.
fn smooth_max(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    let sum = (SMOOTH_K * (a - m)).exp() + (SMOOTH_K * (b - m)).exp();
    m + (sum.ln() - 2.0f64.ln()) / SMOOTH_K
}

/// Sort scored miners best-first: score descending, then lower inventory
/// loss, then miner id.
pub fn rank_scored(entries: &mut [(MinerId, PolScore)]) {
    entries.sort_by(|(id_a, a), (id_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.inv_loss
                    .partial_cmp(&b.inv_loss)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| id_a.cmp(id_b))
    });
}
