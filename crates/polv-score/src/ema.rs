use serde::{Deserialize, Serialize};

/// Smoothing factor for evaluation-round scores.
pub const EVAL_ALPHA: f64 = 0.1;
/// Smoothing factor for live-round scores.
pub const LIVE_ALPHA: f64 = 0.3;

const COMBINED_EVAL_WEIGHT: f64 = 0.6;
const COMBINED_LIVE_WEIGHT: f64 = 0.4;

/// How a constraint violation (score 0) feeds the reputation EMAs.
///
/// Refusals never update the EMA; the behavior for violations differs in
/// the wild, so it stays configurable. The default records the zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    #[default]
    UpdateEmaWithZero,
    SkipLikeRefusal,
}

/// One EMA step. The first observation seeds the average instead of
/// blending from zero.
pub fn ema_update(previous: Option<f64>, observation: f64, alpha: f64) -> f64 {
    match previous {
        None => observation,
        Some(prev) => (1.0 - alpha) * prev + alpha * observation,
    }
}

/// Combined ranking score; a missing component contributes zero.
pub fn combined_score(eval_ema: Option<f64>, live_ema: Option<f64>) -> f64 {
    COMBINED_EVAL_WEIGHT * eval_ema.unwrap_or(0.0) + COMBINED_LIVE_WEIGHT * live_ema.unwrap_or(0.0)
}
