pub mod constraints;
pub mod ema;
pub mod pol;

pub use constraints::validate_positions;
pub use ema::{combined_score, ema_update, ViolationPolicy, EVAL_ALPHA, LIVE_ALPHA};
pub use pol::{rank_scored, score_pol, PolScore, ScoreInputs};
