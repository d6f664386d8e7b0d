//! Detection layer: turns raw signals into baselines, statistically
//! significant behavior-change events, and per-claim risk scores.
//!
//! Everything here reads committed storage state only. Nothing in this
//! crate takes locks or performs side effects against the outside world;
//! detected events are handed to the engine crate, which owns execution.

pub mod baseline;
pub mod network;
pub mod score;
pub mod shift;
pub mod stats;

pub use baseline::{BaselineCalculator, BaselineConfig, BaselineRunSummary};
pub use network::{NetworkView, PayerNetworkStats};
pub use score::{ClaimDraft, CodingRules, RiskFactor, RiskScore, RiskScorer, ScorerWeights};
pub use shift::{DetectorConfig, ShiftDetector};
