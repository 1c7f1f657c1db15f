//! Per-frame analysis: sampling cadence, motion, and risk.

pub mod motion;
pub mod risk;
pub mod sampler;

pub use motion::{measure, FlowSettings, MotionAnalyzer, MotionMetrics};
pub use risk::{CrowdCountThresholds, PrimaryCause, RiskAssessment, RiskScorer, RiskWeights};
pub use sampler::{FrameSampler, SampleDecision};
