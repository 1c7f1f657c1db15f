//! Risk scoring.
//!
//! Level rules, checked in order:
//! - `speed > 5.0` is HIGH and adds 1 to persistence
//! - otherwise `coverage > 10.0` is MEDIUM and decays persistence by 0.3, floored at 0
//! - otherwise LOW, persistence unchanged
//!
//! `score = clamp(w_speed*speed + w_coverage*coverage + w_persistence*persistence, 0, 100)`
//! with default weights 8 / 2 / 3. The primary cause rules run in a fixed order and the
//! last match wins.

use serde::Serialize;

use super::motion::MotionMetrics;
use crate::config::{LiveConfig, RiskSettings};
use crate::{MotionStatus, RiskLevel, ScoreBand};

const HIGH_SPEED: f32 = 5.0;
const MEDIUM_COVERAGE: f32 = 10.0;
const PERSISTENCE_STEP: f32 = 1.0;
const PERSISTENCE_DECAY: f32 = 0.3;
const ACTIVE_SPEED: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskWeights {
    pub speed: f32,
    pub coverage: f32,
    pub persistence: f32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            speed: 8.0,
            coverage: 2.0,
            persistence: 3.0,
        }
    }
}

impl From<&RiskSettings> for RiskWeights {
    fn from(settings: &RiskSettings) -> Self {
        Self {
            speed: settings.speed_weight,
            coverage: settings.coverage_weight,
            persistence: settings.persistence_weight,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PrimaryCause {
    #[serde(rename = "density change")]
    DensityChange,
    #[serde(rename = "motion speed accelerated")]
    MotionSpeedAccelerated,
    #[serde(rename = "persistence")]
    Persistence,
}

impl PrimaryCause {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimaryCause::DensityChange => "density change",
            PrimaryCause::MotionSpeedAccelerated => "motion speed accelerated",
            PrimaryCause::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for PrimaryCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the HUD and the status snapshot need for one sampled frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: f32,
    pub band: ScoreBand,
    pub persistence: f32,
    pub primary_cause: Option<PrimaryCause>,
    pub motion_status: MotionStatus,
    pub people_count: usize,
    /// `None` when no motion was measured (first sample, live frames).
    pub motion: Option<MotionMetrics>,
}

pub fn classify_level(speed: f32, coverage: f32) -> RiskLevel {
    if speed > HIGH_SPEED {
        RiskLevel::High
    } else if coverage > MEDIUM_COVERAGE {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn primary_cause(speed: f32, coverage: f32, persistence: f32) -> Option<PrimaryCause> {
    let mut cause = None;
    if coverage >= 20.0 {
        cause = Some(PrimaryCause::DensityChange);
    }
    if speed > 8.0 && coverage < 15.0 {
        cause = Some(PrimaryCause::MotionSpeedAccelerated);
    }
    if persistence > 10.0 {
        cause = Some(PrimaryCause::Persistence);
    }
    cause
}

pub fn motion_status(speed: f32) -> MotionStatus {
    if speed > ACTIVE_SPEED {
        MotionStatus::Active
    } else {
        MotionStatus::Idle
    }
}

pub fn risk_score(weights: &RiskWeights, speed: f32, coverage: f32, persistence: f32) -> f32 {
    let raw = weights.speed * speed + weights.coverage * coverage + weights.persistence * persistence;
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 100.0)
}

/// Per-job scorer. Owns the persistence memory for one job.
#[derive(Clone, Debug)]
pub struct RiskScorer {
    weights: RiskWeights,
    persistence: f32,
}

impl RiskScorer {
    pub fn new(weights: RiskWeights) -> Self {
        Self {
            weights,
            persistence: 0.0,
        }
    }

    pub fn persistence(&self) -> f32 {
        self.persistence
    }

    /// Score one sample with motion, updating persistence.
    pub fn evaluate(&mut self, people_count: usize, speed: f32, coverage: f32) -> RiskAssessment {
        let level = classify_level(speed, coverage);
        match level {
            RiskLevel::High => self.persistence += PERSISTENCE_STEP,
            RiskLevel::Medium => {
                self.persistence = (self.persistence - PERSISTENCE_DECAY).max(0.0);
            }
            RiskLevel::Low => {}
        }
        let score = risk_score(&self.weights, speed, coverage, self.persistence);
        RiskAssessment {
            level,
            score,
            band: ScoreBand::from_score(score),
            persistence: self.persistence,
            primary_cause: primary_cause(speed, coverage, self.persistence),
            motion_status: motion_status(speed),
            people_count,
            motion: Some(MotionMetrics { speed, coverage }),
        }
    }

    /// Assessment for a sample without motion metrics. Persistence is not touched.
    pub fn baseline(&self, people_count: usize) -> RiskAssessment {
        let score = risk_score(&self.weights, 0.0, 0.0, self.persistence);
        RiskAssessment {
            level: RiskLevel::Low,
            score,
            band: ScoreBand::from_score(score),
            persistence: self.persistence,
            primary_cause: primary_cause(0.0, 0.0, self.persistence),
            motion_status: MotionStatus::Idle,
            people_count,
            motion: None,
        }
    }

    pub fn assess(&mut self, people_count: usize, motion: Option<MotionMetrics>) -> RiskAssessment {
        match motion {
            Some(m) => self.evaluate(people_count, m.speed, m.coverage),
            None => self.baseline(people_count),
        }
    }
}

/// Count-based classification used by the live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrowdCountThresholds {
    pub medium_at: usize,
    pub high_at: usize,
}

impl Default for CrowdCountThresholds {
    fn default() -> Self {
        Self {
            medium_at: 10,
            high_at: 15,
        }
    }
}

impl From<&LiveConfig> for CrowdCountThresholds {
    fn from(live: &LiveConfig) -> Self {
        Self {
            medium_at: live.medium_at,
            high_at: live.high_at,
        }
    }
}

impl CrowdCountThresholds {
    pub fn assess_by_count(&self, people_count: usize) -> RiskAssessment {
        let level = if people_count < self.medium_at {
            RiskLevel::Low
        } else if people_count < self.high_at {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        };
        let score = if self.high_at == 0 {
            if people_count > 0 {
                100.0
            } else {
                0.0
            }
        } else {
            (people_count as f32 / self.high_at as f32 * 100.0).min(100.0)
        };
        RiskAssessment {
            level,
            score,
            band: ScoreBand::from_score(score),
            persistence: 0.0,
            primary_cause: None,
            motion_status: if people_count > 0 {
                MotionStatus::Active
            } else {
                MotionStatus::Idle
            },
            people_count,
            motion: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_depends_on_speed_then_coverage() {
        assert_eq!(classify_level(6.0, 0.0), RiskLevel::High);
        assert_eq!(classify_level(0.0, 15.0), RiskLevel::Medium);
        assert_eq!(classify_level(0.0, 0.0), RiskLevel::Low);
        assert_eq!(classify_level(5.0, 10.0), RiskLevel::Low);
        assert_eq!(classify_level(6.0, 50.0), RiskLevel::High);
    }

    #[test]
    fn density_cause_is_not_overwritten_by_non_matching_rules() {
        assert_eq!(primary_cause(9.0, 25.0, 0.0), Some(PrimaryCause::DensityChange));
        assert_eq!(
            primary_cause(9.0, 5.0, 0.0),
            Some(PrimaryCause::MotionSpeedAccelerated)
        );
        assert_eq!(primary_cause(9.0, 25.0, 11.0), Some(PrimaryCause::Persistence));
        assert_eq!(primary_cause(1.0, 1.0, 0.0), None);
    }

    #[test]
    fn persistence_accumulates_and_decays_to_floor() {
        let mut scorer = RiskScorer::new(RiskWeights::default());
        scorer.evaluate(0, 6.0, 0.0);
        scorer.evaluate(0, 6.0, 0.0);
        assert_eq!(scorer.persistence(), 2.0);

        for _ in 0..10 {
            scorer.evaluate(0, 0.0, 15.0);
        }
        assert_eq!(scorer.persistence(), 0.0);

        scorer.evaluate(0, 0.0, 0.0);
        assert_eq!(scorer.persistence(), 0.0);
    }

    #[test]
    fn score_is_weighted_and_clamped() {
        let weights = RiskWeights::default();
        assert_eq!(risk_score(&weights, 1.0, 5.0, 2.0), 24.0);
        assert_eq!(risk_score(&weights, 50.0, 100.0, 30.0), 100.0);
        assert_eq!(risk_score(&weights, 0.0, 0.0, 0.0), 0.0);

        let mut scorer = RiskScorer::new(weights);
        let assessment = scorer.evaluate(4, 6.0, 0.0);
        assert_eq!(assessment.persistence, 1.0);
        assert_eq!(assessment.score, 51.0);
        assert_eq!(assessment.band, ScoreBand::Caution);
        assert_eq!(assessment.motion_status, MotionStatus::Active);
        assert_eq!(assessment.people_count, 4);
    }

    #[test]
    fn cause_uses_updated_persistence() {
        let mut scorer = RiskScorer::new(RiskWeights::default());
        for _ in 0..10 {
            scorer.evaluate(0, 6.0, 0.0);
        }
        let eleventh = scorer.evaluate(0, 6.0, 0.0);
        assert_eq!(eleventh.persistence, 11.0);
        assert_eq!(eleventh.primary_cause, Some(PrimaryCause::Persistence));
    }

    #[test]
    fn baseline_is_low_without_motion() {
        let scorer = RiskScorer::new(RiskWeights::default());
        let assessment = scorer.baseline(3);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.motion, None);
        assert_eq!(assessment.motion_status, MotionStatus::Idle);
    }

    #[test]
    fn count_thresholds_classify_live_frames() {
        let thresholds = CrowdCountThresholds::default();
        assert_eq!(thresholds.assess_by_count(0).level, RiskLevel::Low);
        assert_eq!(thresholds.assess_by_count(0).motion_status, MotionStatus::Idle);
        assert_eq!(thresholds.assess_by_count(9).level, RiskLevel::Low);
        assert_eq!(thresholds.assess_by_count(10).level, RiskLevel::Medium);
        assert_eq!(thresholds.assess_by_count(15).level, RiskLevel::High);
        assert_eq!(thresholds.assess_by_count(30).score, 100.0);
        assert_eq!(thresholds.assess_by_count(3).score, 20.0);
        assert_eq!(
            thresholds.assess_by_count(3).motion_status,
            MotionStatus::Active
        );
    }

    #[test]
    fn cause_serializes_as_text() {
        assert_eq!(
            serde_json::to_string(&PrimaryCause::DensityChange).unwrap(),
            "\"density change\""
        );
    }
}
