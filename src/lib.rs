//! Crowdwatch
//!
//! This crate implements a per-frame crowd analysis pipeline for recorded clips and
//! live cameras.
//!
//! # Architecture
//!
//! Every sampled frame flows through the same sequence:
//!
//! 1. **Sample**: the frame sampler drops frames according to the skip cadence.
//! 2. **Detect**: the detection adapter resizes to the inference resolution and asks a
//!    detector backend for person boxes.
//! 3. **Measure**: the motion analyzer runs dense optical flow against the previous
//!    sampled frame.
//! 4. **Score**: the risk scorer turns count, speed and coverage into a risk level,
//!    numeric score and primary cause, carrying its persistence memory across samples.
//! 5. **Annotate**: boxes and a HUD band are drawn on the display-resolution frame.
//! 6. **Publish**: the annotated frame goes to a sink and a complete status snapshot is
//!    swapped into the job's status board.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic clips, MJPEG files, FFmpeg, cameras)
//! - `detect`: detector backends, registry, and the detection adapter
//! - `analysis`: sampler, motion analyzer, risk scorer
//! - `annotate`: HUD and box rendering
//! - `sink`: annotated output (video files, live MJPEG feed)
//! - `status`: immutable snapshots and the single-writer status board
//! - `pipeline` / `jobs` / `live`: batch driver, job manager, live session
//! - `api`: HTTP polling and streaming surface

use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod jobs;
pub mod live;
pub mod pipeline;
pub mod sink;
pub mod status;
pub mod ui;

pub use analysis::{
    FlowSettings, FrameSampler, MotionAnalyzer, MotionMetrics, PrimaryCause, RiskAssessment,
    RiskScorer, RiskWeights, SampleDecision,
};
pub use annotate::FrameAnnotator;
pub use config::CrowdwatchConfig;
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionAdapter, DetectionResult, DetectorBackend,
    ObjectClass, StubBackend,
};
pub use frame::Frame;
pub use ingest::{CameraConfig, CameraSource, FileSource, FrameSource};
pub use jobs::{JobManager, JobTicket};
pub use live::{LiveSession, LiveSettings, StartOutcome, StopOutcome};
pub use pipeline::{PipelineDriver, PipelineSettings};
pub use sink::{FrameSink, LiveFeed, MjpegFileSink, OutputContainer};
pub use status::{ErrorDetail, JobStatus, StatusBoard, StatusSnapshot};

// -------------------- Risk Vocabulary --------------------

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

/// Activity axis published beside the risk level.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MotionStatus {
    Active,
    #[default]
    Idle,
}

impl MotionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MotionStatus::Active => "ACTIVE",
            MotionStatus::Idle => "IDLE",
        }
    }
}

/// Coarse band of the numeric risk score, used to recolor the HUD.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    #[default]
    Neutral,
    Caution,
    Critical,
}

impl ScoreBand {
    /// `[0,30]` neutral, `(30,70]` caution, `(70,100]` critical.
    pub fn from_score(score: f32) -> Self {
        if score <= 30.0 {
            ScoreBand::Neutral
        } else if score <= 70.0 {
            ScoreBand::Caution
        } else {
            ScoreBand::Critical
        }
    }
}

// -------------------- Failure Taxonomy --------------------

/// Failure classes surfaced through job and live status.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Unreadable or corrupt source, unsupported format.
    #[error("input error: {0}")]
    Input(String),
    /// Model or runtime failure while running the detector.
    #[error("detection failure: {0}")]
    Detection(String),
    /// Annotated output could not be written.
    #[error("output error: {0}")]
    Output(String),
    /// Exclusive resource (camera) already held.
    #[error("resource busy: {0}")]
    ResourceBusy(String),
    #[error("job '{0}' is already processing")]
    DuplicateJob(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::Input,
            PipelineError::Detection(_) => ErrorKind::Detection,
            PipelineError::Output(_) => ErrorKind::Output,
            PipelineError::ResourceBusy(_) => ErrorKind::ResourceBusy,
            PipelineError::DuplicateJob(_) => ErrorKind::DuplicateJob,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Detection,
    Output,
    ResourceBusy,
    DuplicateJob,
    Internal,
}

/// Classify an error by the first `PipelineError` in its context chain.
pub fn classify_error(err: &anyhow::Error) -> ErrorKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::kind)
        .unwrap_or(ErrorKind::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn score_band_edges() {
        assert_eq!(ScoreBand::from_score(0.0), ScoreBand::Neutral);
        assert_eq!(ScoreBand::from_score(30.0), ScoreBand::Neutral);
        assert_eq!(ScoreBand::from_score(31.0), ScoreBand::Caution);
        assert_eq!(ScoreBand::from_score(70.0), ScoreBand::Caution);
        assert_eq!(ScoreBand::from_score(71.0), ScoreBand::Critical);
        assert_eq!(ScoreBand::from_score(100.0), ScoreBand::Critical);
    }

    #[test]
    fn classify_error_walks_context_chain() {
        let err: anyhow::Error = Err::<(), _>(PipelineError::Detection("boom".into()))
            .context("frame 12")
            .unwrap_err();
        assert_eq!(classify_error(&err), ErrorKind::Detection);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(classify_error(&plain), ErrorKind::Internal);
    }

    #[test]
    fn risk_vocabulary_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"HIGH\"");
        assert_eq!(
            serde_json::to_string(&MotionStatus::Active).unwrap(),
            "\"ACTIVE\""
        );
        assert_eq!(
            serde_json::to_string(&ScoreBand::Caution).unwrap(),
            "\"caution\""
        );
    }
}
