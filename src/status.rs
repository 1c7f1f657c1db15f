//! Published job state.
//!
//! A `StatusBoard` has one writer (the job or live worker) and any number of readers.
//! Each update builds a complete `StatusSnapshot` and swaps it in under a write lock, so
//! a reader always gets a consistent snapshot of the last completed sampled frame.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

use crate::analysis::RiskAssessment;
use crate::{classify_error, ErrorKind, MotionStatus, RiskLevel, ScoreBand};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum JobStatus {
    #[default]
    Idle,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            kind: classify_error(err),
            message: format!("{err:#}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub people_count: usize,
    pub peak_people: usize,
    pub risk_level: RiskLevel,
    pub risk_score: f32,
    pub score_band: ScoreBand,
    pub persistence: f32,
    pub motion_speed: Option<f32>,
    pub motion_coverage: Option<f32>,
    pub motion_status: MotionStatus,
    pub primary_cause: Option<String>,
    pub frames_seen: u64,
    pub frames_sampled: u64,
    pub output: Option<String>,
    pub error: Option<ErrorDetail>,
}

impl StatusSnapshot {
    pub fn idle(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Idle,
            progress: 0,
            people_count: 0,
            peak_people: 0,
            risk_level: RiskLevel::Low,
            risk_score: 0.0,
            score_band: ScoreBand::Neutral,
            persistence: 0.0,
            motion_speed: None,
            motion_coverage: None,
            motion_status: MotionStatus::Idle,
            primary_cause: None,
            frames_seen: 0,
            frames_sampled: 0,
            output: None,
            error: None,
        }
    }
}

/// Single-writer, many-reader holder of the current snapshot.
pub struct StatusBoard {
    current: RwLock<Arc<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new(job_id: &str) -> Self {
        Self {
            current: RwLock::new(Arc::new(StatusSnapshot::idle(job_id))),
        }
    }

    /// Current snapshot. Never blocks on a torn write.
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        // Writers only ever assign a whole Arc, so a poisoned lock still holds a
        // complete snapshot.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Derive the next snapshot from the current one and swap it in.
    ///
    /// Status never regresses, progress never decreases, and a terminal snapshot is
    /// frozen. Returns the snapshot that is current after the call.
    pub fn update<F>(&self, f: F) -> Arc<StatusSnapshot>
    where
        F: FnOnce(&mut StatusSnapshot),
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let prev = Arc::clone(&guard);
        if prev.status.is_terminal() {
            return prev;
        }
        let mut next = (*prev).clone();
        f(&mut next);
        next.job_id = prev.job_id.clone();
        next.status = next.status.max(prev.status);
        next.progress = next.progress.max(prev.progress).min(100);
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        next
    }

    pub fn begin(&self, output: Option<String>) -> Arc<StatusSnapshot> {
        self.update(|s| {
            s.status = JobStatus::Processing;
            s.output = output;
        })
    }

    /// Publish the result of one completed sampled frame.
    pub fn publish(
        &self,
        risk: &RiskAssessment,
        progress: u8,
        frames_seen: u64,
        frames_sampled: u64,
    ) -> Arc<StatusSnapshot> {
        self.update(|s| {
            s.status = JobStatus::Processing;
            s.progress = progress.min(99);
            s.people_count = risk.people_count;
            s.peak_people = s.peak_people.max(risk.people_count);
            s.risk_level = risk.level;
            s.risk_score = risk.score;
            s.score_band = risk.band;
            s.persistence = risk.persistence;
            s.motion_speed = risk.motion.map(|m| m.speed);
            s.motion_coverage = risk.motion.map(|m| m.coverage);
            s.motion_status = risk.motion_status;
            s.primary_cause = risk.primary_cause.map(|c| c.to_string());
            s.frames_seen = frames_seen;
            s.frames_sampled = frames_sampled;
        })
    }

    /// Record progress without a new sample (dropped frames).
    pub fn progress(&self, progress: u8, frames_seen: u64) -> Arc<StatusSnapshot> {
        self.update(|s| {
            s.progress = progress.min(99);
            s.frames_seen = frames_seen;
        })
    }

    pub fn finish(&self, frames_seen: u64) -> Arc<StatusSnapshot> {
        self.update(|s| {
            s.status = JobStatus::Done;
            s.progress = 100;
            s.frames_seen = frames_seen;
        })
    }

    pub fn fail(&self, err: &anyhow::Error) -> Arc<StatusSnapshot> {
        let detail = ErrorDetail::from_error(err);
        self.update(|s| {
            s.status = JobStatus::Error;
            s.error = Some(detail);
        })
    }
}
