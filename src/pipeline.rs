//! Batch pipeline driver.
//!
//! Pulls frames from a source in order and, for every sampled frame, runs
//! detect, measure motion, score risk, annotate, write, then publishes one complete
//! snapshot. Any error aborts the job: the partial output is closed as-is and the
//! board goes to `Error`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::analysis::{
    FlowSettings, FrameSampler, MotionAnalyzer, RiskScorer, RiskWeights, SampleDecision,
};
use crate::annotate::FrameAnnotator;
use crate::config::CrowdwatchConfig;
use crate::detect::{BackendRegistry, DetectionAdapter, ObjectClass};
use crate::frame::to_grayscale;
use crate::ingest::{FileSource, FrameSource};
use crate::sink::{FrameSink, OutputContainer};
use crate::status::{StatusBoard, StatusSnapshot};
use crate::PipelineError;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub frame_skip: u64,
    pub progress_every: u64,
    pub inference_width: u32,
    pub inference_height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub confidence: f32,
    pub passthrough_dropped: bool,
    pub flow: FlowSettings,
    pub weights: RiskWeights,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&CrowdwatchConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &CrowdwatchConfig) -> Self {
        Self {
            frame_skip: cfg.analysis.frame_skip,
            progress_every: cfg.analysis.progress_every,
            inference_width: cfg.analysis.inference_width,
            inference_height: cfg.analysis.inference_height,
            display_width: cfg.analysis.display_width,
            display_height: cfg.analysis.display_height,
            confidence: cfg.detector.confidence,
            passthrough_dropped: cfg.analysis.passthrough_dropped,
            flow: FlowSettings::from(&cfg.motion),
            weights: RiskWeights::from(&cfg.risk),
        }
    }

    /// Output frame rate: the sampled cadence unless dropped frames are written too.
    pub fn output_fps(&self, source_fps: f64) -> f64 {
        let fps = if self.passthrough_dropped {
            source_fps
        } else {
            source_fps / self.frame_skip.max(1) as f64
        };
        fps.max(1.0)
    }
}

pub struct PipelineDriver {
    settings: PipelineSettings,
    source: Box<dyn FrameSource>,
    adapter: DetectionAdapter,
    sink: Box<dyn FrameSink>,
    annotator: Arc<FrameAnnotator>,
    board: Arc<StatusBoard>,
    sampler: FrameSampler,
    motion: MotionAnalyzer,
    scorer: RiskScorer,
    frames_seen: u64,
    frames_sampled: u64,
}

impl PipelineDriver {
    pub fn new(
        settings: PipelineSettings,
        source: Box<dyn FrameSource>,
        adapter: DetectionAdapter,
        sink: Box<dyn FrameSink>,
        annotator: Arc<FrameAnnotator>,
        board: Arc<StatusBoard>,
    ) -> Result<Self> {
        let sampler = FrameSampler::new(
            settings.frame_skip,
            settings.progress_every,
            source.total_frames(),
        )?;
        Ok(Self {
            motion: MotionAnalyzer::new(settings.flow),
            scorer: RiskScorer::new(settings.weights),
            settings,
            source,
            adapter,
            sink,
            annotator,
            board,
            sampler,
            frames_seen: 0,
            frames_sampled: 0,
        })
    }

    /// Process one source frame. Returns `false` at end of stream.
    pub fn step(&mut self) -> Result<bool> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(false);
        };
        let index = self.frames_seen;
        self.frames_seen += 1;

        match self.sampler.observe(index) {
            SampleDecision::Sampled => self
                .process_sample(&frame)
                .with_context(|| format!("sampled frame {index}"))?,
            SampleDecision::Dropped => {
                if self.settings.passthrough_dropped {
                    let display = frame.resized(self.settings.display_width, self.settings.display_height);
                    self.sink
                        .write(&display)
                        .with_context(|| format!("passthrough frame {index}"))?;
                }
                if index % self.settings.progress_every == 0 {
                    self.board.progress(self.sampler.progress(), self.frames_seen);
                }
            }
        }
        Ok(true)
    }

    fn process_sample(&mut self, frame: &crate::frame::Frame) -> Result<()> {
        let s = &self.settings;
        let (width, height) = self.adapter.inference_size();
        let small = frame.resized(width, height);
        let detections =
            self.adapter
                .detect_inference(&small, frame.index(), ObjectClass::Person, s.confidence)?;
        let gray = to_grayscale(&small);
        let motion = self.motion.update(gray)?;
        let risk = self.scorer.assess(detections.count(), motion);

        let display = frame.resized(s.display_width, s.display_height);
        let annotated = self.annotator.annotate(
            &display,
            &detections.rescaled(s.display_width, s.display_height),
            &risk,
        );
        self.sink.write(&annotated)?;
        self.frames_sampled += 1;

        log::debug!(
            "frame {}: people={} level={} score={:.1} speed={:?} coverage={:?}",
            frame.index(),
            risk.people_count,
            risk.level.as_str(),
            risk.score,
            risk.motion.map(|m| m.speed),
            risk.motion.map(|m| m.coverage)
        );
        self.board.publish(
            &risk,
            self.sampler.progress(),
            self.frames_seen,
            self.frames_sampled,
        );
        Ok(())
    }

    /// Drive to end of stream and settle the board in `Done` or `Error`.
    pub fn run(mut self) -> Result<Arc<StatusSnapshot>> {
        let job_id = self.board.snapshot().job_id.clone();
        log::info!(
            "job {}: processing {} with {} backend (skip {})",
            job_id,
            self.source.describe(),
            self.adapter.backend_name(),
            self.settings.frame_skip
        );

        let outcome = self.drive();
        match outcome {
            Ok(()) => {
                self.sampler.finish();
                let snapshot = self.board.finish(self.frames_seen);
                log::info!(
                    "job {}: done ({} frames, {} sampled, peak {} people)",
                    job_id,
                    self.frames_seen,
                    self.frames_sampled,
                    snapshot.peak_people
                );
                Ok(snapshot)
            }
            Err(err) => {
                if let Err(close_err) = self.sink.close() {
                    log::warn!("job {}: closing partial output failed: {:#}", job_id, close_err);
                }
                self.board.fail(&err);
                log::error!("job {}: failed: {:#}", job_id, err);
                Err(err)
            }
        }
    }

    fn drive(&mut self) -> Result<()> {
        while self.step()? {}
        self.sink.close().context("finalize output")
    }
}

/// Run one batch job end to end: open the input, build a backend, create the output,
/// and drive the pipeline. Every failure is recorded on `board` before returning.
pub fn run_batch(
    input: &str,
    output_path: &Path,
    container: OutputContainer,
    settings: &PipelineSettings,
    registry: &BackendRegistry,
    annotator: Arc<FrameAnnotator>,
    board: Arc<StatusBoard>,
) -> Result<Arc<StatusSnapshot>> {
    let output_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    board.begin(output_name);

    match prepare(input, output_path, container, settings, registry, annotator, &board) {
        Ok(driver) => driver.run(),
        Err(err) => {
            board.fail(&err);
            log::error!("job {}: failed to start: {:#}", board.snapshot().job_id, err);
            Err(err)
        }
    }
}

fn prepare(
    input: &str,
    output_path: &Path,
    container: OutputContainer,
    settings: &PipelineSettings,
    registry: &BackendRegistry,
    annotator: Arc<FrameAnnotator>,
    board: &Arc<StatusBoard>,
) -> Result<PipelineDriver> {
    let source = FileSource::open(input)?;
    let backend = registry
        .build_default()
        .map_err(|e| PipelineError::Detection(format!("{e:#}")))?;
    let adapter = DetectionAdapter::new(backend, settings.inference_width, settings.inference_height);
    let sink = container.create_sink(output_path, settings.output_fps(source.fps()))?;
    PipelineDriver::new(
        settings.clone(),
        Box::new(source),
        adapter,
        sink,
        annotator,
        Arc::clone(board),
    )
}
