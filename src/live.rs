//! Live camera session.
//!
//! At most one capture loop runs per `LiveSession`. `start` acquires the camera and
//! spawns the worker; a start while running attaches to the existing loop. Stream
//! consumers subscribe to the session's `LiveFeed` instead of driving capture, so every
//! subscriber sees the same frames. `stop` joins the worker, which releases the camera
//! and closes the feed before `stop` returns.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::analysis::CrowdCountThresholds;
use crate::annotate::FrameAnnotator;
use crate::config::CrowdwatchConfig;
use crate::detect::{BackendRegistry, DetectionAdapter, ObjectClass};
use crate::frame::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::ingest::{CameraConfig, CameraSource, FrameSource};
use crate::sink::{FeedSubscriber, LiveFeed};
use crate::status::{StatusBoard, StatusSnapshot};
use crate::PipelineError;

const LIVE_JOB_ID: &str = "live";

#[derive(Clone, Debug)]
pub struct LiveSettings {
    pub camera: CameraConfig,
    pub confidence: f32,
    pub thresholds: CrowdCountThresholds,
    pub inference_width: u32,
    pub inference_height: u32,
    pub jpeg_quality: u8,
}

impl LiveSettings {
    pub fn from_config(cfg: &CrowdwatchConfig) -> Self {
        Self {
            camera: CameraConfig {
                device: cfg.live.camera.clone(),
                fps: cfg.live.fps,
                width: cfg.live.width,
                height: cfg.live.height,
            },
            confidence: cfg.live.confidence,
            thresholds: CrowdCountThresholds::from(&cfg.live),
            inference_width: cfg.analysis.inference_width,
            inference_height: cfg.analysis.inference_height,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

struct Running {
    stop: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

struct LiveState {
    running: Option<Running>,
    board: Arc<StatusBoard>,
    feed: Arc<LiveFeed>,
}

pub struct LiveSession {
    settings: LiveSettings,
    registry: BackendRegistry,
    annotator: Arc<FrameAnnotator>,
    state: Mutex<LiveState>,
}

impl LiveSession {
    pub fn new(settings: LiveSettings, registry: BackendRegistry, annotator: Arc<FrameAnnotator>) -> Self {
        let feed = Arc::new(LiveFeed::new());
        feed.close();
        Self {
            settings,
            registry,
            annotator,
            state: Mutex::new(LiveState {
                running: None,
                board: Arc::new(StatusBoard::new(LIVE_JOB_ID)),
                feed,
            }),
        }
    }

    /// Start capture, or attach to the loop that is already running.
    ///
    /// Fails with `PipelineError::ResourceBusy` if the camera is held elsewhere.
    pub fn start(&self) -> Result<StartOutcome> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("live session lock poisoned"))?;
        if let Some(running) = state.running.take() {
            if !running.worker.is_finished() {
                state.running = Some(running);
                return Ok(StartOutcome::AlreadyRunning);
            }
            if running.worker.join().is_err() {
                log::error!("LiveSession: previous worker panicked");
            }
        }

        let camera = CameraSource::acquire(self.settings.camera.clone())?;
        let backend = self
            .registry
            .build_default()
            .map_err(|e| PipelineError::Detection(format!("{e:#}")))?;
        let adapter = DetectionAdapter::new(
            backend,
            self.settings.inference_width,
            self.settings.inference_height,
        );

        let board = Arc::new(StatusBoard::new(LIVE_JOB_ID));
        board.begin(None);
        let feed = Arc::new(LiveFeed::new());
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let capture = CaptureLoop {
                camera,
                adapter,
                annotator: Arc::clone(&self.annotator),
                settings: self.settings.clone(),
                board: Arc::clone(&board),
                feed: Arc::clone(&feed),
                stop: Arc::clone(&stop),
            };
            thread::Builder::new()
                .name("live-capture".to_string())
                .spawn(move || capture.run())
                .context("spawn live capture worker")?
        };

        log::info!("LiveSession: started on {}", self.settings.camera.device);
        state.running = Some(Running { stop, worker });
        state.board = board;
        state.feed = feed;
        Ok(StartOutcome::Started)
    }

    /// Stop capture. Returns after the worker has exited and the camera is released.
    ///
    /// The session lock is released before joining, so status and subscribe calls
    /// stay responsive while a blocked camera read drains.
    pub fn stop(&self) -> Result<StopOutcome> {
        let (running, board, feed) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow!("live session lock poisoned"))?;
            let Some(running) = state.running.take() else {
                return Ok(StopOutcome::NotRunning);
            };
            (running, Arc::clone(&state.board), Arc::clone(&state.feed))
        };
        running.stop.store(true, Ordering::SeqCst);
        feed.close();
        if running.worker.join().is_err() {
            log::error!("LiveSession: worker panicked");
            board.fail(&anyhow!("live capture worker panicked"));
        }
        log::info!("LiveSession: stopped");
        Ok(StopOutcome::Stopped)
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.running.as_ref().is_some_and(|r| !r.worker.is_finished()))
            .unwrap_or(false)
    }

    pub fn status(&self) -> Result<Arc<StatusSnapshot>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("live session lock poisoned"))?;
        Ok(state.board.snapshot())
    }

    /// Subscribe to the current feed. The subscription ends when the session stops.
    pub fn subscribe(&self) -> Result<FeedSubscriber> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("live session lock poisoned"))?;
        Ok(state.feed.subscribe())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("LiveSession: stop on drop failed: {:#}", err);
        }
    }
}

struct CaptureLoop {
    camera: CameraSource,
    adapter: DetectionAdapter,
    annotator: Arc<FrameAnnotator>,
    settings: LiveSettings,
    board: Arc<StatusBoard>,
    feed: Arc<LiveFeed>,
    stop: Arc<AtomicBool>,
}

impl CaptureLoop {
    fn run(mut self) {
        let mut frames = 0u64;
        let outcome = loop {
            if self.stop.load(Ordering::SeqCst) {
                break Ok(());
            }
            match self.camera.next_frame() {
                Ok(Some(frame)) => {
                    frames += 1;
                    if let Err(err) = self.process(&frame, frames) {
                        break Err(err);
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err.context("camera read failed")),
            }
        };

        let device = self.camera.describe();
        drop(self.camera);
        self.feed.close();
        match outcome {
            Ok(()) => {
                self.board.finish(frames);
            }
            Err(err) => {
                log::error!("LiveSession: {} ended: {:#}", device, err);
                self.board.fail(&err);
            }
        }
    }

    fn process(&mut self, frame: &crate::frame::Frame, frames: u64) -> Result<()> {
        let detections = self
            .adapter
            .detect(frame, ObjectClass::Person, self.settings.confidence)?;
        let risk = self.settings.thresholds.assess_by_count(detections.count());
        let annotated = self.annotator.annotate(
            frame.image(),
            &detections.rescaled(frame.width(), frame.height()),
            &risk,
        );
        let jpeg = encode_jpeg(&annotated, self.settings.jpeg_quality)?;
        // Status first, so a subscriber holding a frame never reads older status.
        self.board.publish(&risk, 0, frames, frames);
        if self.feed.publish(jpeg).is_err() {
            log::debug!("LiveSession: feed closed, dropping frame {}", frames);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::JobStatus;

    fn session(device: &str, people: usize) -> Result<LiveSession> {
        let mut cfg = CrowdwatchConfig::default();
        cfg.live.camera = format!("stub://{device}");
        cfg.live.fps = 50;
        cfg.live.width = 64;
        cfg.live.height = 48;
        cfg.analysis.inference_width = 32;
        cfg.analysis.inference_height = 24;
        cfg.detector.stub_people = people;
        let registry = BackendRegistry::from_config(&cfg.detector)?;
        Ok(LiveSession::new(
            LiveSettings::from_config(&cfg),
            registry,
            Arc::new(FrameAnnotator::new()),
        ))
    }

    #[test]
    fn start_is_idempotent_and_stop_releases() -> Result<()> {
        let live = session("live-unit-a", 0)?;
        assert_eq!(live.stop()?, StopOutcome::NotRunning);
        assert_eq!(live.start()?, StartOutcome::Started);
        assert_eq!(live.start()?, StartOutcome::AlreadyRunning);
        assert!(live.is_running());

        assert_eq!(live.stop()?, StopOutcome::Stopped);
        assert!(!live.is_running());
        assert!(!crate::ingest::DeviceLease::is_held("stub://live-unit-a"));
        assert_eq!(live.stop()?, StopOutcome::NotRunning);
        Ok(())
    }

    #[test]
    fn status_tracks_people_count() -> Result<()> {
        let live = session("live-unit-b", 12)?;
        live.start()?;
        let mut sub = live.subscribe()?;
        let event = sub.next_frame(std::time::Duration::from_secs(5))?;
        assert!(matches!(event, crate::sink::FeedEvent::Frame(_)));

        let snap = live.status()?;
        assert_eq!(snap.status, JobStatus::Processing);
        live.stop()?;
        let snap = live.status()?;
        assert_eq!(snap.people_count, 12);
        assert_eq!(snap.risk_level, crate::RiskLevel::Medium);
        assert_eq!(snap.motion_status, crate::MotionStatus::Active);
        assert_eq!(snap.status, JobStatus::Done);
        Ok(())
    }
}
