//! Camera frame source.
//!
//! A camera is an exclusively owned device. `CameraSource::acquire` takes a process-wide
//! `DeviceLease` on the device name before opening it; a second acquire of the same
//! device fails with `PipelineError::ResourceBusy` until the first source is dropped.
//!
//! `stub://` devices synthesize a drifting pattern paced at the configured fps.
//! Real devices use V4L2 (feature: ingest-v4l2).

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use super::synthetic::{SyntheticMotion, SyntheticSource, SyntheticSpec};
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Capture;
use super::FrameSource;
use crate::frame::Frame;
use crate::PipelineError;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://<name>`.
    pub device: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera0".to_string(),
            fps: 10,
            width: 640,
            height: 480,
        }
    }
}

fn held_devices() -> &'static Mutex<HashSet<String>> {
    static HELD: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive claim on a camera device. Released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    device: String,
}

impl DeviceLease {
    pub fn acquire(device: &str) -> Result<Self> {
        let mut held = held_devices()
            .lock()
            .map_err(|_| anyhow!("device lease registry lock poisoned"))?;
        if !held.insert(device.to_string()) {
            return Err(
                PipelineError::ResourceBusy(format!("camera {device} is already in use")).into(),
            );
        }
        Ok(Self {
            device: device.to_string(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_held(device: &str) -> bool {
        held_devices()
            .lock()
            .map(|held| held.contains(device))
            .unwrap_or(false)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Ok(mut held) = held_devices().lock() {
            held.remove(&self.device);
        }
    }
}

/// Camera frame source. The device is closed before the lease is released.
pub struct CameraSource {
    backend: CameraBackend,
    lease: DeviceLease,
    config: CameraConfig,
    last_frame_at: Option<Instant>,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Capture),
}

impl CameraSource {
    pub fn acquire(config: CameraConfig) -> Result<Self> {
        let lease = DeviceLease::acquire(&config.device)?;
        let backend = if config.device.starts_with("stub://") {
            let name = config.device.trim_start_matches("stub://");
            let spec = SyntheticSpec {
                name: name.to_string(),
                frames: None,
                width: config.width,
                height: config.height,
                motion: SyntheticMotion::Drift,
                fps: f64::from(config.fps.max(1)),
            };
            log::info!("CameraSource: acquired {} (synthetic)", config.device);
            CameraBackend::Synthetic(SyntheticSource::new(spec))
        } else {
            open_device(&config)?
        };
        Ok(Self {
            backend,
            lease,
            config,
            last_frame_at: None,
        })
    }

    pub fn device(&self) -> &str {
        self.lease.device()
    }
}

/// Synthetic cameras would otherwise spin; hold them to the configured rate.
fn pace(fps: u32, last_frame_at: &mut Option<Instant>) {
    if fps == 0 {
        return;
    }
    let interval = Duration::from_millis(1000 / u64::from(fps));
    if let Some(last) = *last_frame_at {
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
    *last_frame_at = Some(Instant::now());
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(config: &CameraConfig) -> Result<CameraBackend> {
    let capture = V4l2Capture::open(config).map_err(|e| PipelineError::Input(format!("{e:#}")))?;
    Ok(CameraBackend::Device(capture))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(config: &CameraConfig) -> Result<CameraBackend> {
    Err(PipelineError::Input(format!(
        "camera {} requires the ingest-v4l2 feature",
        config.device
    ))
    .into())
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => {
                pace(self.config.fps, &mut self.last_frame_at);
                Ok(source.next_frame())
            }
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(capture) => capture.next_frame().map(Some),
        }
    }

    fn total_frames(&self) -> Option<u64> {
        None
    }

    fn fps(&self) -> f64 {
        f64::from(self.config.fps.max(1))
    }

    fn describe(&self) -> String {
        self.config.device.clone()
    }
}
