use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8799";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_PROCESSED_DIR: &str = "static/processed";
const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "mjpeg", "mjpg"];
const DEFAULT_FRAME_SKIP: u64 = 5;
const DEFAULT_PROGRESS_EVERY: u64 = 10;
const DEFAULT_INFERENCE_SIZE: (u32, u32) = (640, 360);
const DEFAULT_DISPLAY_SIZE: (u32, u32) = (1280, 720);
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_CONFIDENCE: f32 = 0.30;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_NOISE_FLOOR: f32 = 1.0;
const DEFAULT_SMOOTHNESS: f32 = 10.0;
const DEFAULT_FLOW_ITERATIONS: u32 = 24;
const DEFAULT_SPEED_WEIGHT: f32 = 8.0;
const DEFAULT_COVERAGE_WEIGHT: f32 = 2.0;
const DEFAULT_PERSISTENCE_WEIGHT: f32 = 3.0;
const DEFAULT_CAMERA: &str = "stub://camera0";
const DEFAULT_LIVE_FPS: u32 = 10;
const DEFAULT_LIVE_SIZE: (u32, u32) = (640, 480);
const DEFAULT_LIVE_CONFIDENCE: f32 = 0.35;
const DEFAULT_LIVE_MEDIUM_AT: usize = 10;
const DEFAULT_LIVE_HIGH_AT: usize = 15;

#[derive(Debug, Deserialize, Default)]
struct CrowdwatchConfigFile {
    api: Option<ApiConfigFile>,
    storage: Option<StorageConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    detector: Option<DetectorConfigFile>,
    motion: Option<MotionConfigFile>,
    risk: Option<RiskConfigFile>,
    live: Option<LiveConfigFile>,
    hud: Option<HudConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_dir: Option<PathBuf>,
    processed_dir: Option<PathBuf>,
    allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    frame_skip: Option<u64>,
    progress_every: Option<u64>,
    inference_width: Option<u32>,
    inference_height: Option<u32>,
    display_width: Option<u32>,
    display_height: Option<u32>,
    passthrough_dropped: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    model_input: Option<u32>,
    iou_threshold: Option<f32>,
    stub_people: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    noise_floor: Option<f32>,
    smoothness: Option<f32>,
    iterations: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RiskConfigFile {
    speed_weight: Option<f32>,
    coverage_weight: Option<f32>,
    persistence_weight: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    camera: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    confidence: Option<f32>,
    medium_at: Option<usize>,
    high_at: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct HudConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CrowdwatchConfig {
    pub api_addr: String,
    pub max_upload_bytes: u64,
    pub storage: StorageSettings,
    pub analysis: AnalysisSettings,
    pub detector: DetectorSettings,
    pub motion: MotionSettings,
    pub risk: RiskSettings,
    pub live: LiveConfig,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub frame_skip: u64,
    pub progress_every: u64,
    pub inference_width: u32,
    pub inference_height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub passthrough_dropped: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub confidence: f32,
    pub model_input: u32,
    pub iou_threshold: f32,
    pub stub_people: usize,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub noise_floor: f32,
    pub smoothness: f32,
    pub iterations: u32,
}

#[derive(Debug, Clone)]
pub struct RiskSettings {
    pub speed_weight: f32,
    pub coverage_weight: f32,
    pub persistence_weight: f32,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub camera: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub medium_at: usize,
    pub high_at: usize,
}

impl Default for CrowdwatchConfig {
    fn default() -> Self {
        Self::from_file(CrowdwatchConfigFile::default())
    }
}

impl CrowdwatchConfig {
    /// Defaults, then the file named by `CROWDWATCH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CROWDWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CrowdwatchConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let analysis = file.analysis.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let risk = file.risk.unwrap_or_default();
        let live = file.live.unwrap_or_default();

        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            storage: StorageSettings {
                upload_dir: storage
                    .upload_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
                processed_dir: storage
                    .processed_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PROCESSED_DIR)),
                allowed_extensions: storage.allowed_extensions.unwrap_or_else(|| {
                    DEFAULT_ALLOWED_EXTENSIONS
                        .iter()
                        .map(|ext| ext.to_string())
                        .collect()
                }),
            },
            analysis: AnalysisSettings {
                frame_skip: analysis.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
                progress_every: analysis.progress_every.unwrap_or(DEFAULT_PROGRESS_EVERY),
                inference_width: analysis
                    .inference_width
                    .unwrap_or(DEFAULT_INFERENCE_SIZE.0),
                inference_height: analysis
                    .inference_height
                    .unwrap_or(DEFAULT_INFERENCE_SIZE.1),
                display_width: analysis.display_width.unwrap_or(DEFAULT_DISPLAY_SIZE.0),
                display_height: analysis.display_height.unwrap_or(DEFAULT_DISPLAY_SIZE.1),
                passthrough_dropped: analysis.passthrough_dropped.unwrap_or(false),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
                model_path: detector.model_path,
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                model_input: detector.model_input.unwrap_or(DEFAULT_MODEL_INPUT),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                stub_people: detector.stub_people.unwrap_or(0),
            },
            motion: MotionSettings {
                noise_floor: motion.noise_floor.unwrap_or(DEFAULT_NOISE_FLOOR),
                smoothness: motion.smoothness.unwrap_or(DEFAULT_SMOOTHNESS),
                iterations: motion.iterations.unwrap_or(DEFAULT_FLOW_ITERATIONS),
            },
            risk: RiskSettings {
                speed_weight: risk.speed_weight.unwrap_or(DEFAULT_SPEED_WEIGHT),
                coverage_weight: risk.coverage_weight.unwrap_or(DEFAULT_COVERAGE_WEIGHT),
                persistence_weight: risk
                    .persistence_weight
                    .unwrap_or(DEFAULT_PERSISTENCE_WEIGHT),
            },
            live: LiveConfig {
                camera: live.camera.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                fps: live.fps.unwrap_or(DEFAULT_LIVE_FPS),
                width: live.width.unwrap_or(DEFAULT_LIVE_SIZE.0),
                height: live.height.unwrap_or(DEFAULT_LIVE_SIZE.1),
                confidence: live.confidence.unwrap_or(DEFAULT_LIVE_CONFIDENCE),
                medium_at: live.medium_at.unwrap_or(DEFAULT_LIVE_MEDIUM_AT),
                high_at: live.high_at.unwrap_or(DEFAULT_LIVE_HIGH_AT),
            },
            font_path: file.hud.and_then(|hud| hud.font_path),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_blank_env("CROWDWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(camera) = non_blank_env("CROWDWATCH_CAMERA") {
            self.live.camera = camera;
        }
        if let Some(backend) = non_blank_env("CROWDWATCH_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_blank_env("CROWDWATCH_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_blank_env("CROWDWATCH_FONT") {
            self.font_path = Some(PathBuf::from(path));
        }
        if let Some(skip) = non_blank_env("CROWDWATCH_FRAME_SKIP") {
            self.analysis.frame_skip = skip
                .parse()
                .map_err(|_| anyhow!("CROWDWATCH_FRAME_SKIP must be a positive integer"))?;
        }
        if let Some(confidence) = non_blank_env("CROWDWATCH_CONFIDENCE") {
            self.detector.confidence = confidence
                .parse()
                .map_err(|_| anyhow!("CROWDWATCH_CONFIDENCE must be a number in (0, 1]"))?;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.analysis.frame_skip == 0 {
            return Err(anyhow!("analysis.frame_skip must be >= 1"));
        }
        if self.analysis.progress_every == 0 {
            return Err(anyhow!("analysis.progress_every must be >= 1"));
        }
        let dims = [
            self.analysis.inference_width,
            self.analysis.inference_height,
            self.analysis.display_width,
            self.analysis.display_height,
            self.live.width,
            self.live.height,
            self.detector.model_input,
        ];
        if dims.contains(&0) {
            return Err(anyhow!("frame dimensions must be greater than zero"));
        }
        for (name, value) in [
            ("detector.confidence", self.detector.confidence),
            ("live.confidence", self.live.confidence),
            ("detector.iou_threshold", self.detector.iou_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{name} must be in (0, 1], got {value}"));
            }
        }
        if self.motion.noise_floor < 0.0 || self.motion.smoothness <= 0.0 {
            return Err(anyhow!(
                "motion.noise_floor must be >= 0 and motion.smoothness > 0"
            ));
        }
        if self.motion.iterations == 0 {
            return Err(anyhow!("motion.iterations must be >= 1"));
        }
        if self.risk.speed_weight < 0.0
            || self.risk.coverage_weight < 0.0
            || self.risk.persistence_weight < 0.0
        {
            return Err(anyhow!("risk weights must be non-negative"));
        }
        if self.live.high_at < self.live.medium_at {
            return Err(anyhow!("live.high_at must be >= live.medium_at"));
        }
        self.storage.allowed_extensions = self
            .storage
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.storage.allowed_extensions.is_empty() {
            return Err(anyhow!("storage.allowed_extensions must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CrowdwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
