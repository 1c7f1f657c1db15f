//! Batch job management.
//!
//! Each submitted job gets its own status board and worker thread. Submission returns
//! immediately; the worker runs the pipeline to `Done` or `Error`. A panicking worker is
//! converted into `Error` so no job is left `Processing`.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::annotate::FrameAnnotator;
use crate::config::CrowdwatchConfig;
use crate::detect::BackendRegistry;
use crate::pipeline::{run_batch, PipelineSettings};
use crate::sink::{output_file_name, OutputContainer};
use crate::status::{StatusBoard, StatusSnapshot};
use crate::PipelineError;

/// Handle returned by `JobManager::submit`.
#[derive(Clone)]
pub struct JobTicket {
    pub job_id: String,
    pub output_name: String,
    pub output_path: PathBuf,
    board: Arc<StatusBoard>,
}

impl JobTicket {
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.board.snapshot()
    }
}

struct JobEntry {
    board: Arc<StatusBoard>,
    output_name: String,
    _worker: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, JobEntry>,
    latest: Option<String>,
}

pub struct JobManager {
    settings: PipelineSettings,
    registry: BackendRegistry,
    annotator: Arc<FrameAnnotator>,
    processed_dir: PathBuf,
    container: OutputContainer,
    table: Mutex<JobTable>,
}

impl JobManager {
    pub fn new(
        settings: PipelineSettings,
        registry: BackendRegistry,
        annotator: Arc<FrameAnnotator>,
        processed_dir: PathBuf,
    ) -> Result<Self> {
        std::fs::create_dir_all(&processed_dir)
            .with_context(|| format!("create processed dir {}", processed_dir.display()))?;
        Ok(Self {
            settings,
            registry,
            annotator,
            processed_dir,
            container: OutputContainer::select(),
            table: Mutex::new(JobTable::default()),
        })
    }

    pub fn from_config(cfg: &CrowdwatchConfig) -> Result<Self> {
        let registry = BackendRegistry::from_config(&cfg.detector)?;
        let annotator = FrameAnnotator::from_font_path(cfg.font_path.as_deref())?;
        Self::new(
            PipelineSettings::from_config(cfg),
            registry,
            Arc::new(annotator),
            cfg.storage.processed_dir.clone(),
        )
    }

    pub fn with_container(mut self, container: OutputContainer) -> Self {
        self.container = container;
        self
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Start processing `input` under `job_id`. Returns once the worker is spawned.
    ///
    /// The output is `processed_<job_id>` in the processed directory. A job id whose
    /// previous job is still running is rejected with `PipelineError::DuplicateJob`.
    pub fn submit(&self, input: &str, job_id: &str) -> Result<JobTicket> {
        if !is_valid_job_id(job_id) {
            return Err(anyhow!("invalid job id {job_id:?}"));
        }
        let output_name = output_file_name(job_id, self.container);
        let output_path = self.processed_dir.join(&output_name);

        let mut table = self
            .table
            .lock()
            .map_err(|_| anyhow!("job table lock poisoned"))?;
        if let Some(existing) = table.jobs.get(job_id) {
            if !existing.board.snapshot().status.is_terminal() {
                return Err(PipelineError::DuplicateJob(job_id.to_string()).into());
            }
        }

        let board = Arc::new(StatusBoard::new(job_id));
        let worker = {
            let input = input.to_string();
            let output_path = output_path.clone();
            let container = self.container;
            let settings = self.settings.clone();
            let registry = self.registry.clone();
            let annotator = Arc::clone(&self.annotator);
            let board = Arc::clone(&board);
            thread::Builder::new()
                .name(format!("job-{job_id}"))
                .spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_batch(
                            &input,
                            &output_path,
                            container,
                            &settings,
                            &registry,
                            annotator,
                            Arc::clone(&board),
                        )
                    }));
                    if let Err(payload) = outcome {
                        let message = panic_message(payload.as_ref());
                        log::error!("job {}: worker panicked: {}", board.snapshot().job_id, message);
                        board.fail(&anyhow!("worker panicked: {message}"));
                    }
                })
                .context("spawn job worker")?
        };

        log::info!("job {}: submitted ({})", job_id, input);
        table.jobs.insert(
            job_id.to_string(),
            JobEntry {
                board: Arc::clone(&board),
                output_name: output_name.clone(),
                _worker: Some(worker),
            },
        );
        table.latest = Some(job_id.to_string());

        Ok(JobTicket {
            job_id: job_id.to_string(),
            output_name,
            output_path,
            board,
        })
    }

    pub fn status(&self, job_id: &str) -> Option<Arc<StatusSnapshot>> {
        let table = self.table.lock().ok()?;
        table.jobs.get(job_id).map(|entry| entry.board.snapshot())
    }

    /// Snapshot of the most recently submitted job.
    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        let table = self.table.lock().ok()?;
        let id = table.latest.as_ref()?;
        table.jobs.get(id).map(|entry| entry.board.snapshot())
    }

    /// Whether `file_name` exists in the processed directory and no job is still writing it.
    pub fn output_ready(&self, file_name: &str) -> bool {
        let Some(path) = self.processed_path(file_name) else {
            return false;
        };
        let writing = self
            .table
            .lock()
            .map(|table| {
                table.jobs.values().any(|entry| {
                    entry.output_name == file_name && !entry.board.snapshot().status.is_terminal()
                })
            })
            .unwrap_or(true);
        !writing && path.is_file()
    }

    /// `output_ready` for the output an upload named `upload_name` produces.
    pub fn upload_output_ready(&self, upload_name: &str) -> bool {
        sanitize_file_name(upload_name)
            .map(|name| self.output_ready(&output_file_name(&name, self.container)))
            .unwrap_or(false)
    }

    /// Path of a processed file, if `file_name` is a plain file name.
    pub fn processed_path(&self, file_name: &str) -> Option<PathBuf> {
        if sanitize_file_name(file_name).as_deref() != Some(file_name) {
            return None;
        }
        Some(self.processed_dir.join(file_name))
    }

    /// Block until the job reaches a terminal state or `timeout` elapses.
    pub fn wait(&self, job_id: &str, timeout: Duration) -> Result<Arc<StatusSnapshot>> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self
                .status(job_id)
                .ok_or_else(|| anyhow!("unknown job {job_id:?}"))?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(anyhow!("timed out waiting for job {job_id:?}"));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn is_valid_job_id(job_id: &str) -> bool {
    static JOB_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = JOB_ID_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]{0,254}$").unwrap());
    re.is_match(job_id)
}

/// Reduce an uploaded name to a safe plain file name.
///
/// Directory components are dropped, whitespace becomes `_`, characters outside
/// `[A-Za-z0-9._-]` are removed, and leading dots are stripped.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_uploaded_names() {
        assert_eq!(sanitize_file_name("clip.mp4").as_deref(), Some("clip.mp4"));
        assert_eq!(
            sanitize_file_name("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_file_name("my crowd (1).mp4").as_deref(),
            Some("my_crowd_1.mp4")
        );
        assert_eq!(sanitize_file_name("..hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_file_name("C:\\videos\\a.avi").as_deref(), Some("a.avi"));
        assert_eq!(sanitize_file_name("..."), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[test]
    fn job_ids_are_plain_names() {
        assert!(is_valid_job_id("clip.mp4"));
        assert!(is_valid_job_id("job_1-a"));
        assert!(!is_valid_job_id(".hidden"));
        assert!(!is_valid_job_id("a/b"));
        assert!(!is_valid_job_id(""));
    }

    #[test]
    fn processed_path_rejects_traversal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut settings = crate::config::CrowdwatchConfig::default();
        settings.storage.processed_dir = dir.path().join("processed");
        let manager = JobManager::from_config(&settings)?;
        assert!(manager.processed_path("../secret").is_none());
        assert!(manager.processed_path("processed_clip.mjpeg").is_some());
        assert!(!manager.output_ready("processed_clip.mjpeg"));
        assert!(!manager.upload_output_ready("clip.mjpeg"));
        Ok(())
    }

    #[test]
    fn upload_names_map_to_processed_outputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut settings = crate::config::CrowdwatchConfig::default();
        settings.storage.processed_dir = dir.path().join("processed");
        let manager = JobManager::from_config(&settings)?.with_container(OutputContainer::Mjpeg);
        std::fs::write(manager.processed_dir().join("processed_gate.mjpeg"), b"\xFF\xD8")?;
        std::fs::write(manager.processed_dir().join("processed_plaza.mjpeg"), b"\xFF\xD8")?;

        assert!(manager.upload_output_ready("gate.mjpeg"));
        assert!(manager.upload_output_ready("plaza.mp4"));
        assert!(!manager.upload_output_ready("processed_gate.mjpeg"));
        assert!(!manager.upload_output_ready("../"));
        Ok(())
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
