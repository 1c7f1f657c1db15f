//! HTTP polling and streaming surface.
//!
//! A listener thread accepts connections on a non-blocking socket until the handle is
//! stopped; each connection is served on its own short-lived thread. The API only
//! reads published state (job boards, live snapshot, live feed) and submits work; it
//! never touches the per-frame pipeline directly.

mod http;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use self::http::{
    content_type_for, read_request, write_error, write_head, write_json, write_preflight,
    HttpRequest,
};
use crate::config::CrowdwatchConfig;
use crate::jobs::{sanitize_file_name, JobManager};
use crate::live::{LiveSession, StartOutcome};
use crate::sink::FeedEvent;
use crate::status::StatusSnapshot;
use crate::{classify_error, ErrorKind, MotionStatus, RiskLevel};

const FEED_POLL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: u64,
    pub upload_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_config(&CrowdwatchConfig::default())
    }
}

impl ApiConfig {
    pub fn from_config(cfg: &CrowdwatchConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            max_upload_bytes: cfg.max_upload_bytes,
            upload_dir: cfg.storage.upload_dir.clone(),
            allowed_extensions: cfg.storage.allowed_extensions.clone(),
        }
    }

    fn extension_allowed(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

struct ApiContext {
    cfg: ApiConfig,
    jobs: Arc<JobManager>,
    live: Arc<LiveSession>,
    shutdown: Arc<AtomicBool>,
}

pub struct ApiServer {
    cfg: ApiConfig,
    jobs: Arc<JobManager>,
    live: Arc<LiveSession>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, jobs: Arc<JobManager>, live: Arc<LiveSession>) -> Self {
        Self { cfg, jobs, live }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address {:?}", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {configured_addr}"))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ApiContext {
            cfg: self.cfg,
            jobs: self.jobs,
            live: self.live,
            shutdown: Arc::clone(&shutdown),
        });
        let join = std::thread::Builder::new()
            .name("api-listener".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx) {
                    log::error!("api stopped: {:#}", err);
                }
            })
            .context("spawn api listener")?;

        log::info!("api listening on http://{}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: Arc<ApiContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = Arc::clone(&ctx);
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &ctx) {
                            log::warn!("api request rejected: {:#}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("api: failed to spawn connection handler: {}", err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(25));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_error(&mut stream, 403, "forbidden")?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method == "OPTIONS" {
        return write_preflight(&mut stream);
    }

    let path = request.path.as_str();
    match (request.method.as_str(), path) {
        ("GET", "/health") => write_json(&mut stream, 200, &serde_json::json!({"status": "ok"})),
        ("POST", "/upload-video") => handle_upload(&mut stream, &request, ctx),
        ("GET", "/progress") => match ctx.jobs.latest() {
            Some(snapshot) => write_json(&mut stream, 200, &ProgressBody::new(&snapshot)),
            None => write_error(&mut stream, 404, "no job submitted"),
        },
        ("GET", p) if p.starts_with("/progress/") => {
            let snapshot = request
                .path_param("/progress/")
                .and_then(|id| ctx.jobs.status(&id));
            match snapshot {
                Some(snapshot) => write_json(&mut stream, 200, &ProgressBody::new(&snapshot)),
                None => write_error(&mut stream, 404, "unknown job"),
            }
        }
        ("GET", p) if p.starts_with("/processed-exists/") => {
            let ready = request
                .path_param("/processed-exists/")
                .map(|name| ctx.jobs.upload_output_ready(&name))
                .unwrap_or(false);
            write_json(&mut stream, 200, &serde_json::json!({ "ready": ready }))
        }
        ("GET", p) if p.starts_with("/processed/") => handle_processed(&mut stream, &request, ctx),
        ("GET", "/video_feed") => handle_video_feed(stream, ctx),
        ("GET", "/start_live") => match ctx.live.start() {
            Ok(StartOutcome::Started) => {
                write_json(&mut stream, 200, &serde_json::json!({"status": "started"}))
            }
            Ok(StartOutcome::AlreadyRunning) => write_json(
                &mut stream,
                200,
                &serde_json::json!({"status": "already running"}),
            ),
            Err(err) => write_failure(&mut stream, &err),
        },
        ("GET", "/stop_live") => {
            ctx.live.stop()?;
            write_json(
                &mut stream,
                200,
                &serde_json::json!({"status": "Live detection stopped"}),
            )
        }
        ("GET", "/live_progress") => {
            let snapshot = ctx.live.status()?;
            write_json(&mut stream, 200, &ProgressBody::new(&snapshot))
        }
        (
            _,
            "/health" | "/upload-video" | "/progress" | "/video_feed" | "/start_live" | "/stop_live"
            | "/live_progress",
        ) => write_error(&mut stream, 405, "method not allowed"),
        _ => write_error(&mut stream, 404, "not found"),
    }
}

/// Snapshot JSON plus the short `risk` / `motion` keys older dashboards poll for.
#[derive(Serialize)]
struct ProgressBody<'a> {
    #[serde(flatten)]
    snapshot: &'a StatusSnapshot,
    risk: RiskLevel,
    motion: MotionStatus,
}

impl<'a> ProgressBody<'a> {
    fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self {
            snapshot,
            risk: snapshot.risk_level,
            motion: snapshot.motion_status,
        }
    }
}

fn write_failure(stream: &mut TcpStream, err: &anyhow::Error) -> Result<()> {
    let status = match classify_error(err) {
        ErrorKind::ResourceBusy | ErrorKind::DuplicateJob => 409,
        ErrorKind::Input => 400,
        _ => 500,
    };
    log::warn!("api: request failed ({}): {:#}", status, err);
    write_error(stream, status, &format!("{err:#}"))
}

fn handle_upload(stream: &mut TcpStream, request: &HttpRequest, ctx: &ApiContext) -> Result<()> {
    let Some(raw_name) = request.query.get("filename") else {
        return write_error(stream, 400, "missing filename");
    };
    let Some(file_name) = sanitize_file_name(raw_name) else {
        return write_error(stream, 400, "invalid filename");
    };
    if !ctx.cfg.extension_allowed(&file_name) {
        return write_error(stream, 400, "unsupported file type");
    }
    let length = match request.content_length() {
        None => return write_error(stream, 411, "content-length required"),
        Some(Err(err)) => return write_error(stream, 400, &err.to_string()),
        Some(Ok(length)) => length,
    };
    if length > ctx.cfg.max_upload_bytes {
        return write_error(stream, 413, "upload too large");
    }
    if length == 0 {
        return write_error(stream, 400, "empty upload");
    }
    if let Some(existing) = ctx.jobs.status(&file_name) {
        if !existing.status.is_terminal() {
            return write_error(stream, 409, &format!("job '{file_name}' is already processing"));
        }
    }

    let saved = match save_upload(stream, request, &ctx.cfg.upload_dir, &file_name, length) {
        Ok(path) => path,
        Err(err) => {
            log::warn!("api: upload of {} failed: {:#}", file_name, err);
            return write_error(stream, 400, &format!("{err:#}"));
        }
    };

    match ctx.jobs.submit(&saved.to_string_lossy(), &file_name) {
        Ok(ticket) => write_json(
            stream,
            200,
            &serde_json::json!({
                "status": "processing started",
                "filename": ticket.job_id,
                "output": ticket.output_name,
            }),
        ),
        Err(err) => write_failure(stream, &err),
    }
}

/// Stream the request body to `<upload_dir>/<file_name>`.
fn save_upload(
    stream: &mut TcpStream,
    request: &HttpRequest,
    upload_dir: &Path,
    file_name: &str,
    length: u64,
) -> Result<PathBuf> {
    std::fs::create_dir_all(upload_dir)
        .with_context(|| format!("create upload dir {}", upload_dir.display()))?;
    let final_path = upload_dir.join(file_name);
    let part_path = upload_dir.join(format!(".{file_name}.part"));

    let prefix_len = (request.body_prefix.len() as u64).min(length);
    let mut file = File::create(&part_path)
        .with_context(|| format!("create {}", part_path.display()))?;
    file.write_all(&request.body_prefix[..prefix_len as usize])?;

    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    let remaining = length - prefix_len;
    let copied = io::copy(&mut Read::by_ref(stream).take(remaining), &mut file)?;
    if copied != remaining {
        drop(file);
        let _ = std::fs::remove_file(&part_path);
        return Err(anyhow!(
            "upload truncated: expected {length} bytes, received {}",
            prefix_len + copied
        ));
    }
    file.flush()?;
    drop(file);
    std::fs::rename(&part_path, &final_path)
        .with_context(|| format!("store upload {}", final_path.display()))?;
    log::info!("api: stored upload {} ({} bytes)", final_path.display(), length);
    Ok(final_path)
}

fn handle_processed(stream: &mut TcpStream, request: &HttpRequest, ctx: &ApiContext) -> Result<()> {
    let Some(path) = request
        .path_param("/processed/")
        .and_then(|name| ctx.jobs.processed_path(&name))
    else {
        return write_error(stream, 400, "invalid file name");
    };
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(_) => return write_error(stream, 404, "not found"),
    };
    let len = file.metadata()?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    write_head(stream, 200, content_type_for(&name), Some(len))?;
    io::copy(&mut file, stream)?;
    Ok(())
}

fn handle_video_feed(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    if let Err(err) = ctx.live.start() {
        return write_failure(&mut stream, &err);
    }
    let mut subscriber = ctx.live.subscribe()?;
    write_head(
        &mut stream,
        200,
        "multipart/x-mixed-replace; boundary=frame",
        None,
    )?;

    loop {
        match subscriber.next_frame(FEED_POLL)? {
            FeedEvent::Frame(jpeg) => {
                let part = format!(
                    "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    jpeg.len()
                );
                let sent = stream
                    .write_all(part.as_bytes())
                    .and_then(|_| stream.write_all(&jpeg))
                    .and_then(|_| stream.write_all(b"\r\n"));
                if sent.is_err() {
                    log::debug!("api: video feed client disconnected");
                    return Ok(());
                }
            }
            FeedEvent::Timeout => {
                if ctx.shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            FeedEvent::Closed => break,
        }
    }
    let _ = stream.write_all(b"--frame--\r\n");
    Ok(())
}
