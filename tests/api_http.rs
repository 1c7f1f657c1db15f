use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use crowdwatch::api::{ApiConfig, ApiHandle, ApiServer};
use crowdwatch::{
    BackendRegistry, CrowdwatchConfig, FrameAnnotator, FrameSink, JobManager, LiveSession,
    LiveSettings, MjpegFileSink, OutputContainer, PipelineSettings,
};

struct Response {
    head: String,
    body: Vec<u8>,
}

impl Response {
    fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

fn send(addr: std::net::SocketAddr, request: &[u8]) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    stream.write_all(request)?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("response has no header terminator"))?;
    Ok(Response {
        head: String::from_utf8_lossy(&raw[..split]).into_owned(),
        body: raw[split + 4..].to_vec(),
    })
}

fn get(addr: std::net::SocketAddr, path: &str) -> Result<Response> {
    send(
        addr,
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes(),
    )
}

fn mjpeg_clip(frames: u32) -> Result<Vec<u8>> {
    let dir = tempdir()?;
    let path = dir.path().join("clip.mjpeg");
    let mut sink = MjpegFileSink::create(&path)?;
    for i in 0..frames {
        let frame = RgbImage::from_fn(80, 48, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, (i * 10) as u8]));
        sink.write(&frame)?;
    }
    sink.close()?;
    Ok(std::fs::read(&path)?)
}

struct TestApi {
    _dir: tempfile::TempDir,
    live: Arc<LiveSession>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(camera: &str) -> Result<Self> {
        let dir = tempdir()?;
        let mut cfg = CrowdwatchConfig::default();
        cfg.storage.upload_dir = dir.path().join("uploads");
        cfg.storage.processed_dir = dir.path().join("processed");
        cfg.live.camera = format!("stub://{camera}");
        cfg.live.fps = 30;
        cfg.live.width = 96;
        cfg.live.height = 72;
        cfg.analysis.inference_width = 64;
        cfg.analysis.inference_height = 36;
        cfg.analysis.display_width = 128;
        cfg.analysis.display_height = 72;
        cfg.detector.stub_people = 2;

        let registry = BackendRegistry::from_config(&cfg.detector)?;
        let annotator = Arc::new(FrameAnnotator::new());
        let jobs = Arc::new(
            JobManager::new(
                PipelineSettings::from_config(&cfg),
                registry.clone(),
                Arc::clone(&annotator),
                cfg.storage.processed_dir.clone(),
            )?
            .with_container(OutputContainer::Mjpeg),
        );
        let live = Arc::new(LiveSession::new(
            LiveSettings::from_config(&cfg),
            registry,
            annotator,
        ));

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_upload_bytes: 4 * 1024 * 1024,
            ..ApiConfig::from_config(&cfg)
        };
        let api_handle = ApiServer::new(api_config, jobs, Arc::clone(&live)).spawn()?;

        Ok(Self {
            _dir: dir,
            live,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
        self.live.stop().expect("failed to stop live session");
    }
}

#[test]
fn health_is_ok_with_cors() -> Result<()> {
    let api = TestApi::new("api-health")?;
    let response = get(api.addr(), "/health")?;
    assert!(response.head.contains("200 OK"));
    assert!(response.head.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(response.json()?["status"], "ok");
    Ok(())
}

#[test]
fn unknown_routes_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::new("api-routes")?;
    assert!(get(api.addr(), "/nope")?.head.contains("404 Not Found"));

    let response = send(
        api.addr(),
        b"POST /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
    )?;
    assert!(response.head.contains("405 Method Not Allowed"));

    let response = send(
        api.addr(),
        b"OPTIONS /upload-video HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )?;
    assert!(response.head.contains("204 No Content"));
    assert!(response.head.contains("Access-Control-Allow-Methods"));
    Ok(())
}

#[test]
fn upload_validation_errors() -> Result<()> {
    let api = TestApi::new("api-upload-errors")?;

    let response = send(
        api.addr(),
        b"POST /upload-video?filename=a.mjpeg HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )?;
    assert!(response.head.contains("411 Length Required"));

    let response = send(
        api.addr(),
        b"POST /upload-video HTTP/1.1\r\nHost: localhost\r\nContent-Length: 3\r\n\r\nabc",
    )?;
    assert!(response.head.contains("400 Bad Request"));

    let response = send(
        api.addr(),
        b"POST /upload-video?filename=notes.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 3\r\n\r\nabc",
    )?;
    assert!(response.head.contains("400 Bad Request"));
    assert!(response.json()?["error"]
        .as_str()
        .unwrap_or_default()
        .contains("unsupported"));

    let response = send(
        api.addr(),
        b"POST /upload-video?filename=huge.mjpeg HTTP/1.1\r\nHost: localhost\r\nContent-Length: 999999999\r\n\r\n",
    )?;
    assert!(response.head.contains("413 Payload Too Large"));

    let response = get(api.addr(), "/progress/never-uploaded.mjpeg")?;
    assert!(response.head.contains("404 Not Found"));

    let response = get(api.addr(), "/processed-exists/never.mjpeg")?;
    assert_eq!(response.json()?["ready"], false);
    Ok(())
}

#[test]
fn truncated_upload_is_rejected_and_not_stored() -> Result<()> {
    let api = TestApi::new("api-truncated")?;
    let clip = mjpeg_clip(15)?;

    let mut stream = TcpStream::connect(api.addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    let head = format!(
        "POST /upload-video?filename=cut.mjpeg HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
        clip.len() + 4096
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(&clip)?;
    stream.shutdown(Shutdown::Write)?;
    let mut raw = String::new();
    stream.read_to_string(&mut raw)?;
    assert!(raw.contains("400 Bad Request"), "{raw}");
    assert!(raw.contains("upload truncated"));

    assert!(get(api.addr(), "/progress/cut.mjpeg")?.head.contains("404 Not Found"));
    Ok(())
}

#[test]
fn upload_is_processed_and_served() -> Result<()> {
    let api = TestApi::new("api-upload")?;
    let clip = mjpeg_clip(15)?;

    let mut request = format!(
        "POST /upload-video?filename=north%20gate.mjpeg HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
        clip.len()
    )
    .into_bytes();
    request.extend_from_slice(&clip);
    let response = send(api.addr(), &request)?;
    assert!(response.head.contains("200 OK"), "{}", response.head);
    let accepted = response.json()?;
    assert_eq!(accepted["filename"], "north_gate.mjpeg");
    assert_eq!(accepted["output"], "processed_north_gate.mjpeg");

    let deadline = Instant::now() + Duration::from_secs(30);
    let progress = loop {
        let progress = get(api.addr(), "/progress/north_gate.mjpeg")?.json()?;
        if progress["status"] == "Done" || progress["status"] == "Error" {
            break progress;
        }
        assert!(Instant::now() < deadline, "job did not finish: {progress}");
        thread::sleep(Duration::from_millis(20));
    };
    assert_eq!(progress["status"], "Done");
    assert_eq!(progress["progress"], 100);
    assert_eq!(progress["people_count"], 2);
    assert_eq!(progress["risk_level"], "LOW");
    assert_eq!(progress["risk"], "LOW");
    assert_eq!(progress["motion"], progress["motion_status"]);

    let latest = get(api.addr(), "/progress")?.json()?;
    assert_eq!(latest["job_id"], "north_gate.mjpeg");

    let ready = get(api.addr(), "/processed-exists/north_gate.mjpeg")?.json()?;
    assert_eq!(ready["ready"], true);
    let ready = get(api.addr(), "/processed-exists/north%20gate.mjpeg")?.json()?;
    assert_eq!(ready["ready"], true);

    let response = get(api.addr(), "/processed/processed_north_gate.mjpeg")?;
    assert!(response.head.contains("200 OK"));
    assert!(response.head.contains("Content-Type: video/x-motion-jpeg"));
    assert_eq!(&response.body[..2], &[0xFF, 0xD8]);

    let response = get(api.addr(), "/processed/..%2Fsecret")?;
    assert!(response.head.contains("400 Bad Request"));
    Ok(())
}

#[test]
fn live_start_stop_and_progress() -> Result<()> {
    let api = TestApi::new("api-live")?;

    let started = get(api.addr(), "/start_live")?.json()?;
    assert_eq!(started["status"], "started");
    let again = get(api.addr(), "/start_live")?.json()?;
    assert_eq!(again["status"], "already running");

    let progress = get(api.addr(), "/live_progress")?.json()?;
    assert_eq!(progress["job_id"], "live");
    assert_eq!(progress["status"], "Processing");
    assert!(progress["risk"].is_string());
    assert!(progress["motion"].is_string());

    let stopped = get(api.addr(), "/stop_live")?;
    assert!(stopped.head.contains("200 OK"));
    assert_eq!(stopped.json()?["status"], "Live detection stopped");
    assert_eq!(get(api.addr(), "/live_progress")?.json()?["status"], "Done");
    Ok(())
}
