//! crowdwatchd - crowd risk analysis service
//!
//! This daemon:
//! 1. Loads configuration (defaults, `CROWDWATCH_CONFIG` file, env overrides)
//! 2. Serves the HTTP API for uploads, progress polling and processed files
//! 3. Runs the live camera session on demand (`/start_live`, `/video_feed`)

use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;

use crowdwatch::{
    api::{ApiConfig, ApiServer},
    BackendRegistry, CrowdwatchConfig, FrameAnnotator, JobManager, LiveSession, LiveSettings,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = CrowdwatchConfig::load()?;
    let registry = BackendRegistry::from_config(&cfg.detector)?;
    log::info!(
        "detector backends: {} (default {})",
        registry.list().join(", "),
        registry.default_name().unwrap_or("none")
    );
    let annotator = Arc::new(FrameAnnotator::from_font_path(cfg.font_path.as_deref())?);

    let jobs = Arc::new(JobManager::from_config(&cfg)?);
    let live = Arc::new(LiveSession::new(
        LiveSettings::from_config(&cfg),
        registry,
        annotator,
    ));

    let api_handle = ApiServer::new(ApiConfig::from_config(&cfg), jobs, Arc::clone(&live)).spawn()?;
    log::info!("crowdwatchd listening on {}", api_handle.addr);
    log::info!(
        "uploads -> {}, processed -> {}",
        cfg.storage.upload_dir.display(),
        cfg.storage.processed_dir.display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("crowdwatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    live.stop()?;

    Ok(())
}
