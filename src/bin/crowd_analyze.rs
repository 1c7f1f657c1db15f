//! crowd_analyze - run the batch crowd analysis pipeline on one clip
//!
//! Processes `<input>` synchronously, shows progress on stderr, and prints the final
//! status snapshot as JSON on stdout. Exits non-zero when the job ends in `Error`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crowdwatch::jobs::sanitize_file_name;
use crowdwatch::pipeline::run_batch;
use crowdwatch::sink::output_file_name;
use crowdwatch::ui::{Ui, UiMode};
use crowdwatch::{
    BackendRegistry, CrowdwatchConfig, FrameAnnotator, JobStatus, OutputContainer,
    PipelineSettings, StatusBoard,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input clip path, or a synthetic `stub://name?frames=N` source.
    input: String,
    /// Directory for the annotated output (defaults to storage.processed_dir).
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,
    /// Analyze every Nth frame.
    #[arg(long)]
    skip: Option<u64>,
    /// Minimum detection confidence in (0, 1].
    #[arg(long)]
    confidence: Option<f32>,
    /// Use the stub detector with this many people per frame.
    #[arg(long, value_name = "N")]
    stub_people: Option<usize>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = CrowdwatchConfig::load()?;
        if let Some(skip) = args.skip {
            cfg.analysis.frame_skip = skip;
        }
        if let Some(confidence) = args.confidence {
            cfg.detector.confidence = confidence;
        }
        if let Some(people) = args.stub_people {
            cfg.detector.backend = "stub".to_string();
            cfg.detector.stub_people = people;
        }
        if let Some(dir) = &args.out_dir {
            cfg.storage.processed_dir = dir.clone();
        }
        cfg
    };
    cfg.validate()?;

    let job_id = job_id_for(&args.input)?;
    let container = OutputContainer::select();
    let output_path = cfg
        .storage
        .processed_dir
        .join(output_file_name(&job_id, container));
    std::fs::create_dir_all(&cfg.storage.processed_dir).with_context(|| {
        format!(
            "create output dir {}",
            cfg.storage.processed_dir.display()
        )
    })?;

    let (registry, annotator) = {
        let _stage = ui.stage("Prepare detector");
        let registry = BackendRegistry::from_config(&cfg.detector)?;
        let annotator = FrameAnnotator::from_font_path(cfg.font_path.as_deref())?;
        (registry, Arc::new(annotator))
    };

    let settings = PipelineSettings::from_config(&cfg);
    let board = Arc::new(StatusBoard::new(&job_id));
    let worker = {
        let input = args.input.clone();
        let output_path = output_path.clone();
        let board = Arc::clone(&board);
        thread::Builder::new()
            .name(format!("job-{job_id}"))
            .spawn(move || {
                // The outcome is recorded on the board.
                let _ = run_batch(
                    &input,
                    &output_path,
                    container,
                    &settings,
                    &registry,
                    annotator,
                    board,
                );
            })
            .context("spawn pipeline worker")?
    };

    let mut progress = ui.job(&job_id);
    while !worker.is_finished() {
        progress.update(&board.snapshot());
        thread::sleep(POLL_INTERVAL);
    }
    if worker.join().is_err() {
        board.fail(&anyhow!("pipeline worker panicked"));
    }

    let snapshot = board.snapshot();
    progress.finish(&snapshot);
    println!("{}", serde_json::to_string_pretty(&*snapshot)?);

    if snapshot.status == JobStatus::Error {
        let reason = snapshot
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(anyhow!("job {} failed: {}", job_id, reason));
    }
    eprintln!("output: {}", output_path.display());
    Ok(())
}

/// Job id from the input's file name, ignoring any `?query` of synthetic sources.
fn job_id_for(input: &str) -> Result<String> {
    let without_query = input.split_once('?').map(|(head, _)| head).unwrap_or(input);
    sanitize_file_name(without_query)
        .ok_or_else(|| anyhow!("cannot derive a job name from input {input:?}"))
}
