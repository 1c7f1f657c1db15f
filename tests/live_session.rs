use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crowdwatch::ingest::DeviceLease;
use crowdwatch::sink::FeedEvent;
use crowdwatch::{
    classify_error, BackendRegistry, CrowdwatchConfig, ErrorKind, FrameAnnotator, JobStatus,
    LiveSession, LiveSettings, RiskLevel, StartOutcome, StopOutcome,
};

fn live_session(device: &str, people: usize) -> Result<Arc<LiveSession>> {
    let mut cfg = CrowdwatchConfig::default();
    cfg.live.camera = format!("stub://{device}");
    cfg.live.fps = 40;
    cfg.live.width = 96;
    cfg.live.height = 72;
    cfg.analysis.inference_width = 48;
    cfg.analysis.inference_height = 36;
    cfg.detector.stub_people = people;
    Ok(Arc::new(LiveSession::new(
        LiveSettings::from_config(&cfg),
        BackendRegistry::from_config(&cfg.detector)?,
        Arc::new(FrameAnnotator::new()),
    )))
}

#[test]
fn concurrent_starts_acquire_the_camera_once() -> Result<()> {
    let live = live_session("it-concurrent", 2)?;

    let outcomes: Vec<StartOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let live = Arc::clone(&live);
                scope.spawn(move || live.start())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("start thread"))
            .collect::<Result<Vec<_>>>()
    })?;

    let started = outcomes
        .iter()
        .filter(|o| **o == StartOutcome::Started)
        .count();
    assert_eq!(started, 1);
    assert!(live.is_running());
    assert!(DeviceLease::is_held("stub://it-concurrent"));

    assert_eq!(live.stop()?, StopOutcome::Stopped);
    assert!(!DeviceLease::is_held("stub://it-concurrent"));
    Ok(())
}

#[test]
fn busy_camera_is_reported_and_start_recovers() -> Result<()> {
    let live = live_session("it-busy", 1)?;
    let lease = DeviceLease::acquire("stub://it-busy")?;

    let err = live.start().err().expect("camera is held elsewhere");
    assert_eq!(classify_error(&err), ErrorKind::ResourceBusy);
    assert!(!live.is_running());

    drop(lease);
    assert_eq!(live.start()?, StartOutcome::Started);
    live.stop()?;
    Ok(())
}

#[test]
fn subscribers_share_one_capture_loop() -> Result<()> {
    let live = live_session("it-feed", 16)?;
    live.start()?;

    let mut first = live.subscribe()?;
    let mut second = live.subscribe()?;
    for sub in [&mut first, &mut second] {
        match sub.next_frame(Duration::from_secs(5))? {
            FeedEvent::Frame(jpeg) => assert_eq!(&jpeg[..2], &[0xFF, 0xD8]),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    let snapshot = live.status()?;
    assert_eq!(snapshot.status, JobStatus::Processing);
    assert_eq!(snapshot.people_count, 16);
    assert_eq!(snapshot.risk_level, RiskLevel::High);
    assert_eq!(snapshot.risk_score, 100.0);

    live.stop()?;
    loop {
        match first.next_frame(Duration::from_secs(5))? {
            FeedEvent::Closed => break,
            FeedEvent::Frame(_) => continue,
            FeedEvent::Timeout => panic!("feed did not close after stop"),
        }
    }
    assert_eq!(live.status()?.status, JobStatus::Done);
    Ok(())
}

#[test]
fn restart_after_stop_publishes_fresh_status() -> Result<()> {
    let live = live_session("it-restart", 0)?;
    assert_eq!(live.stop()?, StopOutcome::NotRunning);

    live.start()?;
    live.stop()?;
    assert_eq!(live.status()?.status, JobStatus::Done);

    assert_eq!(live.start()?, StartOutcome::Started);
    let status = live.status()?;
    assert_eq!(status.status, JobStatus::Processing);
    assert_eq!(status.people_count, 0);
    live.stop()?;
    Ok(())
}

#[test]
fn status_stays_readable_while_stop_drains_the_camera() -> Result<()> {
    let mut cfg = CrowdwatchConfig::default();
    cfg.live.camera = "stub://it-slow".to_string();
    cfg.live.fps = 1;
    cfg.live.width = 64;
    cfg.live.height = 48;
    cfg.analysis.inference_width = 32;
    cfg.analysis.inference_height = 24;
    cfg.detector.stub_people = 3;
    let live = Arc::new(LiveSession::new(
        LiveSettings::from_config(&cfg),
        BackendRegistry::from_config(&cfg.detector)?,
        Arc::new(FrameAnnotator::new()),
    ));
    live.start()?;
    let mut sub = live.subscribe()?;
    assert!(matches!(
        sub.next_frame(Duration::from_secs(5))?,
        FeedEvent::Frame(_)
    ));

    // The worker is now waiting about a second for the next camera frame.
    let stopper = {
        let live = Arc::clone(&live);
        thread::spawn(move || live.stop())
    };
    thread::sleep(Duration::from_millis(50));

    let asked = Instant::now();
    let snapshot = live.status()?;
    let _late = live.subscribe()?;
    assert!(asked.elapsed() < Duration::from_millis(400));
    assert_eq!(snapshot.people_count, 3);
    assert!(!stopper.is_finished());

    assert_eq!(stopper.join().expect("stop thread")?, StopOutcome::Stopped);
    assert_eq!(live.status()?.status, JobStatus::Done);
    assert!(!DeviceLease::is_held("stub://it-slow"));
    Ok(())
}
