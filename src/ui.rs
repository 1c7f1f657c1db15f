use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::status::StatusSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty | UiMode::Auto => true,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Progress display for one job, fed from status snapshots.
    pub fn job(&self, job_id: &str) -> JobProgress {
        let bar = if self.pretty() {
            let bar = ProgressBar::new(100);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template(
                "{bar:30.cyan/blue} {pos:>3}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar.set_message(job_id.to_string());
            Some(bar)
        } else {
            None
        };
        JobProgress {
            job_id: job_id.to_string(),
            bar,
            last_reported: None,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct JobProgress {
    job_id: String,
    bar: Option<ProgressBar>,
    last_reported: Option<u8>,
}

impl JobProgress {
    pub fn update(&mut self, snapshot: &StatusSnapshot) {
        let summary = format!(
            "{} people={} risk={} score={:.0}",
            self.job_id,
            snapshot.people_count,
            snapshot.risk_level.as_str(),
            snapshot.risk_score
        );
        match &self.bar {
            Some(bar) => {
                bar.set_position(u64::from(snapshot.progress));
                bar.set_message(summary);
            }
            None => {
                let decile = snapshot.progress / 10;
                if self.last_reported != Some(decile) {
                    self.last_reported = Some(decile);
                    eprintln!("[{:>3}%] {}", snapshot.progress, summary);
                }
            }
        }
    }

    pub fn finish(self, snapshot: &StatusSnapshot) {
        let message = format!("{} {:?}", self.job_id, snapshot.status);
        match self.bar {
            Some(bar) => {
                bar.set_position(u64::from(snapshot.progress));
                bar.finish_with_message(message);
            }
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::JobStatus;

    #[test]
    fn plain_progress_reports_each_decile_once() {
        let ui = Ui::new(UiMode::Plain, false);
        let mut progress = ui.job("clip.mp4");
        let mut snapshot = StatusSnapshot::idle("clip.mp4");
        for pct in [0u8, 5, 10, 12, 99] {
            snapshot.progress = pct;
            progress.update(&snapshot);
        }
        assert_eq!(progress.last_reported, Some(9));
        snapshot.status = JobStatus::Done;
        snapshot.progress = 100;
        progress.finish(&snapshot);
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
