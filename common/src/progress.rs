use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// A single monotonically increasing tally.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Shared tallies for one run, incremented concurrently by copy and upload
/// workers. Constructed fresh per run. A snapshot is not synchronized across
/// fields; approximate reads are fine for display.
#[derive(Debug, Default)]
pub struct Counters {
    pub copied: Counter,
    pub copy_failed: Counter,
    pub upload_succeeded: Counter,
    pub upload_failed: Counter,
    pub upload_attempted: Counter,
    pub bytes_copied: Counter,
}

impl Counters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            copied: self.copied.get(),
            copy_failed: self.copy_failed.get(),
            upload_succeeded: self.upload_succeeded.get(),
            upload_failed: self.upload_failed.get(),
            upload_attempted: self.upload_attempted.get(),
            bytes_copied: self.bytes_copied.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub copied: u64,
    pub copy_failed: u64,
    pub upload_succeeded: u64,
    pub upload_failed: u64,
    pub upload_attempted: u64,
    pub bytes_copied: u64,
}

impl Snapshot {
    /// Fraction of scanned files with a copy outcome, failed or not.
    #[must_use]
    pub fn copy_fraction(&self, total_scanned: u64) -> f64 {
        if total_scanned == 0 {
            return 0.0;
        }
        (self.copied + self.copy_failed) as f64 / total_scanned as f64
    }

    /// Upload demand is gated by what has actually been staged, so the
    /// denominator is the live copied count, not the scan total.
    #[must_use]
    pub fn upload_fraction(&self) -> f64 {
        if self.copied == 0 {
            return 0.0;
        }
        self.upload_attempted as f64 / self.copied as f64
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressType {
    /// Choose depending on the type of terminal attached to stderr
    #[default]
    #[value(alias = "Auto")]
    Auto,
    /// Animated in-place progress bars
    #[value(alias = "ProgressBar")]
    ProgressBar,
    /// Periodic log lines, appropriate for logging
    #[value(alias = "TextUpdates")]
    TextUpdates,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressSettings {
    pub progress_type: ProgressType,
    /// Delay between samples; defaults to 100ms for bars, 10s for text.
    pub delay: Option<std::time::Duration>,
}

/// Parse a human readable duration like "200ms" or "10s".
pub fn parse_delay(value: &str) -> anyhow::Result<std::time::Duration> {
    use anyhow::Context;
    humantime::parse_duration(value).with_context(|| format!("invalid progress delay {value:?}"))
}

const BAR_DELAY: std::time::Duration = std::time::Duration::from_millis(100);
const TEXT_DELAY: std::time::Duration = std::time::Duration::from_secs(10);

/// Renders two live indicators (copy, upload) from a sampled [`Counters`].
///
/// Presentation only: the tracker never mutates the counters and has no
/// influence on pipeline control flow. Constructed fresh per run with the
/// counters injected.
pub struct ProgressTracker {
    counters: std::sync::Arc<Counters>,
    total_scanned: u64,
    mode: ProgressType,
    delay: std::time::Duration,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(
        counters: std::sync::Arc<Counters>,
        total_scanned: u64,
        settings: &ProgressSettings,
    ) -> Self {
        let mode = match settings.progress_type {
            ProgressType::Auto => {
                if std::io::stderr().is_terminal() {
                    ProgressType::ProgressBar
                } else {
                    ProgressType::TextUpdates
                }
            }
            other => other,
        };
        let delay = settings.delay.unwrap_or(match mode {
            ProgressType::TextUpdates => TEXT_DELAY,
            _ => BAR_DELAY,
        });
        Self {
            counters,
            total_scanned,
            mode,
            delay,
        }
    }

    /// Sample and render until `stop` is cancelled, then clear the rendered
    /// region.
    pub async fn run(self, stop: CancellationToken) {
        match self.mode {
            ProgressType::TextUpdates => self.run_text(stop).await,
            _ => self.run_bars(stop).await,
        }
    }

    async fn run_bars(self, stop: CancellationToken) {
        let multi = indicatif::MultiProgress::new();
        let copy_bar = multi.add(indicatif::ProgressBar::new(self.total_scanned));
        copy_bar.set_prefix("Copy");
        copy_bar.set_style(bar_style("green"));
        let upload_bar = multi.add(indicatif::ProgressBar::new(0));
        upload_bar.set_prefix("Upload");
        upload_bar.set_style(bar_style("blue"));
        let mut interval = tokio::time::interval(self.delay);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            draw(&copy_bar, &upload_bar, &self.counters.snapshot());
        }
        // final sample, then leave nothing behind on the terminal
        draw(&copy_bar, &upload_bar, &self.counters.snapshot());
        copy_bar.finish_and_clear();
        upload_bar.finish_and_clear();
    }

    async fn run_text(self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.delay);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            let snapshot = self.counters.snapshot();
            tracing::info!(
                "copy {}/{} ({} errors) | upload {}/{} ({} errors)",
                snapshot.copied + snapshot.copy_failed,
                self.total_scanned,
                snapshot.copy_failed,
                snapshot.upload_attempted,
                snapshot.copied,
                snapshot.upload_failed,
            );
        }
    }
}

fn draw(copy_bar: &indicatif::ProgressBar, upload_bar: &indicatif::ProgressBar, snap: &Snapshot) {
    copy_bar.set_position(snap.copied + snap.copy_failed);
    copy_bar.set_message(snap.copy_failed.to_string());
    upload_bar.set_length(snap.copied);
    upload_bar.set_position(snap.upload_attempted);
    upload_bar.set_message(snap.upload_failed.to_string());
}

fn bar_style(color: &str) -> indicatif::ProgressStyle {
    indicatif::ProgressStyle::with_template(&format!(
        "{{prefix:>6}} [{{bar:50.{color}}}] {{pos}}/{{len}} ({{percent}}%) | errors: {{msg}}"
    ))
    .expect("static progress template")
    .progress_chars("█░")
}
