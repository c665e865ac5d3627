use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::progress::{Counters, ProgressSettings, ProgressTracker};
use crate::queue;
use crate::queue::TransferItem;
use crate::scan::SourceFile;
use crate::shutdown::ShutdownToken;
use crate::upload;
use crate::upload::Uploader;

/// How many per-file error details are surfaced in the end-of-run report.
pub const REPORTED_ERRORS: usize = 5;

#[derive(Debug, Clone)]
pub struct Settings {
    pub copy_concurrency: usize,
    pub upload_concurrency: usize,
    pub queue_capacity: usize,
    pub uploader: Uploader,
    pub progress: Option<ProgressSettings>,
}

impl Settings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.copy_concurrency == 0 {
            return Err("copy concurrency must be greater than zero".to_string());
        }
        if self.upload_concurrency == 0 {
            return Err("upload concurrency must be greater than zero".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue capacity must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub files_found: usize,
    pub copied: usize,
    pub copy_failed: usize,
    /// Files never staged because shutdown was observed first.
    pub skipped: usize,
    pub upload_succeeded: usize,
    pub upload_failed: usize,
    pub upload_attempted: usize,
    pub bytes_copied: u64,
    pub interrupted: bool,
    /// Per-file copy error details, in completion order.
    pub errors: Vec<(std::path::PathBuf, String)>,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(mut self, other: Self) -> Self {
        self.errors.extend(other.errors);
        Self {
            files_found: self.files_found + other.files_found,
            copied: self.copied + other.copied,
            copy_failed: self.copy_failed + other.copy_failed,
            skipped: self.skipped + other.skipped,
            upload_succeeded: self.upload_succeeded + other.upload_succeeded,
            upload_failed: self.upload_failed + other.upload_failed,
            upload_attempted: self.upload_attempted + other.upload_attempted,
            bytes_copied: self.bytes_copied + other.bytes_copied,
            interrupted: self.interrupted || other.interrupted,
            errors: self.errors,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files found: {}\n\
            bytes copied: {}\n\
            files copied: {}\n\
            copy errors: {}\n\
            uploads succeeded: {}\n\
            uploads failed: {}",
            self.files_found,
            bytesize::ByteSize(self.bytes_copied),
            self.copied,
            self.copy_failed,
            self.upload_succeeded,
            self.upload_failed,
        )
    }
}

/// Drive one disc run: upload workers up, progress tracker up, copy fan-out,
/// sentinel fan-in, worker drain, summary out.
///
/// Per-file failures are aggregated into the summary and never abort the
/// run; the only error path out of here is failing to create the staging
/// directory.
#[instrument(skip_all, fields(files = files.len()))]
pub async fn run(
    files: Vec<SourceFile>,
    output_dir: &std::path::Path,
    settings: &Settings,
    shutdown: &ShutdownToken,
) -> anyhow::Result<Summary> {
    let total = files.len();
    let mut summary = Summary {
        files_found: total,
        ..Default::default()
    };
    if total == 0 || shutdown.is_triggered() {
        summary.skipped = total;
        summary.interrupted = shutdown.is_triggered();
        return Ok(summary);
    }
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("cannot create staging directory {output_dir:?}"))?;
    let counters = std::sync::Arc::new(Counters::new());

    let (queue_tx, queue_rx) = queue::bounded(settings.queue_capacity);
    let upload_semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(
        settings.upload_concurrency,
    ));
    let worker_count = settings.upload_concurrency.min(total);
    let mut upload_workers = tokio::task::JoinSet::new();
    for id in 0..worker_count {
        upload_workers.spawn(upload::worker(
            id,
            queue_rx.clone(),
            std::sync::Arc::clone(&upload_semaphore),
            settings.uploader.clone(),
            std::sync::Arc::clone(&counters),
            shutdown.clone(),
        ));
    }
    drop(queue_rx);

    let tracker_stop = CancellationToken::new();
    let tracker = settings.progress.as_ref().map(|progress| {
        let tracker =
            ProgressTracker::new(std::sync::Arc::clone(&counters), total as u64, progress);
        tokio::spawn(tracker.run(tracker_stop.clone()))
    });

    let copy_semaphore =
        std::sync::Arc::new(tokio::sync::Semaphore::new(settings.copy_concurrency));
    let mut copy_tasks = tokio::task::JoinSet::new();
    let mut not_scheduled = 0usize;
    for file in files {
        // stop scheduling new files once shutdown is observed
        if shutdown.is_triggered() {
            not_scheduled += 1;
            continue;
        }
        let output_dir = output_dir.to_path_buf();
        let semaphore = std::sync::Arc::clone(&copy_semaphore);
        let queue_tx = queue_tx.clone();
        let counters = std::sync::Arc::clone(&counters);
        let shutdown = shutdown.clone();
        copy_tasks.spawn(async move {
            crate::copy::stage_file(file, &output_dir, &semaphore, &queue_tx, &counters, &shutdown)
                .await
        });
    }
    summary.skipped += not_scheduled;

    while let Some(joined) = copy_tasks.join_next().await {
        match joined {
            Ok(outcome) => match outcome.result {
                Ok(_) => summary.copied += 1,
                Err(crate::copy::StageError::Interrupted) => summary.skipped += 1,
                Err(crate::copy::StageError::Failed(error)) => {
                    summary.copy_failed += 1;
                    summary.errors.push((outcome.source, format!("{error:#}")));
                }
            },
            Err(join_error) => {
                tracing::error!("copy task failed: {join_error}");
                counters.copy_failed.inc();
                summary.copy_failed += 1;
            }
        }
    }

    // one sentinel per worker; skipped under shutdown, where the queue may be
    // full with nobody draining it and the workers exit on their own timeout
    if !shutdown.is_triggered() {
        for _ in 0..worker_count {
            tokio::select! {
                _ = shutdown.triggered() => break,
                result = queue_tx.send(TransferItem::Done) => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }
    }
    drop(queue_tx);
    while let Some(joined) = upload_workers.join_next().await {
        if let Err(join_error) = joined {
            tracing::error!("upload worker task failed: {join_error}");
        }
    }

    // stop the tracker and clear its bars before anyone prints a report
    tracker_stop.cancel();
    if let Some(tracker) = tracker {
        let _ = tracker.await;
    }

    let snapshot = counters.snapshot();
    summary.upload_succeeded = snapshot.upload_succeeded as usize;
    summary.upload_failed = snapshot.upload_failed as usize;
    summary.upload_attempted = snapshot.upload_attempted as usize;
    summary.bytes_copied = snapshot.bytes_copied;
    summary.interrupted = shutdown.is_triggered();
    tracing::info!(
        "run finished: {} copied, {} copy errors, {} uploaded, {} upload failures",
        summary.copied,
        summary.copy_failed,
        summary.upload_succeeded,
        summary.upload_failed
    );
    Ok(summary)
}

/// Delete staged regular files after a run whose uploads went through.
/// Subdirectories and anything unreadable are left alone.
#[instrument]
pub async fn remove_staged(output_dir: &std::path::Path) -> anyhow::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(output_dir)
        .await
        .with_context(|| format!("cannot open staging directory {output_dir:?} for reading"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing staging directory {output_dir:?}"))?
    {
        let path = entry.path();
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(error) => tracing::warn!("failed removing staged file {:?}: {}", &path, error),
        }
    }
    Ok(removed)
}
