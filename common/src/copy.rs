use anyhow::Context;
use tracing::instrument;

use crate::progress::Counters;
use crate::queue;
use crate::queue::TransferItem;
use crate::scan::SourceFile;
use crate::shutdown::ShutdownToken;

/// Error type for a single staging attempt.
///
/// Interruption is distinguished from real failures: a worker that declined
/// to start because shutdown was already requested performed no I/O and must
/// not be counted as a copy error.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("interrupted before staging started")]
    Interrupted,
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

/// Outcome of one staging attempt. Failures are data, never control flow; a
/// failed copy must not take down the worker pool or its siblings.
#[derive(Debug)]
pub struct Outcome {
    pub source: std::path::PathBuf,
    pub result: Result<std::path::PathBuf, StageError>,
}

/// Destination stem for a file modified at `modified`, in local time.
#[must_use]
pub fn timestamp_stem(modified: std::time::SystemTime) -> String {
    let local: chrono::DateTime<chrono::Local> = modified.into();
    local.format("%Y%m%d_%H%M%S").to_string()
}

fn candidate_name(
    stem: &str,
    counter: u32,
    extension: Option<&std::ffi::OsStr>,
) -> std::ffi::OsString {
    let mut name = std::ffi::OsString::from(if counter == 0 {
        stem.to_string()
    } else {
        format!("{stem}_{counter}")
    });
    if let Some(extension) = extension {
        name.push(".");
        name.push(extension);
    }
    name
}

/// Claim a unique destination path in `output_dir`.
///
/// Collisions get `_1`, `_2`, ... suffixes in claim order; `create_new` makes
/// the claim atomic against sibling workers racing on the same stamp. Only
/// this pipeline writes to the output directory during a run, so no atomicity
/// against external writers is needed.
async fn claim_destination(
    output_dir: &std::path::Path,
    stem: &str,
    extension: Option<&std::ffi::OsStr>,
) -> anyhow::Result<(std::path::PathBuf, tokio::fs::File)> {
    let mut counter = 0u32;
    loop {
        let path = output_dir.join(candidate_name(stem, counter, extension));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => counter += 1,
            Err(error) => {
                return Err(error).with_context(|| format!("failed creating {:?}", &path));
            }
        }
    }
}

async fn copy_contents(
    src: &std::path::Path,
    dst_path: &std::path::Path,
    dst: &mut tokio::fs::File,
) -> anyhow::Result<u64> {
    use tokio::io::AsyncWriteExt;
    let mut reader = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("failed opening {:?} for reading", src))?;
    let bytes = tokio::io::copy(&mut reader, dst)
        .await
        .with_context(|| format!("failed copying {:?} to {:?}", src, dst_path))?;
    // flush before timestamps are applied, or a late write would bump mtime
    dst.flush()
        .await
        .with_context(|| format!("failed flushing {:?}", dst_path))?;
    Ok(bytes)
}

/// Carry the source timestamps over to the staged copy.
async fn preserve_times(
    src_metadata: std::fs::Metadata,
    dst: &std::path::Path,
) -> anyhow::Result<()> {
    let dst = dst.to_owned();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let atime = filetime::FileTime::from_last_access_time(&src_metadata);
        let mtime = filetime::FileTime::from_last_modification_time(&src_metadata);
        filetime::set_file_times(&dst, atime, mtime)
            .with_context(|| format!("failed setting timestamps for {:?}", &dst))?;
        Ok(())
    })
    .await?
}

/// Stage one source file: claim a timestamp-derived destination name, copy
/// contents and timestamps, then hand the staged path to the upload queue.
///
/// Returns an outcome in every case. The permit bounds how many files are in
/// the claim-through-copy steps at once; the queue hand-off happens after the
/// permit is released and suspends under backpressure, observing shutdown.
#[instrument(skip_all, fields(source = ?file.path))]
pub async fn stage_file(
    file: SourceFile,
    output_dir: &std::path::Path,
    semaphore: &tokio::sync::Semaphore,
    queue: &queue::Sender,
    counters: &Counters,
    shutdown: &ShutdownToken,
) -> Outcome {
    let result = stage(&file, output_dir, semaphore, queue, counters, shutdown).await;
    match &result {
        Ok(destination) => {
            tracing::debug!("staged {:?} as {:?}", &file.path, destination);
        }
        Err(StageError::Interrupted) => {
            tracing::debug!("skipped {:?}, shutdown requested", &file.path);
        }
        Err(StageError::Failed(error)) => {
            counters.copy_failed.inc();
            tracing::error!("staging {:?} failed: {:#}", &file.path, error);
        }
    }
    Outcome {
        source: file.path,
        result,
    }
}

async fn stage(
    file: &SourceFile,
    output_dir: &std::path::Path,
    semaphore: &tokio::sync::Semaphore,
    queue: &queue::Sender,
    counters: &Counters,
    shutdown: &ShutdownToken,
) -> Result<std::path::PathBuf, StageError> {
    if shutdown.is_triggered() {
        return Err(StageError::Interrupted);
    }
    let permit = tokio::select! {
        _ = shutdown.triggered() => return Err(StageError::Interrupted),
        permit = semaphore.acquire() => permit
            .context("copy permit pool closed")
            .map_err(StageError::Failed)?,
    };
    let src_metadata = tokio::fs::symlink_metadata(&file.path)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &file.path))?;
    let stem = timestamp_stem(file.modified);
    let (dst_path, mut dst) = claim_destination(output_dir, &stem, file.path.extension()).await?;
    let bytes = match copy_contents(&file.path, &dst_path, &mut dst).await {
        Ok(bytes) => bytes,
        Err(error) => {
            // don't leave a half-written claim behind
            drop(dst);
            let _ = tokio::fs::remove_file(&dst_path).await;
            return Err(error.into());
        }
    };
    drop(dst);
    preserve_times(src_metadata, &dst_path).await?;
    // copied is incremented before the hand-off so upload demand can never
    // outpace it
    counters.copied.inc();
    counters.bytes_copied.add(bytes);
    drop(permit);
    tokio::select! {
        _ = shutdown.triggered() => {
            tracing::debug!("shutdown while handing {:?} to upload", &dst_path);
        }
        result = queue.send(TransferItem::File(dst_path.clone())) => {
            if result.is_err() {
                tracing::debug!("upload queue closed before {:?} was enqueued", &dst_path);
            }
        }
    }
    Ok(dst_path)
}
