use anyhow::Context;
use tracing::instrument;

use crate::progress::Counters;
use crate::queue::{Receiver, TransferItem};
use crate::shutdown::ShutdownToken;

/// How long a worker waits on an empty queue before re-checking shutdown;
/// also the worst-case latency for an idle worker to notice it.
pub const DEQUEUE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// External uploader invocation: a program plus leading arguments. The
/// staged file path is appended as its own argument per dispatch; no shell
/// is involved, so paths with quotes or metacharacters pass through intact.
#[derive(Debug, Clone)]
pub struct Uploader {
    pub program: String,
    pub args: Vec<String>,
}

impl Uploader {
    /// Parse "program arg arg ..." into a structured argv. Whitespace split
    /// only; no quoting or expansion is applied.
    pub fn from_command_line(command: &str) -> anyhow::Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .context("uploader command must not be empty")?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// One upload worker: drain the queue until a sentinel arrives, the channel
/// closes, or shutdown is observed. A single dispatch failure is counted and
/// the loop continues; it never terminates the worker.
#[instrument(skip_all, fields(worker = id))]
pub async fn worker(
    id: usize,
    queue: Receiver,
    semaphore: std::sync::Arc<tokio::sync::Semaphore>,
    uploader: Uploader,
    counters: std::sync::Arc<Counters>,
    shutdown: ShutdownToken,
) {
    loop {
        let path = match tokio::time::timeout(DEQUEUE_TIMEOUT, queue.recv()).await {
            // idle; the timeout exists so shutdown is noticed promptly
            Err(_elapsed) => {
                if shutdown.is_triggered() {
                    tracing::debug!("upload worker stopping, shutdown requested");
                    break;
                }
                continue;
            }
            Ok(Err(_closed)) => {
                tracing::debug!("upload queue closed, worker exiting");
                break;
            }
            Ok(Ok(TransferItem::Done)) => {
                tracing::debug!("upload worker received sentinel");
                break;
            }
            Ok(Ok(TransferItem::File(path))) => path,
        };
        if shutdown.is_triggered() {
            tracing::debug!("upload worker stopping before dispatching {:?}", &path);
            break;
        }
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_closed) => break,
        };
        dispatch(&uploader, &path, &counters).await;
    }
}

/// Invoke the uploader for one staged file. A nonzero exit is non-fatal --
/// the dominant real-world cause is the file already existing remotely --
/// and so is a failure to launch the uploader at all.
async fn dispatch(uploader: &Uploader, path: &std::path::Path, counters: &Counters) {
    let output = tokio::process::Command::new(&uploader.program)
        .args(&uploader.args)
        .arg(path)
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            counters.upload_succeeded.inc();
            tracing::debug!("uploaded {:?}", path);
        }
        Ok(output) => {
            counters.upload_failed.inc();
            tracing::debug!(
                "uploader exited with {} for {:?}: {}",
                output.status,
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Err(error) => {
            counters.upload_failed.inc();
            tracing::warn!("failed invoking uploader for {:?}: {}", path, error);
        }
    }
    counters.upload_attempted.inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use std::sync::Arc;

    fn uploader(program: &str) -> Uploader {
        Uploader {
            program: program.to_string(),
            args: vec![],
        }
    }

    async fn run_worker(
        items: Vec<TransferItem>,
        program: &str,
        shutdown: ShutdownToken,
    ) -> Arc<Counters> {
        let (tx, rx) = queue::bounded(queue::DEFAULT_CAPACITY);
        for item in items {
            tx.send(item).await.unwrap();
        }
        drop(tx);
        let counters = Arc::new(Counters::new());
        worker(
            0,
            rx,
            Arc::new(tokio::sync::Semaphore::new(10)),
            uploader(program),
            Arc::clone(&counters),
            shutdown,
        )
        .await;
        counters
    }

    #[test]
    fn command_line_parses_into_argv() {
        let uploader = Uploader::from_command_line("immich upload").unwrap();
        assert_eq!(uploader.program, "immich");
        assert_eq!(uploader.args, ["upload"]);
        assert!(Uploader::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn successful_dispatches_are_counted() {
        let items = vec![
            TransferItem::File("a".into()),
            TransferItem::File("b".into()),
            TransferItem::File("c".into()),
            TransferItem::Done,
        ];
        let counters = run_worker(items, "true", ShutdownToken::new()).await;
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.upload_succeeded, 3);
        assert_eq!(snapshot.upload_failed, 0);
        assert_eq!(snapshot.upload_attempted, 3);
    }

    #[tokio::test]
    async fn nonzero_exit_is_nonfatal_and_counted() {
        let items = vec![
            TransferItem::File("a".into()),
            TransferItem::File("b".into()),
            TransferItem::Done,
        ];
        let counters = run_worker(items, "false", ShutdownToken::new()).await;
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.upload_succeeded, 0);
        assert_eq!(snapshot.upload_failed, 2);
        assert_eq!(snapshot.upload_attempted, 2);
    }

    #[tokio::test]
    async fn unlaunchable_uploader_is_nonfatal_and_counted() {
        let items = vec![TransferItem::File("a".into()), TransferItem::Done];
        let counters = run_worker(
            items,
            "/definitely/not/an/uploader",
            ShutdownToken::new(),
        )
        .await;
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.upload_failed, 1);
        assert_eq!(snapshot.upload_attempted, 1);
    }

    #[tokio::test]
    async fn sentinel_stops_worker_before_later_items() {
        let items = vec![TransferItem::Done, TransferItem::File("late".into())];
        let counters = run_worker(items, "true", ShutdownToken::new()).await;
        assert_eq!(counters.snapshot().upload_attempted, 0);
    }

    #[tokio::test]
    async fn pre_triggered_shutdown_dispatches_nothing() {
        let shutdown = ShutdownToken::new();
        shutdown.trigger();
        let items = vec![TransferItem::File("a".into())];
        let counters = run_worker(items, "true", shutdown).await;
        assert_eq!(counters.snapshot().upload_attempted, 0);
    }

    #[tokio::test]
    async fn idle_worker_notices_shutdown_within_timeout() {
        let (tx, rx) = queue::bounded(queue::DEFAULT_CAPACITY);
        let shutdown = ShutdownToken::new();
        let counters = Arc::new(Counters::new());
        let handle = {
            let shutdown = shutdown.clone();
            let counters = Arc::clone(&counters);
            tokio::spawn(worker(
                0,
                rx,
                Arc::new(tokio::sync::Semaphore::new(1)),
                uploader("true"),
                counters,
                shutdown,
            ))
        };
        shutdown.trigger();
        tokio::time::timeout(DEQUEUE_TIMEOUT * 3, handle)
            .await
            .expect("worker should stop within the dequeue timeout")
            .unwrap();
        drop(tx);
    }
}
