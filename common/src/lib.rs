//! Core library for `ripup`: scanning removable media, staging photos under
//! timestamp-derived names, dispatching them to an external uploader, and
//! the progress/cancellation machinery tying it together.

pub mod config;
pub mod copy;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod scan;
pub mod shutdown;
pub mod upload;

#[cfg(test)]
pub mod testutils;

pub use config::{OutputConfig, RuntimeConfig};
pub use progress::{ProgressSettings, ProgressType};

fn init_tracing(output: &OutputConfig) {
    let level = if output.quiet {
        "off"
    } else {
        match output.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // try_init so tests installing their own subscriber don't panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Set up tracing, build the tokio runtime and drive `func` to completion.
///
/// Returns `None` when the operation failed, after printing a diagnostic
/// (unless quiet); callers translate that into a nonzero exit status.
pub fn run<F, Fut, S>(output: &OutputConfig, runtime: &RuntimeConfig, func: F) -> Option<S>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<S>>,
    S: std::fmt::Display,
{
    init_tracing(output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            eprintln!("ripup: failed to start runtime: {error:#}");
            return None;
        }
    };
    match rt.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("ripup: {error:#}");
            }
            None
        }
    }
}
