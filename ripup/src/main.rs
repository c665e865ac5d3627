use anyhow::Result;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ripup",
    version,
    about = "Ingest photo discs into a staging directory and upload them to a photo service",
    long_about = "`ripup` rips photos off removable media (CDs of scanned photos, mostly) into a
local staging directory under timestamp-derived names, then hands each staged
file to an external uploader - all concurrently, with live progress and a
clean stop on Ctrl-C.

The tool loops over discs: insert one, press Enter, watch it rip and upload,
swap discs, repeat; 'q' quits.

EXAMPLES:
    # Ingest discs with progress bars and a final summary
    ripup --progress --summary

    # A different drive, staging directory and uploader
    ripup --device /dev/sr1 --output ~/staging --uploader \"immich upload\"

    # Keep the staged copies instead of deleting them after upload
    ripup --keep-staged --progress"
)]
struct Args {
    // Media options
    /// Block device holding the disc
    #[arg(
        long,
        default_value = "/dev/cdrom",
        value_name = "PATH",
        help_heading = "Media options"
    )]
    device: std::path::PathBuf,

    /// Where the disc gets mounted
    #[arg(
        long,
        default_value = "/mnt/cdrom",
        value_name = "PATH",
        help_heading = "Media options"
    )]
    mount_point: std::path::PathBuf,

    /// Directory on the disc to ingest, relative to the mount point
    #[arg(
        long,
        default_value = "Pictures",
        value_name = "PATH",
        help_heading = "Media options"
    )]
    source_dir: std::path::PathBuf,

    /// Drive read speed passed to `eject -x`
    #[arg(
        long,
        default_value = "48",
        value_name = "N",
        help_heading = "Media options"
    )]
    drive_speed: u32,

    // Staging & upload
    /// Local staging directory for the renamed copies
    #[arg(
        short,
        long,
        default_value = "./out",
        value_name = "PATH",
        help_heading = "Staging & upload"
    )]
    output: std::path::PathBuf,

    /// Maximum number of concurrent file copies
    #[arg(
        long,
        default_value = "10",
        value_name = "N",
        help_heading = "Staging & upload"
    )]
    copy_concurrency: usize,

    /// Maximum number of concurrent upload dispatches
    #[arg(
        long,
        default_value = "10",
        value_name = "N",
        help_heading = "Staging & upload"
    )]
    upload_concurrency: usize,

    /// Capacity of the copy-to-upload hand-off queue
    ///
    /// Copies stall once this many staged files are waiting on upload, which
    /// caps how far staging can run ahead of the uploader.
    #[arg(
        long,
        default_value = "50",
        value_name = "N",
        help_heading = "Staging & upload"
    )]
    queue_capacity: usize,

    /// Uploader command (program plus arguments, whitespace separated)
    ///
    /// The staged file path is appended as its own argument per invocation;
    /// no shell is involved. A nonzero exit is treated as
    /// failed-or-duplicate, not fatal.
    #[arg(
        long,
        default_value = "immich upload",
        value_name = "CMD",
        help_heading = "Staging & upload"
    )]
    uploader: String,

    /// Viewer launched over the staging directory after each disc
    ///
    /// Failures are ignored. Pass an empty string to disable.
    #[arg(
        long,
        default_value = "imv",
        value_name = "CMD",
        help_heading = "Staging & upload"
    )]
    viewer: String,

    /// Keep staged files after upload instead of deleting them
    #[arg(long, help_heading = "Staging & upload")]
    keep_staged: bool,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Set the type of progress display
    ///
    /// If specified, --progress flag is implied.
    #[arg(long, value_name = "TYPE", help_heading = "Progress & output")]
    progress_type: Option<common::ProgressType>,

    /// Set delay between progress updates
    ///
    /// Default is 100ms for interactive mode (`ProgressBar`) and 10s for
    /// non-interactive mode (`TextUpdates`). If specified, --progress flag is
    /// implied. Accepts human-readable durations like "200ms", "10s".
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

fn progress_settings(args: &Args) -> Result<Option<common::ProgressSettings>> {
    if !(args.progress || args.progress_type.is_some() || args.progress_delay.is_some()) {
        return Ok(None);
    }
    let delay = args
        .progress_delay
        .as_deref()
        .map(common::progress::parse_delay)
        .transpose()?;
    Ok(Some(common::ProgressSettings {
        progress_type: args.progress_type.unwrap_or_default(),
        delay,
    }))
}

fn print_report(summary: &common::pipeline::Summary) {
    println!("{}", "=".repeat(70));
    println!("Summary:");
    println!("  Files found: {}", summary.files_found);
    println!("  Successfully copied: {}", summary.copied);
    println!("  Copy errors: {}", summary.copy_failed);
    if summary.skipped > 0 {
        println!("  Skipped (interrupted): {}", summary.skipped);
    }
    println!("  Successfully uploaded: {}", summary.upload_succeeded);
    println!("  Failed or duplicate uploads: {}", summary.upload_failed);
    println!("{}", "=".repeat(70));
    if !summary.errors.is_empty() {
        println!(
            "\nCopy errors (first {}):",
            common::pipeline::REPORTED_ERRORS.min(summary.errors.len())
        );
        for (path, error) in summary.errors.iter().take(common::pipeline::REPORTED_ERRORS) {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            println!("  {name}: {error}");
        }
    }
}

#[instrument(skip(args))]
async fn async_main(args: Args) -> Result<common::pipeline::Summary> {
    let shutdown = common::shutdown::ShutdownToken::new();
    shutdown.listen_for_signals();

    let uploader = common::upload::Uploader::from_command_line(&args.uploader)?;
    let viewer: Vec<String> = args.viewer.split_whitespace().map(str::to_string).collect();
    let settings = common::pipeline::Settings {
        copy_concurrency: args.copy_concurrency,
        upload_concurrency: args.upload_concurrency,
        queue_capacity: args.queue_capacity,
        uploader,
        progress: progress_settings(&args)?,
    };
    settings.validate().map_err(anyhow::Error::msg)?;
    let drive = common::media::DriveSettings {
        device: args.device.clone(),
        mount_point: args.mount_point.clone(),
        drive_speed: args.drive_speed,
    };

    // free the drive of any stale disc before the first prompt
    if let Err(error) = common::media::unmount_media(&drive).await {
        tracing::warn!("initial unmount failed: {error:#}");
    }

    let mut totals = common::pipeline::Summary::default();
    while !shutdown.is_triggered() {
        let line = common::media::prompt_line(
            "\nInsert disc and press Enter ('q' to quit): ",
            &shutdown,
        )
        .await?;
        let Some(line) = line else {
            break;
        };
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }

        match common::media::mount_media(&drive, &shutdown).await {
            Ok(common::media::MountOutcome::AlreadyMounted) => println!("Already mounted"),
            Ok(common::media::MountOutcome::Mounted) => {
                println!("Mounted {}", drive.mount_point.display());
            }
            Err(common::media::MountError::Interrupted) => break,
            Err(error) => {
                // surfaced, not fatal; the next disc may fare better
                eprintln!("ripup: {error:#}");
                continue;
            }
        }

        let root = drive.mount_point.join(&args.source_dir);
        print!("Scanning files...");
        {
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
        let files = common::scan::scan(&root, &shutdown).await;
        println!(" found {}", files.len());

        let summary = common::pipeline::run(files, &args.output, &settings, &shutdown).await?;
        print_report(&summary);

        if summary.copied > 0 && !viewer.is_empty() {
            common::media::launch_viewer(&viewer, &args.output).await;
        }

        if summary.upload_succeeded > 0 && !args.keep_staged {
            match common::pipeline::remove_staged(&args.output).await {
                Ok(removed) => println!("Removed {removed} staged files"),
                Err(error) => tracing::warn!("failed cleaning staging directory: {error:#}"),
            }
        }

        totals = totals + summary;

        if let Err(error) = common::media::unmount_media(&drive).await {
            eprintln!("ripup: unmount failed: {error:#}");
        }
    }
    Ok(totals)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(&output, &runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
