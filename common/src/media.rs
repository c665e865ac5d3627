//! Thin process-invocation collaborators around the pipeline: mounting and
//! ejecting the media, inspecting the mount table, launching the viewer and
//! prompting for the next disc.

use anyhow::Context;
use tracing::instrument;

use crate::shutdown::ShutdownToken;

/// The removable drive the discs are read from.
#[derive(Debug, Clone)]
pub struct DriveSettings {
    pub device: std::path::PathBuf,
    pub mount_point: std::path::PathBuf,
    /// Read speed passed to `eject -x`; pinning it down keeps the drive
    /// quiet during long rips.
    pub drive_speed: u32,
}

/// Non-error outcomes of a mount request. Media that is already mounted is a
/// success, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    Mounted,
    AlreadyMounted,
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("interrupted")]
    Interrupted,
    #[error("mounting {device:?} at {mount_point:?} failed: {detail}")]
    Failed {
        device: std::path::PathBuf,
        mount_point: std::path::PathBuf,
        detail: String,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Captured result of one external command.
#[derive(Debug)]
pub struct CommandResult {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run a program with a structured argument list and capture its output. No
/// shell is involved, so paths with quotes or metacharacters pass through
/// untouched.
pub async fn run_command<S: AsRef<std::ffi::OsStr>>(
    program: &str,
    args: &[S],
) -> anyhow::Result<CommandResult> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed invoking {program}"))?;
    Ok(CommandResult {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Structured check against the kernel mount table. Classifying mount state
/// from tool output would be fragile and locale-dependent; the table itself
/// is authoritative.
pub fn is_mounted(mount_point: &std::path::Path) -> anyhow::Result<bool> {
    let process = procfs::process::Process::myself().context("cannot access process info")?;
    let mounts = process.mountinfo().context("cannot read mount table")?;
    Ok(mounts
        .into_iter()
        .any(|entry| entry.mount_point == mount_point))
}

/// Mount the media, settling the drive first. Idempotent: already-mounted
/// media reports [`MountOutcome::AlreadyMounted`].
#[instrument(skip(shutdown))]
pub async fn mount_media(
    drive: &DriveSettings,
    shutdown: &ShutdownToken,
) -> Result<MountOutcome, MountError> {
    if shutdown.is_triggered() {
        return Err(MountError::Interrupted);
    }
    tokio::fs::create_dir_all(&drive.mount_point)
        .await
        .with_context(|| format!("cannot create mount point {:?}", &drive.mount_point))
        .map_err(MountError::Other)?;
    // close the tray and pin the read speed; best effort
    let speed = drive.drive_speed.to_string();
    if let Err(error) = run_command("sudo", &["eject", "-t", "-x", speed.as_str()]).await {
        tracing::debug!("drive settle command failed: {error:#}");
    }
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    if is_mounted(&drive.mount_point).map_err(MountError::Other)? {
        tracing::debug!("{:?} already mounted", &drive.mount_point);
        return Ok(MountOutcome::AlreadyMounted);
    }
    let result = run_command(
        "sudo",
        &[
            std::ffi::OsStr::new("mount"),
            drive.device.as_os_str(),
            drive.mount_point.as_os_str(),
        ],
    )
    .await
    .map_err(MountError::Other)?;
    if result.status.success() {
        // give the kernel a moment before trusting the table
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        if is_mounted(&drive.mount_point).map_err(MountError::Other)? {
            tracing::info!("mounted {:?} at {:?}", &drive.device, &drive.mount_point);
            return Ok(MountOutcome::Mounted);
        }
    }
    Err(MountError::Failed {
        device: drive.device.clone(),
        mount_point: drive.mount_point.clone(),
        detail: result.stderr.trim().to_string(),
    })
}

/// Unmount and eject the media. Returns whether the mount point is actually
/// free afterwards; command failures themselves are non-fatal.
#[instrument]
pub async fn unmount_media(drive: &DriveSettings) -> anyhow::Result<bool> {
    if let Err(error) = run_command(
        "sudo",
        &[std::ffi::OsStr::new("umount"), drive.mount_point.as_os_str()],
    )
    .await
    {
        tracing::debug!("umount command failed: {error:#}");
    }
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    if is_mounted(&drive.mount_point)? {
        tracing::warn!("{:?} is still mounted", &drive.mount_point);
        return Ok(false);
    }
    if let Err(error) = run_command("sudo", &["eject"]).await {
        tracing::debug!("eject command failed: {error:#}");
    }
    Ok(true)
}

/// Best-effort viewer launch over the staging directory; every failure is
/// ignored.
pub async fn launch_viewer(argv: &[String], dir: &std::path::Path) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    match tokio::process::Command::new(program)
        .args(args)
        .arg(dir)
        .output()
        .await
    {
        Ok(output) if !output.status.success() => {
            tracing::debug!("viewer exited with {}", output.status);
        }
        Ok(_) => {}
        Err(error) => tracing::debug!("failed launching viewer: {error}"),
    }
}

/// Blocking line read pushed onto the blocking pool, raced against shutdown.
/// Returns `None` on EOF or when shutdown wins the race.
pub async fn prompt_line(
    prompt: &str,
    shutdown: &ShutdownToken,
) -> anyhow::Result<Option<String>> {
    {
        use std::io::Write;
        let mut stderr = std::io::stderr();
        write!(stderr, "{prompt}").context("cannot write prompt")?;
        stderr.flush().context("cannot flush prompt")?;
    }
    let reader = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    });
    tokio::select! {
        _ = shutdown.triggered() => Ok(None),
        line = reader => Ok(line.context("stdin reader task failed")?),
    }
}
