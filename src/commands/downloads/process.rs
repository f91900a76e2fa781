//! Runs the download tool to completion while remembering its latest progress line.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, warn};

use super::DownloadError;

/// The most recent progress line, shared between the reader and whoever renders it.
pub type ProgressSlot = Arc<Mutex<Option<String>>>;

/// The last line of `chunk` that contains a percentage, trimmed.
pub fn progress_line(chunk: &str) -> Option<&str> {
    chunk
        .split(['\r', '\n'])
        .filter(|line| line.contains('%'))
        .map(str::trim)
        .last()
}

/// Spawns `command`, feeds progress lines into `progress` and waits for the exit.
/// Killed once it outlives `timeout`. Any non-zero exit is an error.
pub async fn run_with_progress(
    mut command: Command,
    timeout: Duration,
    progress: ProgressSlot,
) -> Result<(), DownloadError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| DownloadError::Spawn(e.to_string()))?;

    let stdout = child.stdout.take();
    let reader = tokio::spawn(async move {
        let Some(stdout) = stdout else {
            return;
        };
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(found) = progress_line(&line) {
                        *progress.lock() = Some(found.to_string());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Stopped reading download output: {}", e);
                    break;
                }
            }
        }
    });

    let stderr = child.stderr.take();
    let stderr_reader = tokio::spawn(async move {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_string(&mut text).await {
                debug!("Stopped reading download errors: {}", e);
            }
        }
        text
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.map_err(|e| DownloadError::Io(e.to_string()))?,
        Err(_) => {
            warn!("Download exceeded {:?}, killing it", timeout);
            if let Err(e) = child.kill().await {
                error!("Failed to kill timed out download: {}", e);
            }
            reader.abort();
            stderr_reader.abort();
            return Err(DownloadError::TimedOut(timeout));
        }
    };

    if let Err(e) = reader.await {
        debug!("Download output reader ended abnormally: {}", e);
    }
    let stderr_text = stderr_reader.await.unwrap_or_default();

    if status.success() {
        return Ok(());
    }
    error!(
        "Download tool exited with {:?}: {}",
        status.code(),
        stderr_text.trim()
    );
    Err(DownloadError::NonZeroExit(status.code()))
}
