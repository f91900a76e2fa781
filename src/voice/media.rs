//! The download tool run in streaming mode, with its stdout treated as an audio
//! stream whose lifetime is bound to the playback that reads it.

use std::ffi::OsString;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use songbird::input::{AudioStream, Input, LiveInput};
use symphonia::core::io::{MediaSource, ReadOnlySource};
use symphonia::core::probe::Hint;
use tracing::{debug, error, info, warn};

use super::transport::PlaybackObserver;
use super::{VoiceError, VoiceResult};
use crate::config::MediaConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const END_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long a finished stream waits for the download tool's exit status.
pub const END_GRACE: Duration = Duration::from_secs(5);

/// Arguments that make yt-dlp write the best audio-only format to stdout.
pub fn streaming_args(media: &MediaConfig, url: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        url.into(),
        "-f".into(),
        "bestaudio[ext=webm][acodec=opus]/bestaudio".into(),
        "-o".into(),
        "-".into(),
        "--no-playlist".into(),
        "--quiet".into(),
        "--no-warnings".into(),
    ];
    if let Some(extractor) = media.extractor_args() {
        args.extend(extractor.into_iter().map(OsString::from));
    }
    args.push("--ffmpeg-location".into());
    args.push(media.ffmpeg_path.clone().into_os_string());
    args
}

/// A running download-tool child. Killed on `kill`, on drop, and once it outlives
/// the configured process timeout.
pub struct MediaProcess {
    exit: ProcessExit,
    stdout: Option<ChildStdout>,
}

impl MediaProcess {
    /// Spawns the tool for `url` and starts watching its exit status. A non-zero
    /// exit that was not caused by `kill` is reported to `observer` as a failure.
    pub fn spawn(
        media: &MediaConfig,
        url: &str,
        observer: Arc<dyn PlaybackObserver>,
    ) -> VoiceResult<Self> {
        Self::spawn_command(
            Command::new(&media.ytdlp_path),
            streaming_args(media, url),
            media.process_timeout,
            observer,
        )
    }

    pub(crate) fn spawn_command(
        mut command: Command,
        args: Vec<OsString>,
        timeout: Duration,
        observer: Arc<dyn PlaybackObserver>,
    ) -> VoiceResult<Self> {
        let mut child = command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn media process: {}", e);
                VoiceError::MediaProcess(format!("could not start the download tool: {}", e))
            })?;

        info!("Spawned media process {}", child.id());
        let stdout = child.stdout.take();
        let exit = ProcessExit {
            child: Arc::new(Mutex::new(child)),
            killed: Arc::new(AtomicBool::new(false)),
            reported: Arc::new(AtomicBool::new(false)),
        };

        tokio::spawn(watch(exit.clone(), timeout, observer));

        Ok(Self { exit, stdout })
    }

    /// Hands the process's stdout to the audio pipeline. Only the first call
    /// returns a stream.
    pub fn take_input(&mut self) -> Option<Input> {
        let stdout = self.stdout.take()?;
        let mut hint = Hint::new();
        hint.with_extension("webm");

        let stream: Box<dyn MediaSource> = Box::new(ReadOnlySource::new(stdout));
        Some(Input::Live(
            LiveInput::Raw(AudioStream {
                input: stream,
                hint: Some(hint),
            }),
            None,
        ))
    }

    /// A handle on the child's exit status that outlives this process value.
    pub fn exit(&self) -> ProcessExit {
        self.exit.clone()
    }

    pub fn kill(&self) {
        self.exit.kill();
    }

    #[cfg(test)]
    fn is_killed(&self) -> bool {
        self.exit.killed.load(Ordering::Acquire)
    }
}

impl Drop for MediaProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Debug)]
enum ExitState {
    Running,
    Clean,
    Killed,
    Failed(String),
}

/// Shared view of a media child's exit. At most one outcome is ever reported
/// through it, whichever of the watcher and the track end gets there first.
#[derive(Clone)]
pub struct ProcessExit {
    child: Arc<Mutex<Child>>,
    killed: Arc<AtomicBool>,
    reported: Arc<AtomicBool>,
}

impl ProcessExit {
    fn state(&self) -> ExitState {
        if self.killed.load(Ordering::Acquire) {
            return ExitState::Killed;
        }
        let status = self.child.lock().try_wait();
        match status {
            Ok(Some(_)) if self.killed.load(Ordering::Acquire) => ExitState::Killed,
            Ok(Some(status)) if status.success() => ExitState::Clean,
            Ok(Some(status)) => {
                ExitState::Failed(format!("the download tool exited with {}", status))
            }
            Ok(None) => ExitState::Running,
            Err(e) => ExitState::Failed(format!("lost track of the download tool: {}", e)),
        }
    }

    fn report_failure(&self, observer: &Arc<dyn PlaybackObserver>, description: String) {
        if !self.reported.swap(true, Ordering::AcqRel) {
            observer.failed(description);
        }
    }

    fn report_finished(&self, observer: &Arc<dyn PlaybackObserver>) {
        if !self.reported.swap(true, Ordering::AcqRel) {
            observer.finished();
        }
    }

    /// Reports a decoder error unless the exit was already reported.
    pub fn playback_failed(&self, observer: &Arc<dyn PlaybackObserver>, description: String) {
        self.report_failure(observer, description);
    }

    /// Called once the audio stream has ended. Waits up to `grace` for the
    /// child's exit status, so a crash that closed stdout is reported as a
    /// failure instead of a finish. A child still running after `grace` counts
    /// as finished.
    pub async fn stream_ended(&self, observer: Arc<dyn PlaybackObserver>, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            match self.state() {
                ExitState::Running if Instant::now() < deadline => {
                    tokio::time::sleep(END_POLL_INTERVAL).await;
                }
                ExitState::Failed(description) => {
                    error!("Media stream ended with a failed process: {}", description);
                    self.report_failure(&observer, description);
                    return;
                }
                state => {
                    debug!("Media stream ended, process {:?}", state);
                    self.report_finished(&observer);
                    return;
                }
            }
        }
    }

    fn kill(&self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut child = self.child.lock();
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill media process {}: {}", child.id(), e);
                }
                // Reap so the pid is not left as a zombie.
                let _ = child.wait();
                debug!("Killed media process {}", child.id());
            }
        }
    }
}

async fn watch(exit: ProcessExit, timeout: Duration, observer: Arc<dyn PlaybackObserver>) {
    let started = Instant::now();
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        match exit.state() {
            ExitState::Killed => return,
            ExitState::Clean => {
                debug!("Media process exited cleanly");
                return;
            }
            ExitState::Failed(description) => {
                error!("Media process failed: {}", description);
                exit.report_failure(&observer, description);
                return;
            }
            ExitState::Running if started.elapsed() >= timeout => {
                warn!("Media process exceeded {:?}, killing it", timeout);
                exit.report_failure(&observer, "the download tool timed out".to_string());
                exit.kill();
                return;
            }
            ExitState::Running => {}
        }
    }
}
