//! Saving remote media and npm packages to the bot's data directories.

pub mod npm;
pub mod process;

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use poise::{CreateReply, ReplyHandle};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

use self::process::{ProgressSlot, run_with_progress};
use crate::config::{BotConfig, MediaConfig};
use crate::utils::urls::is_http_url;
use crate::voice::source::is_plain_file_name;
use crate::{CommandResult, Context};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Failed to start the download tool: {0}")]
    Spawn(String),

    #[error("The download tool exited with status {0:?}")]
    NonZeroExit(Option<i32>),

    #[error("The download did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("I/O error while downloading: {0}")]
    Io(String),
}

/// The three download-tool flavours, each saving into its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    File,
    Video,
    Audio,
}

impl DownloadKind {
    fn noun(&self) -> &'static str {
        match self {
            DownloadKind::File => "File",
            DownloadKind::Video => "Video",
            DownloadKind::Audio => "Audio",
        }
    }

    pub fn target_dir<'a>(&self, config: &'a BotConfig) -> &'a Path {
        match self {
            DownloadKind::File => &config.downloads_dir,
            DownloadKind::Video => &config.videos_dir,
            DownloadKind::Audio => &config.soundboard_dir,
        }
    }

    /// Extension appended to a custom name that has none.
    fn default_extension(&self) -> Option<&'static str> {
        match self {
            DownloadKind::File => None,
            DownloadKind::Video => Some("mp4"),
            DownloadKind::Audio => Some("mp3"),
        }
    }

    fn format_args(&self) -> &'static [&'static str] {
        match self {
            DownloadKind::File => &[],
            DownloadKind::Video => &[
                "-f",
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
                "--merge-output-format",
                "mp4",
            ],
            DownloadKind::Audio => &["-f", "bestaudio", "-x", "--audio-format", "mp3"],
        }
    }

    pub fn start_message(&self, url: &str) -> String {
        match self {
            DownloadKind::File => format!("Starting download from `{}`...", url),
            DownloadKind::Video => format!("Starting video download from `{}`...", url),
            DownloadKind::Audio => format!("Starting audio download from `{}`...", url),
        }
    }

    pub fn success_message(&self, dir: &Path) -> String {
        format!(
            "✅ {} downloaded successfully to `{}`!",
            self.noun(),
            dir.display()
        )
    }

    pub fn failure_message(&self) -> String {
        format!(
            "Failed to download {}. The URL might be invalid or unsupported. Check the console for more details.",
            self.noun().to_lowercase()
        )
    }
}

/// Where the tool should write. Without a name the tool names the file after the
/// media title.
pub fn output_target(kind: DownloadKind, dir: &Path, name: Option<&str>) -> PathBuf {
    match name {
        Some(name) => {
            let has_extension = Path::new(name).extension().is_some();
            match kind.default_extension() {
                Some(ext) if !has_extension => dir.join(format!("{}.{}", name, ext)),
                _ => dir.join(name),
            }
        }
        None => dir.join("%(title)s.%(ext)s"),
    }
}

pub fn download_args(
    kind: DownloadKind,
    media: &MediaConfig,
    url: &str,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![url.into()];
    args.extend(kind.format_args().iter().map(OsString::from));
    args.push("-o".into());
    args.push(output.as_os_str().to_os_string());
    args.extend(
        [
            "--restrict-filenames",
            "--no-playlist",
            "--progress",
            "--newline",
            "--quiet",
            "--no-warnings",
        ]
        .iter()
        .map(OsString::from),
    );
    if let Some(extractor) = media.extractor_args() {
        args.extend(extractor.into_iter().map(OsString::from));
    }
    args.push("--ffmpeg-location".into());
    args.push(media.ffmpeg_path.clone().into_os_string());
    args
}

async fn edit_progress(ctx: Context<'_>, handle: &ReplyHandle<'_>, content: String) {
    if let Err(e) = handle
        .edit(ctx, CreateReply::default().content(content))
        .await
    {
        debug!("Could not update download progress: {}", e);
    }
}

/// Awaits `run`, editing `handle` with the newest line in `progress` every
/// couple of seconds.
async fn drive_progress<T, E>(
    ctx: Context<'_>,
    handle: &ReplyHandle<'_>,
    progress: ProgressSlot,
    run: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    tokio::pin!(run);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.tick().await;
    let mut shown: Option<String> = None;

    loop {
        tokio::select! {
            result = &mut run => return result,
            _ = ticker.tick() => {
                let latest = progress.lock().clone();
                if latest.is_some() && latest != shown {
                    if let Some(line) = &latest {
                        edit_progress(ctx, handle, format!("Downloading: `{}`", line)).await;
                    }
                    shown = latest;
                }
            }
        }
    }
}

/// Runs one download-tool invocation with progress edits.
async fn drive_download(
    ctx: Context<'_>,
    handle: &ReplyHandle<'_>,
    command: Command,
    timeout: Duration,
) -> Result<(), DownloadError> {
    let progress = ProgressSlot::default();
    let run = run_with_progress(command, timeout, progress.clone());
    drive_progress(ctx, handle, progress, run).await
}

async fn run_download(
    ctx: Context<'_>,
    kind: DownloadKind,
    url: Option<String>,
    name: Option<String>,
) -> CommandResult {
    let Some(url) = url.filter(|u| is_http_url(u)) else {
        let prompt = match kind {
            DownloadKind::File => "Please provide a file URL to download.",
            DownloadKind::Video => "Please provide a YouTube URL to download.",
            DownloadKind::Audio => "Please provide a YouTube URL to download audio from.",
        };
        ctx.say(prompt).await?;
        return Ok(());
    };
    let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if let Some(name) = &name {
        if !is_plain_file_name(name) {
            ctx.say(format!("Invalid file name `{}`.", name)).await?;
            return Ok(());
        }
    }

    let config = ctx.data().config.clone();
    let dir = kind.target_dir(&config);
    let output = output_target(kind, dir, name.as_deref());

    let mut command = Command::new(&config.media.ytdlp_path);
    command.args(download_args(kind, &config.media, &url, &output));

    info!("{} started a {:?} download of {}", ctx.author().tag(), kind, url);
    let handle = ctx.say(kind.start_message(&url)).await?;

    match drive_download(ctx, &handle, command, config.download_timeout).await {
        Ok(()) => {
            info!("Downloaded {} into {}", url, dir.display());
            edit_progress(ctx, &handle, kind.success_message(dir)).await;
        }
        Err(e) => {
            error!("Error downloading {}: {}", url, e);
            edit_progress(ctx, &handle, kind.failure_message()).await;
        }
    }
    Ok(())
}

/// Download a file from a URL into the downloads directory
#[poise::command(
    prefix_command,
    slash_command,
    category = "Downloads",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn download(
    ctx: Context<'_>,
    #[description = "URL to download"] url: Option<String>,
    #[description = "Optional file name"]
    #[rest]
    name: Option<String>,
) -> CommandResult {
    run_download(ctx, DownloadKind::File, url, name).await
}

/// Download a video as mp4 into the videos directory
#[poise::command(
    prefix_command,
    slash_command,
    category = "Downloads",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn downloadvideo(
    ctx: Context<'_>,
    #[description = "Video URL"] url: Option<String>,
    #[description = "Optional file name"]
    #[rest]
    name: Option<String>,
) -> CommandResult {
    run_download(ctx, DownloadKind::Video, url, name).await
}

/// Download a video's audio as mp3 into the soundboard directory
#[poise::command(
    prefix_command,
    slash_command,
    category = "Downloads",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn downloadsound(
    ctx: Context<'_>,
    #[description = "Video URL"] url: Option<String>,
    #[description = "Optional file name"]
    #[rest]
    name: Option<String>,
) -> CommandResult {
    run_download(ctx, DownloadKind::Audio, url, name).await
}

/// Download the latest tarball of an npm package
#[poise::command(
    prefix_command,
    slash_command,
    category = "Downloads",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn npmdownload(
    ctx: Context<'_>,
    #[description = "Package name, e.g. left-pad or @types/node"] package: Option<String>,
) -> CommandResult {
    let Some(package) = package.filter(|p| !p.trim().is_empty()) else {
        ctx.say("Please provide an npm package name to download.")
            .await?;
        return Ok(());
    };
    let config = ctx.data().config.clone();
    let client = ctx.data().http_client.clone();

    let release = match npm::fetch_latest(&client, &config.npm_registry_url, &package).await {
        Ok(release) => release,
        Err(e) => {
            error!("Error in npmdownload for {}: {}", package, e);
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    let handle = ctx
        .say(format!(
            "Starting download for `{}@{}` from npm...",
            release.package, release.version
        ))
        .await?;

    let progress = ProgressSlot::default();
    let run = npm::download_tarball(&client, &release, &config.downloads_dir, progress.clone());
    match drive_progress(ctx, &handle, progress, run).await {
        Ok(_) => {
            edit_progress(
                ctx,
                &handle,
                format!(
                    "✅ Package `{}@{}` downloaded successfully to `{}`!",
                    release.package,
                    release.version,
                    config.downloads_dir.display()
                ),
            )
            .await;
        }
        Err(e) => {
            error!("Error downloading {}: {}", release.tarball_url, e);
            edit_progress(ctx, &handle, e.to_string()).await;
        }
    }
    Ok(())
}
