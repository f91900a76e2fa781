//! Runtime configuration, read from the process environment (and `.env` via `dotenv`).

use std::env;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while reading configuration or validating the host environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Required executable not found at {0}")]
    ExecutableMissing(PathBuf),

    #[error("Failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything the bot needs to know about its host.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub application_id: u64,
    pub prefix: String,
    pub media: MediaConfig,
    pub soundboard_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub plugin_dir: PathBuf,
    pub npm_registry_url: String,
    pub download_timeout: Duration,
    pub update_pull_command: Vec<String>,
    pub update_install_command: Vec<String>,
}

/// Paths and limits for the external media tools.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub po_token: Option<String>,
    /// Hard limit on the lifetime of a streaming download-tool process.
    pub process_timeout: Duration,
}

impl MediaConfig {
    /// The `--extractor-args` pair for YouTube, when a PO token is configured.
    pub fn extractor_args(&self) -> Option<[String; 2]> {
        self.po_token.as_ref().map(|token| {
            [
                "--extractor-args".to_string(),
                format!("youtube:po_token={}", token),
            ]
        })
    }
}

impl BotConfig {
    /// Builds the configuration from environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. `from_env` is the
    /// production entry point; this exists so the parsing can run without
    /// touching the real environment.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let application_id = lookup("DISCORD_APPLICATION_ID")
            .ok_or(ConfigError::Missing("DISCORD_APPLICATION_ID"))?
            .trim()
            .parse::<NonZeroU64>()
            .map_err(|e| ConfigError::Invalid {
                name: "DISCORD_APPLICATION_ID",
                reason: e.to_string(),
            })?
            .get();

        let path_or = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };

        let media = MediaConfig {
            ytdlp_path: path_or("YTDLP_PATH", "./yt-dlp"),
            ffmpeg_path: path_or("FFMPEG_PATH", "/usr/bin/ffmpeg"),
            po_token: lookup("YOUTUBE_PO_TOKEN").filter(|t| !t.trim().is_empty()),
            process_timeout: parse_duration_var(
                "MEDIA_PROCESS_TIMEOUT",
                lookup("MEDIA_PROCESS_TIMEOUT"),
                Duration::from_secs(3 * 60 * 60),
            )?,
        };

        let config = Self {
            token,
            application_id,
            prefix: lookup("COMMAND_PREFIX").unwrap_or_else(|| "!".to_string()),
            media,
            soundboard_dir: path_or("SOUNDBOARD_DIR", "soundboard_clips"),
            videos_dir: path_or("VIDEOS_DIR", "videos"),
            downloads_dir: path_or("DOWNLOADS_DIR", "downloads"),
            plugin_dir: path_or("PLUGIN_DIR", "plugins"),
            npm_registry_url: lookup("NPM_REGISTRY_URL")
                .unwrap_or_else(|| "https://registry.npmjs.org".to_string()),
            download_timeout: parse_duration_var(
                "DOWNLOAD_TIMEOUT",
                lookup("DOWNLOAD_TIMEOUT"),
                Duration::from_secs(30 * 60),
            )?,
            update_pull_command: parse_command_var(
                "UPDATE_PULL_COMMAND",
                lookup("UPDATE_PULL_COMMAND"),
                "git pull",
            )?,
            update_install_command: parse_command_var(
                "UPDATE_INSTALL_COMMAND",
                lookup("UPDATE_INSTALL_COMMAND"),
                "cargo build --release",
            )?,
        };

        debug!("Loaded configuration: {:?}", config.redacted());
        Ok(config)
    }

    /// A copy safe to log.
    fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.token = "<redacted>".to_string();
        copy.media.po_token = copy.media.po_token.as_ref().map(|_| "<redacted>".to_string());
        copy
    }

    /// Creates the data directories that do not exist yet.
    pub fn ensure_directories(&self) -> ConfigResult<()> {
        for dir in [
            &self.soundboard_dir,
            &self.videos_dir,
            &self.downloads_dir,
            &self.plugin_dir,
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|source| ConfigError::Directory {
                    path: dir.clone(),
                    source,
                })?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }

    /// Checks that both media executables exist on disk.
    pub fn verify_executables(&self) -> ConfigResult<()> {
        for path in [&self.media.ytdlp_path, &self.media.ffmpeg_path] {
            require_file(path)?;
            info!("Found executable at {}", path.display());
        }
        Ok(())
    }
}

fn require_file(path: &Path) -> ConfigResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::ExecutableMissing(path.to_path_buf()))
    }
}

fn parse_duration_var(
    name: &'static str,
    raw: Option<String>,
    default: Duration,
) -> ConfigResult<Duration> {
    match raw {
        None => Ok(default),
        Some(value) => humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn parse_command_var(
    name: &'static str,
    raw: Option<String>,
    default: &str,
) -> ConfigResult<Vec<String>> {
    let raw = raw.unwrap_or_else(|| default.to_string());
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            reason: "command must not be empty".to_string(),
        });
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = BotConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_APPLICATION_ID", "1424495596923916288"),
        ]))
        .unwrap();

        assert_eq!(config.prefix, "!");
        assert_eq!(config.application_id, 1424495596923916288);
        assert_eq!(config.plugin_dir, PathBuf::from("plugins"));
        assert_eq!(config.media.process_timeout, Duration::from_secs(10800));
        assert_eq!(config.update_pull_command, vec!["git", "pull"]);
        assert!(config.media.extractor_args().is_none());
    }

    #[test]
    fn test_missing_token() {
        let result = BotConfig::from_lookup(lookup_from(&[("DISCORD_APPLICATION_ID", "1")]));
        assert_matches!(result, Err(ConfigError::Missing("DISCORD_TOKEN")));
    }

    #[test]
    fn test_non_numeric_application_id() {
        let result = BotConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_APPLICATION_ID", "my-bot"),
        ]));
        assert_matches!(
            result,
            Err(ConfigError::Invalid {
                name: "DISCORD_APPLICATION_ID",
                ..
            })
        );
    }

    #[test]
    fn test_zero_application_id_rejected() {
        let result = BotConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_APPLICATION_ID", "0"),
        ]));
        assert_matches!(result, Err(ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_overrides_and_po_token() {
        let config = BotConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_APPLICATION_ID", "7"),
            ("COMMAND_PREFIX", "?"),
            ("MEDIA_PROCESS_TIMEOUT", "15m"),
            ("YOUTUBE_PO_TOKEN", "web.gvs+xyz"),
        ]))
        .unwrap();

        assert_eq!(config.prefix, "?");
        assert_eq!(config.media.process_timeout, Duration::from_secs(900));
        assert_eq!(
            config.media.extractor_args().unwrap()[1],
            "youtube:po_token=web.gvs+xyz"
        );
        assert_eq!(config.redacted().token, "<redacted>");
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result = BotConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_APPLICATION_ID", "7"),
            ("DOWNLOAD_TIMEOUT", "soon"),
        ]));
        assert_matches!(result, Err(ConfigError::Invalid { name: "DOWNLOAD_TIMEOUT", .. }));
    }

    #[test]
    fn test_missing_executables_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BotConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_APPLICATION_ID", "7"),
        ]))
        .unwrap();
        config.media.ytdlp_path = dir.path().join("yt-dlp");
        config.media.ffmpeg_path = dir.path().join("ffmpeg");

        assert_matches!(
            config.verify_executables(),
            Err(ConfigError::ExecutableMissing(path)) if path.ends_with("yt-dlp")
        );

        std::fs::write(&config.media.ytdlp_path, b"").unwrap();
        std::fs::write(&config.media.ffmpeg_path, b"").unwrap();
        assert!(config.verify_executables().is_ok());
    }
}
