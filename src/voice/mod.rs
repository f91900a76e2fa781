//! Per-guild voice sessions: one connection, one player and a FIFO of pending sources.

pub mod manager;
pub mod media;
pub mod songbird_transport;
pub mod source;
pub mod transport;

use thiserror::Error;

/// Errors that can occur during voice operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Not in a guild")]
    NotInGuild,

    #[error("You need to be in a voice channel to use this command.")]
    UserNotInVoiceChannel,

    #[error("I am not in a voice channel. Use `!call` first.")]
    NotConnected,

    #[error("Failed to get voice manager")]
    NoVoiceManager,

    #[error("Failed to join voice channel: {0}")]
    JoinFailed(String),

    #[error("`{0}` not found.")]
    FileNotFound(String),

    #[error("Invalid file name `{0}`.")]
    InvalidFileName(String),

    #[error("Media process failed: {0}")]
    MediaProcess(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

pub type VoiceResult<T> = Result<T, VoiceError>;
